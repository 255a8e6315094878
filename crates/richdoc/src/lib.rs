mod collapsible;
mod command;
mod core;
mod dom;
mod equation;
mod error;
mod image;
mod json;
mod key;
mod node;
mod plugin;
mod rich_text;
mod selection;
mod transform;
mod tree;

pub use crate::collapsible::*;
pub use crate::command::*;
pub use crate::core::*;
pub use crate::dom::*;
pub use crate::equation::*;
pub use crate::error::*;
pub use crate::image::*;
pub use crate::json::*;
pub use crate::key::*;
pub use crate::node::*;
pub use crate::plugin::*;
pub use crate::rich_text::RichTextPlugin;
pub use crate::selection::*;
pub use crate::transform::*;
pub use crate::tree::*;
