use std::sync::Arc;

use serde_json::Value;

use crate::collapsible::CollapsiblePlugin;
use crate::command::{CommandError, CommandHandler, CommandPriority};
use crate::core::UpdateContext;
use crate::dom::DomConversion;
use crate::equation::EquationPlugin;
use crate::error::UpdateError;
use crate::image::ImagePlugin;
use crate::key::NodeKey;
use crate::node::NodeType;
use crate::rich_text::RichTextPlugin;
use crate::transform::TransformFn;

#[derive(Clone)]
pub struct CommandSpec {
    pub command: String,
    pub priority: CommandPriority,
    pub description: Option<String>,
    pub handler: CommandHandler,
}

impl CommandSpec {
    pub fn new(
        command: impl Into<String>,
        priority: CommandPriority,
        handler: impl Fn(&mut UpdateContext<'_>, Option<&Value>) -> Result<bool, CommandError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            command: command.into(),
            priority,
            description: None,
            handler: Arc::new(handler),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub fn transform(
    node_type: NodeType,
    f: impl Fn(&mut UpdateContext<'_>, NodeKey) -> Result<(), UpdateError> + Send + Sync + 'static,
) -> (NodeType, TransformFn) {
    (node_type, Arc::new(f))
}

pub trait EditorPlugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn node_types(&self) -> Vec<NodeType> {
        Vec::new()
    }
    fn transforms(&self) -> Vec<(NodeType, TransformFn)> {
        Vec::new()
    }
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }
    fn dom_conversions(&self) -> Vec<DomConversion> {
        Vec::new()
    }
}

pub fn core_plugins() -> Vec<Box<dyn EditorPlugin>> {
    vec![Box::new(RichTextPlugin)]
}

pub fn richtext_plugins() -> Vec<Box<dyn EditorPlugin>> {
    vec![
        Box::new(RichTextPlugin),
        Box::new(CollapsiblePlugin),
        Box::new(EquationPlugin),
        Box::new(ImagePlugin),
    ]
}
