use tracing::debug;

use crate::command::{
    CommandError, CommandPriority, INSERT_EQUATION_COMMAND, InsertEquationPayload, decode_payload,
};
use crate::core::UpdateContext;
use crate::dom::{DomConversion, DomConversionOutput, DomElement, DomNode};
use crate::error::UpdateError;
use crate::key::NodeKey;
use crate::node::{NodeKind, NodeType};
use crate::plugin::{CommandSpec, EditorPlugin};
use crate::rich_text::{insert_block_at_selection, insert_inline_node};

pub const EQUATION_ATTR: &str = "data-lexical-equation";
pub const INLINE_ATTR: &str = "data-lexical-inline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquationNode {
    equation: String,
    inline: bool,
}

impl EquationNode {
    pub(crate) fn new(equation: impl Into<String>, inline: bool) -> Self {
        Self {
            equation: equation.into(),
            inline,
        }
    }

    pub fn equation(&self) -> &str {
        &self.equation
    }

    pub fn inline(&self) -> bool {
        self.inline
    }

    pub fn set_equation(&mut self, equation: impl Into<String>) {
        self.equation = equation.into();
    }

    pub fn set_inline(&mut self, inline: bool) {
        self.inline = inline;
    }

    pub fn text_content(&self) -> &str {
        &self.equation
    }

    pub(crate) fn export_dom(&self) -> DomNode {
        let tag = if self.inline { "span" } else { "div" };
        DomElement::new(tag)
            .attr(EQUATION_ATTR, escape_equation(&self.equation))
            .attr(INLINE_ATTR, self.inline.to_string())
            .child(DomNode::text(self.equation.as_str()))
            .into()
    }
}

/// `"` is written as `&quot;` inside the attribute value; nothing else is
/// escaped.
pub fn escape_equation(equation: &str) -> String {
    equation.replace('"', "&quot;")
}

pub fn unescape_equation(value: &str) -> String {
    value.replace("&quot;", "\"")
}

fn convert_equation_element(el: &DomElement) -> Option<DomConversionOutput> {
    let equation = el.get_attr(EQUATION_ATTR)?;
    let inline = el.get_attr(INLINE_ATTR) == Some("true");
    Some(DomConversionOutput::node(NodeKind::equation(
        unescape_equation(equation),
        inline,
    )))
}

impl UpdateContext<'_> {
    pub fn writable_equation(
        &mut self,
        key: NodeKey,
    ) -> Result<&mut EquationNode, UpdateError> {
        let found = self.node_type(key)?;
        self.writable(key)?
            .as_equation_mut()
            .ok_or(UpdateError::UnexpectedNodeType {
                key,
                expected: NodeType::Equation,
                found,
            })
    }
}

fn insert_equation(
    cx: &mut UpdateContext<'_>,
    payload: InsertEquationPayload,
) -> Result<bool, CommandError> {
    if let Some(key) = payload.node_key_to_update {
        let live = cx.tree().is_attached(key)
            && cx.tree().node_type(key) == Some(NodeType::Equation);
        if !live {
            debug!(%key, "equation to update is gone");
            return Ok(false);
        }
        let node = cx.writable_equation(key)?;
        if let Some(equation) = payload.equation {
            node.set_equation(equation);
        }
        if let Some(inline) = payload.inline {
            node.set_inline(inline);
        }
        return Ok(true);
    }

    // Without a source the UI still has to ask the user for one.
    let Some(equation) = payload.equation else {
        return Ok(false);
    };
    let inline = payload.inline.unwrap_or(true);
    if inline {
        return Ok(insert_inline_node(cx, NodeKind::equation(equation, true))?.is_some());
    }
    let key = cx.create_node(NodeKind::equation(equation, false))?;
    insert_block_at_selection(cx, key)?;
    Ok(true)
}

pub struct EquationPlugin;

impl EditorPlugin for EquationPlugin {
    fn id(&self) -> &'static str {
        "equation"
    }

    fn node_types(&self) -> Vec<NodeType> {
        vec![NodeType::Equation]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new(INSERT_EQUATION_COMMAND, CommandPriority::Editor, |cx, payload| {
                insert_equation(cx, decode_payload(payload)?)
            })
            .description("Insert an equation at the caret, or update an existing one."),
        ]
    }

    fn dom_conversions(&self) -> Vec<DomConversion> {
        vec![
            DomConversion::new("span", 1, convert_equation_element),
            DomConversion::new("div", 1, convert_equation_element),
        ]
    }
}
