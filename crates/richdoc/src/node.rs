use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::equation::EquationNode;
use crate::image::{ImageNode, ImagePayload};
use crate::key::NodeKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Root,
    Paragraph,
    Text,
    #[serde(rename = "linebreak")]
    LineBreak,
    CollapsibleContainer,
    CollapsibleTitle,
    CollapsibleContent,
    Equation,
    Image,
}

impl NodeType {
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeType::Root => "root",
            NodeType::Paragraph => "paragraph",
            NodeType::Text => "text",
            NodeType::LineBreak => "linebreak",
            NodeType::CollapsibleContainer => "collapsible-container",
            NodeType::CollapsibleTitle => "collapsible-title",
            NodeType::CollapsibleContent => "collapsible-content",
            NodeType::Equation => "equation",
            NodeType::Image => "image",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ElementFormat {
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "left")]
    Left,
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "center")]
    Center,
    #[serde(rename = "right")]
    Right,
    #[serde(rename = "end")]
    End,
    #[serde(rename = "justify")]
    Justify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementData {
    pub(crate) children: Vec<NodeKey>,
    pub format: ElementFormat,
    pub indent: u32,
    pub direction: Option<Direction>,
}

impl ElementData {
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }
}

bitflags! {
    /// Inline text formatting, serialized as the integer `format` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextFormat: u32 {
        const BOLD = 1;
        const ITALIC = 1 << 1;
        const STRIKETHROUGH = 1 << 2;
        const UNDERLINE = 1 << 3;
        const CODE = 1 << 4;
        const SUBSCRIPT = 1 << 5;
        const SUPERSCRIPT = 1 << 6;
        const HIGHLIGHT = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMode {
    #[default]
    Normal,
    Token,
    Segmented,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextData {
    pub text: String,
    pub format: TextFormat,
    pub style: String,
    pub mode: TextMode,
    pub detail: u32,
}

impl TextData {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn can_merge_with(&self, other: &TextData) -> bool {
        self.mode == TextMode::Normal
            && other.mode == TextMode::Normal
            && self.format == other.format
            && self.style == other.style
            && self.detail == other.detail
    }

    fn with_same_format(&self, text: String) -> Self {
        Self {
            text,
            format: self.format,
            style: self.style.clone(),
            mode: self.mode,
            detail: self.detail,
        }
    }

    pub(crate) fn split_off(&mut self, offset: usize) -> TextData {
        let offset = clamp_to_char_boundary(&self.text, offset);
        let tail = self.text.split_off(offset);
        self.with_same_format(tail)
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Root(ElementData),
    Paragraph(ElementData),
    CollapsibleContainer { element: ElementData, open: bool },
    CollapsibleTitle(ElementData),
    CollapsibleContent(ElementData),
    Text(TextData),
    LineBreak,
    Equation(EquationNode),
    Image(ImageNode),
}

impl NodeKind {
    pub(crate) fn root() -> Self {
        NodeKind::Root(ElementData::default())
    }

    pub fn paragraph() -> Self {
        NodeKind::Paragraph(ElementData::default())
    }

    pub fn text(text: impl Into<String>) -> Self {
        NodeKind::Text(TextData::new(text))
    }

    pub fn formatted_text(text: impl Into<String>, format: TextFormat) -> Self {
        NodeKind::Text(TextData {
            format,
            ..TextData::new(text)
        })
    }

    pub fn line_break() -> Self {
        NodeKind::LineBreak
    }

    pub fn collapsible_container(open: bool) -> Self {
        NodeKind::CollapsibleContainer {
            element: ElementData::default(),
            open,
        }
    }

    pub fn collapsible_title() -> Self {
        NodeKind::CollapsibleTitle(ElementData::default())
    }

    pub fn collapsible_content() -> Self {
        NodeKind::CollapsibleContent(ElementData::default())
    }

    pub fn equation(equation: impl Into<String>, inline: bool) -> Self {
        NodeKind::Equation(EquationNode::new(equation, inline))
    }

    pub fn image(payload: ImagePayload) -> Self {
        NodeKind::Image(ImageNode::new(payload))
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Root(_) => NodeType::Root,
            NodeKind::Paragraph(_) => NodeType::Paragraph,
            NodeKind::CollapsibleContainer { .. } => NodeType::CollapsibleContainer,
            NodeKind::CollapsibleTitle(_) => NodeType::CollapsibleTitle,
            NodeKind::CollapsibleContent(_) => NodeType::CollapsibleContent,
            NodeKind::Text(_) => NodeType::Text,
            NodeKind::LineBreak => NodeType::LineBreak,
            NodeKind::Equation(_) => NodeType::Equation,
            NodeKind::Image(_) => NodeType::Image,
        }
    }

    pub fn element(&self) -> Option<&ElementData> {
        match self {
            NodeKind::Root(el)
            | NodeKind::Paragraph(el)
            | NodeKind::CollapsibleTitle(el)
            | NodeKind::CollapsibleContent(el)
            | NodeKind::CollapsibleContainer { element: el, .. } => Some(el),
            NodeKind::Text(_) | NodeKind::LineBreak | NodeKind::Equation(_) | NodeKind::Image(_) => {
                None
            }
        }
    }

    pub fn element_mut(&mut self) -> Option<&mut ElementData> {
        match self {
            NodeKind::Root(el)
            | NodeKind::Paragraph(el)
            | NodeKind::CollapsibleTitle(el)
            | NodeKind::CollapsibleContent(el)
            | NodeKind::CollapsibleContainer { element: el, .. } => Some(el),
            NodeKind::Text(_) | NodeKind::LineBreak | NodeKind::Equation(_) | NodeKind::Image(_) => {
                None
            }
        }
    }

    pub fn is_element(&self) -> bool {
        self.element().is_some()
    }

    pub fn is_decorator(&self) -> bool {
        matches!(self, NodeKind::Equation(_) | NodeKind::Image(_))
    }

    pub fn is_inline(&self) -> bool {
        match self {
            NodeKind::Text(_) | NodeKind::LineBreak => true,
            NodeKind::Equation(eq) => eq.inline(),
            _ => false,
        }
    }

    pub fn can_hold_inline(&self) -> bool {
        matches!(self, NodeKind::Paragraph(_))
    }

    /// Elements whose children are blocks: the root, and the parts of a
    /// collapsible that hold paragraphs.
    pub fn holds_blocks(&self) -> bool {
        matches!(
            self,
            NodeKind::Root(_) | NodeKind::CollapsibleTitle(_) | NodeKind::CollapsibleContent(_)
        )
    }

    pub(crate) fn take_children(&mut self) -> Vec<NodeKey> {
        self.element_mut()
            .map(|el| std::mem::take(&mut el.children))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) key: NodeKey,
    pub(crate) parent: Option<NodeKey>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn children(&self) -> &[NodeKey] {
        self.kind.element().map(|el| el.children()).unwrap_or(&[])
    }

    pub fn as_text(&self) -> Option<&TextData> {
        match &self.kind {
            NodeKind::Text(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn as_text_mut(&mut self) -> Option<&mut TextData> {
        match &mut self.kind {
            NodeKind::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_equation(&self) -> Option<&EquationNode> {
        match &self.kind {
            NodeKind::Equation(eq) => Some(eq),
            _ => None,
        }
    }

    pub(crate) fn as_equation_mut(&mut self) -> Option<&mut EquationNode> {
        match &mut self.kind {
            NodeKind::Equation(eq) => Some(eq),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageNode> {
        match &self.kind {
            NodeKind::Image(img) => Some(img),
            _ => None,
        }
    }

    pub(crate) fn as_image_mut(&mut self) -> Option<&mut ImageNode> {
        match &mut self.kind {
            NodeKind::Image(img) => Some(img),
            _ => None,
        }
    }

    pub fn is_open(&self) -> Option<bool> {
        match &self.kind {
            NodeKind::CollapsibleContainer { open, .. } => Some(*open),
            _ => None,
        }
    }

    pub(crate) fn set_open(&mut self, value: bool) {
        if let NodeKind::CollapsibleContainer { open, .. } = &mut self.kind {
            *open = value;
        }
    }

    pub fn text_len(&self) -> usize {
        self.as_text().map(|t| t.text.len()).unwrap_or(0)
    }
}

pub(crate) fn clamp_to_char_boundary(s: &str, mut ix: usize) -> usize {
    ix = ix.min(s.len());
    while ix > 0 && !s.is_char_boundary(ix) {
        ix -= 1;
    }
    ix
}
