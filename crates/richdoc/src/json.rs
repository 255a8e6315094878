use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::{Editor, EditorState};
use crate::error::ImportError;
use crate::image::{DEFAULT_MAX_WIDTH, Dimension, ImagePayload};
use crate::key::NodeKey;
use crate::node::{
    Direction, ElementData, ElementFormat, NodeKind, NodeType, TextData, TextFormat, TextMode,
};
use crate::tree::Tree;

const DEFAULT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DEFAULT_VERSION
}

fn default_true() -> bool {
    true
}

fn default_max_width() -> u32 {
    DEFAULT_MAX_WIDTH
}

/// Pixel sizes arrive as arbitrary JSON numbers. Anything that is not a
/// positive number reads as unset.
fn de_pixels<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| v.as_f64())
        .filter(|px| px.is_finite() && *px > 0.0)
        .map(|px| px.round().min(u32::MAX as f64) as u32))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedElement {
    #[serde(default)]
    pub children: Vec<SerializedNode>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub format: ElementFormat,
    #[serde(default)]
    pub indent: u32,
    #[serde(default = "default_version")]
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedText {
    #[serde(default)]
    pub detail: u32,
    #[serde(default)]
    pub format: u32,
    #[serde(default)]
    pub mode: TextMode,
    #[serde(default)]
    pub style: String,
    pub text: String,
    #[serde(default = "default_version")]
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEquation {
    pub equation: String,
    #[serde(default)]
    pub inline: bool,
    #[serde(default = "default_version")]
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedImage {
    pub src: String,
    #[serde(default)]
    pub alt_text: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_pixels"
    )]
    pub width: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_pixels"
    )]
    pub height: Option<u32>,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default)]
    pub show_caption: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<Value>,
    #[serde(default = "default_version")]
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SerializedNode {
    #[serde(rename = "root")]
    Root(SerializedElement),
    #[serde(rename = "paragraph")]
    Paragraph(SerializedElement),
    #[serde(rename = "collapsible-container")]
    CollapsibleContainer {
        #[serde(flatten)]
        element: SerializedElement,
        #[serde(default = "default_true")]
        open: bool,
    },
    #[serde(rename = "collapsible-title")]
    CollapsibleTitle(SerializedElement),
    #[serde(rename = "collapsible-content")]
    CollapsibleContent(SerializedElement),
    #[serde(rename = "text")]
    Text(SerializedText),
    #[serde(rename = "linebreak")]
    LineBreak {
        #[serde(default = "default_version")]
        version: u32,
    },
    #[serde(rename = "equation")]
    Equation(SerializedEquation),
    #[serde(rename = "image")]
    Image(SerializedImage),
}

impl SerializedNode {
    pub fn node_type(&self) -> NodeType {
        match self {
            SerializedNode::Root(_) => NodeType::Root,
            SerializedNode::Paragraph(_) => NodeType::Paragraph,
            SerializedNode::CollapsibleContainer { .. } => NodeType::CollapsibleContainer,
            SerializedNode::CollapsibleTitle(_) => NodeType::CollapsibleTitle,
            SerializedNode::CollapsibleContent(_) => NodeType::CollapsibleContent,
            SerializedNode::Text(_) => NodeType::Text,
            SerializedNode::LineBreak { .. } => NodeType::LineBreak,
            SerializedNode::Equation(_) => NodeType::Equation,
            SerializedNode::Image(_) => NodeType::Image,
        }
    }

    fn element(&self) -> Option<&SerializedElement> {
        match self {
            SerializedNode::Root(el)
            | SerializedNode::Paragraph(el)
            | SerializedNode::CollapsibleTitle(el)
            | SerializedNode::CollapsibleContent(el)
            | SerializedNode::CollapsibleContainer { element: el, .. } => Some(el),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEditorState {
    pub root: SerializedNode,
}

impl SerializedEditorState {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

fn serialize_element(tree: &Tree, el: &ElementData) -> SerializedElement {
    SerializedElement {
        children: el
            .children()
            .iter()
            .map(|child| serialize_node(tree, *child))
            .collect(),
        direction: el.direction,
        format: el.format,
        indent: el.indent,
        version: DEFAULT_VERSION,
    }
}

pub fn serialize_node(tree: &Tree, key: NodeKey) -> SerializedNode {
    let Some(node) = tree.get(key) else {
        return SerializedNode::Paragraph(SerializedElement {
            children: Vec::new(),
            direction: None,
            format: ElementFormat::Unset,
            indent: 0,
            version: DEFAULT_VERSION,
        });
    };
    match node.kind() {
        NodeKind::Root(el) => SerializedNode::Root(serialize_element(tree, el)),
        NodeKind::Paragraph(el) => SerializedNode::Paragraph(serialize_element(tree, el)),
        NodeKind::CollapsibleContainer { element, open } => SerializedNode::CollapsibleContainer {
            element: serialize_element(tree, element),
            open: *open,
        },
        NodeKind::CollapsibleTitle(el) => {
            SerializedNode::CollapsibleTitle(serialize_element(tree, el))
        }
        NodeKind::CollapsibleContent(el) => {
            SerializedNode::CollapsibleContent(serialize_element(tree, el))
        }
        NodeKind::Text(text) => SerializedNode::Text(SerializedText {
            detail: text.detail,
            format: text.format.bits(),
            mode: text.mode,
            style: text.style.clone(),
            text: text.text.clone(),
            version: DEFAULT_VERSION,
        }),
        NodeKind::LineBreak => SerializedNode::LineBreak {
            version: DEFAULT_VERSION,
        },
        NodeKind::Equation(eq) => SerializedNode::Equation(SerializedEquation {
            equation: eq.equation().to_string(),
            inline: eq.inline(),
            version: DEFAULT_VERSION,
        }),
        NodeKind::Image(img) => {
            let payload = img.to_payload();
            SerializedNode::Image(SerializedImage {
                src: payload.src,
                alt_text: payload.alt_text,
                width: payload.width.px(),
                height: payload.height.px(),
                max_width: payload.max_width,
                show_caption: payload.show_caption,
                caption: payload.caption,
                version: DEFAULT_VERSION,
            })
        }
    }
}

impl EditorState {
    pub fn to_serialized(&self) -> SerializedEditorState {
        SerializedEditorState {
            root: serialize_node(&self.tree, self.tree.root()),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        self.to_serialized().to_json_pretty()
    }
}

fn element_data(el: &SerializedElement) -> ElementData {
    ElementData {
        children: Vec::new(),
        format: el.format,
        indent: el.indent,
        direction: el.direction,
    }
}

fn node_kind(node: &SerializedNode) -> NodeKind {
    match node {
        SerializedNode::Root(el) => NodeKind::Root(element_data(el)),
        SerializedNode::Paragraph(el) => NodeKind::Paragraph(element_data(el)),
        SerializedNode::CollapsibleContainer { element, open } => NodeKind::CollapsibleContainer {
            element: element_data(element),
            open: *open,
        },
        SerializedNode::CollapsibleTitle(el) => NodeKind::CollapsibleTitle(element_data(el)),
        SerializedNode::CollapsibleContent(el) => NodeKind::CollapsibleContent(element_data(el)),
        SerializedNode::Text(text) => NodeKind::Text(TextData {
            text: text.text.clone(),
            format: TextFormat::from_bits_truncate(text.format),
            style: text.style.clone(),
            mode: text.mode,
            detail: text.detail,
        }),
        SerializedNode::LineBreak { .. } => NodeKind::LineBreak,
        SerializedNode::Equation(eq) => NodeKind::equation(eq.equation.as_str(), eq.inline),
        SerializedNode::Image(img) => NodeKind::image(ImagePayload {
            src: img.src.clone(),
            alt_text: img.alt_text.clone(),
            width: Dimension::from(img.width),
            height: Dimension::from(img.height),
            max_width: img.max_width,
            show_caption: img.show_caption,
            caption: img.caption.clone(),
        }),
    }
}

impl Editor {
    /// Builds a detached state from its serialized form. Node types this
    /// editor does not register are rejected. The result is normalized once
    /// it is installed with [`Editor::set_editor_state`].
    pub fn parse_editor_state(
        &self,
        serialized: &SerializedEditorState,
    ) -> Result<EditorState, ImportError> {
        let SerializedNode::Root(root) = &serialized.root else {
            return Err(ImportError::MissingRoot(serialized.root.node_type()));
        };
        let mut tree = Tree::new();
        let root_key = tree.root();
        if let Some(el) = tree
            .get_mut(root_key)
            .and_then(|node| node.kind.element_mut())
        {
            el.format = root.format;
            el.indent = root.indent;
            el.direction = root.direction;
        }
        for child in &root.children {
            self.build_node(&mut tree, root_key, child)?;
        }
        Ok(EditorState::new(tree, None))
    }

    fn build_node(
        &self,
        tree: &mut Tree,
        parent: NodeKey,
        node: &SerializedNode,
    ) -> Result<(), ImportError> {
        let node_type = node.node_type();
        if node_type == NodeType::Root {
            return Err(ImportError::NestedRoot);
        }
        if !self.is_registered(node_type) {
            return Err(ImportError::UnregisteredNodeType(node_type));
        }
        let key = tree.insert_node(node_kind(node));
        let index = tree.children(parent).len();
        tree.insert_child(parent, key, index)?;
        if let Some(el) = node.element() {
            for child in &el.children {
                self.build_node(tree, key, child)?;
            }
        }
        Ok(())
    }

    pub fn import_json(&mut self, json: &str) -> Result<(), crate::error::UpdateError> {
        let serialized = SerializedEditorState::from_json_str(json).map_err(ImportError::from)?;
        let state = self.parse_editor_state(&serialized)?;
        self.set_editor_state(state)
    }

    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        self.state().to_json_pretty()
    }
}
