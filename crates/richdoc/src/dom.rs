use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::core::{EditorState, UpdateContext};
use crate::error::UpdateError;
use crate::key::NodeKey;
use crate::node::{NodeKind, TextData, TextFormat};
use crate::tree::Tree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomNode {
    Element(DomElement),
    Text(String),
}

impl DomNode {
    pub fn text(text: impl Into<String>) -> Self {
        DomNode::Text(text.into())
    }

    pub fn as_element(&self) -> Option<&DomElement> {
        match self {
            DomNode::Element(el) => Some(el),
            DomNode::Text(_) => None,
        }
    }

    pub fn text_content(&self) -> String {
        match self {
            DomNode::Text(text) => text.clone(),
            DomNode::Element(el) => el.children.iter().map(DomNode::text_content).collect(),
        }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        write_html(self, &mut out);
        out
    }
}

impl From<DomElement> for DomNode {
    fn from(value: DomElement) -> Self {
        DomNode::Element(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomElement {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<DomNode>,
}

impl DomElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: impl Into<DomNode>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = DomNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.get_attr("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }
}

const VOID_TAGS: &[&str] = &["br", "img", "hr"];

fn write_html(node: &DomNode, out: &mut String) {
    match node {
        DomNode::Text(text) => escape_into(text, false, out),
        DomNode::Element(el) => {
            out.push('<');
            out.push_str(&el.tag);
            for (name, value) in &el.attrs {
                out.push(' ');
                out.push_str(name);
                if !value.is_empty() {
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
            }
            out.push('>');
            if VOID_TAGS.contains(&el.tag.as_str()) {
                return;
            }
            for child in &el.children {
                write_html(child, out);
            }
            out.push_str("</");
            out.push_str(&el.tag);
            out.push('>');
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

pub fn to_html(nodes: &[DomNode]) -> String {
    nodes.iter().map(DomNode::to_html).collect()
}

#[derive(Debug)]
pub enum DomConversionOutput {
    /// A new node. Element nodes receive the imported `children`, or the
    /// element's own children when `None`.
    Node {
        kind: NodeKind,
        children: Option<Vec<DomNode>>,
    },
    Format(TextFormat),
    Ignore,
}

impl DomConversionOutput {
    pub fn node(kind: NodeKind) -> Self {
        DomConversionOutput::Node {
            kind,
            children: None,
        }
    }
}

pub type DomConvertFn = Arc<dyn Fn(&DomElement) -> Option<DomConversionOutput> + Send + Sync>;

#[derive(Clone)]
pub struct DomConversion {
    pub tag: &'static str,
    pub priority: u8,
    pub convert: DomConvertFn,
}

impl DomConversion {
    pub fn new(
        tag: &'static str,
        priority: u8,
        convert: impl Fn(&DomElement) -> Option<DomConversionOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            tag,
            priority,
            convert: Arc::new(convert),
        }
    }
}

#[derive(Default, Clone)]
pub struct DomConversionRegistry {
    by_tag: HashMap<&'static str, Vec<DomConversion>>,
}

impl DomConversionRegistry {
    pub fn register(&mut self, conversion: DomConversion) {
        let list = self.by_tag.entry(conversion.tag).or_default();
        let at = list
            .iter()
            .position(|c| c.priority < conversion.priority)
            .unwrap_or(list.len());
        list.insert(at, conversion);
    }

    pub fn convert(&self, el: &DomElement) -> Option<DomConversionOutput> {
        self.by_tag
            .get(el.tag.as_str())?
            .iter()
            .find_map(|conversion| (conversion.convert)(el))
    }
}

impl UpdateContext<'_> {
    /// Creates nodes for a DOM fragment and returns the top-level keys,
    /// unattached. The caller decides where they go; the transform engine
    /// wraps stray inline runs once they are attached.
    pub fn import_dom(&mut self, nodes: &[DomNode]) -> Result<Vec<NodeKey>, UpdateError> {
        self.import_dom_nodes(nodes, TextFormat::empty(), false)
    }

    fn import_dom_nodes(
        &mut self,
        nodes: &[DomNode],
        format: TextFormat,
        inline: bool,
    ) -> Result<Vec<NodeKey>, UpdateError> {
        let mut out = Vec::new();
        for node in nodes {
            match node {
                DomNode::Text(text) => {
                    if !inline && text.trim().is_empty() {
                        continue;
                    }
                    let key = self.create_node(NodeKind::Text(TextData {
                        format,
                        ..TextData::new(text.as_str())
                    }))?;
                    out.push(key);
                }
                DomNode::Element(el) => out.extend(self.import_dom_element(el, format, inline)?),
            }
        }
        Ok(out)
    }

    fn import_dom_element(
        &mut self,
        el: &DomElement,
        format: TextFormat,
        inline: bool,
    ) -> Result<Vec<NodeKey>, UpdateError> {
        match self.dom_registry().convert(el) {
            Some(DomConversionOutput::Node { kind, children }) => {
                if !self.is_registered(kind.node_type()) {
                    debug!(tag = %el.tag, node_type = %kind.node_type(), "conversion target not registered");
                    return self.import_dom_nodes(&el.children, format, inline);
                }
                let is_element = kind.is_element();
                let child_inline = kind.can_hold_inline();
                let key = self.create_node(kind)?;
                if is_element {
                    let children = children.as_deref().unwrap_or(&el.children);
                    let child_keys = self.import_dom_nodes(children, format, child_inline)?;
                    self.append_children(key, &child_keys)?;
                }
                Ok(vec![key])
            }
            Some(DomConversionOutput::Format(extra)) => {
                self.import_dom_nodes(&el.children, format | extra, true)
            }
            Some(DomConversionOutput::Ignore) => Ok(Vec::new()),
            None => self.import_dom_nodes(&el.children, format, inline),
        }
    }
}

pub fn export_dom(state: &EditorState) -> Vec<DomNode> {
    let tree = state.tree();
    tree.children(tree.root())
        .iter()
        .flat_map(|child| export_node(tree, *child))
        .collect()
}

pub fn export_html(state: &EditorState) -> String {
    to_html(&export_dom(state))
}

pub fn export_node(tree: &Tree, key: NodeKey) -> Vec<DomNode> {
    let Some(node) = tree.get(key) else {
        return Vec::new();
    };
    let children = || -> Vec<DomNode> {
        node.children()
            .iter()
            .flat_map(|child| export_node(tree, *child))
            .collect()
    };
    match node.kind() {
        NodeKind::Root(_) => children(),
        NodeKind::Paragraph(_) => vec![DomElement::new("p").children(children()).into()],
        NodeKind::LineBreak => vec![DomElement::new("br").into()],
        NodeKind::Text(text) => vec![export_text(text)],
        NodeKind::CollapsibleContainer { open, .. } => {
            let mut details = DomElement::new("details").children(children());
            if *open {
                details = details.attr("open", "");
            }
            vec![details.into()]
        }
        NodeKind::CollapsibleTitle(_) => vec![
            DomElement::new("div")
                .attr("class", crate::collapsible::TITLE_CLASS)
                .children(children())
                .into(),
        ],
        NodeKind::CollapsibleContent(_) => vec![
            DomElement::new("div")
                .attr("class", crate::collapsible::CONTENT_CLASS)
                .children(children())
                .into(),
        ],
        NodeKind::Equation(eq) => vec![eq.export_dom()],
        NodeKind::Image(img) => img.export_dom(),
    }
}

const FORMAT_TAGS: &[(TextFormat, &str)] = &[
    (TextFormat::CODE, "code"),
    (TextFormat::HIGHLIGHT, "mark"),
    (TextFormat::SUBSCRIPT, "sub"),
    (TextFormat::SUPERSCRIPT, "sup"),
    (TextFormat::STRIKETHROUGH, "s"),
    (TextFormat::UNDERLINE, "u"),
    (TextFormat::ITALIC, "em"),
    (TextFormat::BOLD, "strong"),
];

fn export_text(text: &TextData) -> DomNode {
    let mut node = DomNode::text(text.text.as_str());
    for (flag, tag) in FORMAT_TAGS {
        if text.format.contains(*flag) {
            node = DomElement::new(*tag).child(node).into();
        }
    }
    node
}

pub(crate) fn base_conversions() -> Vec<DomConversion> {
    let mut out = vec![
        DomConversion::new("p", 0, |_| {
            Some(DomConversionOutput::node(NodeKind::paragraph()))
        }),
        DomConversion::new("br", 0, |_| {
            Some(DomConversionOutput::node(NodeKind::line_break()))
        }),
        DomConversion::new("script", 0, |_| Some(DomConversionOutput::Ignore)),
        DomConversion::new("style", 0, |_| Some(DomConversionOutput::Ignore)),
    ];
    let formats: &[(&'static str, TextFormat)] = &[
        ("strong", TextFormat::BOLD),
        ("b", TextFormat::BOLD),
        ("em", TextFormat::ITALIC),
        ("i", TextFormat::ITALIC),
        ("u", TextFormat::UNDERLINE),
        ("s", TextFormat::STRIKETHROUGH),
        ("del", TextFormat::STRIKETHROUGH),
        ("code", TextFormat::CODE),
        ("sub", TextFormat::SUBSCRIPT),
        ("sup", TextFormat::SUPERSCRIPT),
        ("mark", TextFormat::HIGHLIGHT),
    ];
    for (tag, format) in formats {
        let format = *format;
        out.push(DomConversion::new(tag, 0, move |_| {
            Some(DomConversionOutput::Format(format))
        }));
    }
    out
}
