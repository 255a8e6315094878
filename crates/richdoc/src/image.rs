use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::command::{
    CommandError, CommandPriority, INSERT_IMAGE_COMMAND, InsertImagePayload, decode_payload,
};
use crate::core::{Editor, UpdateContext};
use crate::dom::{DomConversion, DomConversionOutput, DomElement, DomNode};
use crate::error::UpdateError;
use crate::json::SerializedEditorState;
use crate::key::NodeKey;
use crate::node::{NodeKind, NodeType};
use crate::plugin::{CommandSpec, EditorPlugin};
use crate::rich_text::insert_block_at_selection;

pub const DEFAULT_MAX_WIDTH: u32 = 500;
pub const CAPTION_ATTR: &str = "data-lexical-image-caption";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dimension {
    #[default]
    Inherit,
    Px(u32),
}

impl Dimension {
    pub fn px(self) -> Option<u32> {
        match self {
            Dimension::Inherit => None,
            Dimension::Px(px) => Some(px),
        }
    }
}

impl From<Option<u32>> for Dimension {
    fn from(value: Option<u32>) -> Self {
        match value {
            Some(px) if px > 0 => Dimension::Px(px),
            _ => Dimension::Inherit,
        }
    }
}

/// Everything needed to build an image node. `caption` is a serialized
/// caption (`{"editorState": ...}`) and is only read when `show_caption` is
/// set.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub src: String,
    pub alt_text: String,
    pub width: Dimension,
    pub height: Dimension,
    pub max_width: u32,
    pub show_caption: bool,
    pub caption: Option<Value>,
}

impl ImagePayload {
    pub fn new(src: impl Into<String>, alt_text: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            alt_text: alt_text.into(),
            width: Dimension::Inherit,
            height: Dimension::Inherit,
            max_width: DEFAULT_MAX_WIDTH,
            show_caption: false,
            caption: None,
        }
    }

    pub fn size(mut self, width: Dimension, height: Dimension) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn show_caption(mut self, show_caption: bool) -> Self {
        self.show_caption = show_caption;
        self
    }

    pub fn caption(mut self, caption: Value) -> Self {
        self.caption = Some(caption);
        self
    }
}

/// Handle to the nested editor holding an image caption.
///
/// Cloning the handle shares the same editor, which is what document
/// snapshots need. Use [`CaptionEditor::deep_clone`] for an independent copy.
#[derive(Clone)]
pub struct CaptionEditor(Arc<Mutex<Editor>>);

impl Default for CaptionEditor {
    fn default() -> Self {
        Self::from_editor(Editor::caption())
    }
}

impl fmt::Debug for CaptionEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tuple = f.debug_tuple("CaptionEditor");
        match self.0.try_lock() {
            Ok(editor) => tuple.field(&editor.text_content()),
            Err(TryLockError::Poisoned(poisoned)) => tuple.field(&poisoned.get_ref().text_content()),
            Err(TryLockError::WouldBlock) => tuple.field(&"<locked>"),
        };
        tuple.finish()
    }
}

impl CaptionEditor {
    fn from_editor(editor: Editor) -> Self {
        Self(Arc::new(Mutex::new(editor)))
    }

    fn lock(&self) -> MutexGuard<'_, Editor> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read<R>(&self, f: impl FnOnce(&Editor) -> R) -> R {
        f(&self.lock())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Editor) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn text_content(&self) -> String {
        self.read(Editor::text_content)
    }

    pub fn ptr_eq(&self, other: &CaptionEditor) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Serialized form, `{"editorState": {"root": ...}}`.
    pub fn to_value(&self) -> Value {
        let state = self.read(|editor| editor.state().to_serialized());
        match serde_json::to_value(&state) {
            Ok(editor_state) => json!({ "editorState": editor_state }),
            Err(err) => {
                warn!(error = %err, "failed to serialize caption");
                json!({ "editorState": null })
            }
        }
    }

    pub fn deep_clone(&self) -> Self {
        Self::restore_or_default(Some(&self.to_value()))
    }

    pub fn restore_or_default(serialized: Option<&Value>) -> Self {
        let Some(serialized) = serialized else {
            return Self::default();
        };
        match restore_caption(serialized) {
            Ok(editor) => Self::from_editor(editor),
            Err(reason) => {
                warn!(%reason, "image caption could not be restored; using an empty caption");
                Self::default()
            }
        }
    }

    pub fn restore_from_str(serialized: &str) -> Self {
        match serde_json::from_str::<Value>(serialized) {
            Ok(value) => Self::restore_or_default(Some(&value)),
            Err(err) => {
                warn!(error = %err, "image caption is not valid JSON; using an empty caption");
                Self::default()
            }
        }
    }
}

fn restore_caption(serialized: &Value) -> Result<Editor, String> {
    let editor_state = serialized
        .get("editorState")
        .filter(|v| !v.is_null())
        .ok_or_else(|| "caption has no editorState".to_string())?;

    // Some writers store the nested state as a JSON string.
    let parsed = match editor_state {
        Value::String(text) => SerializedEditorState::from_json_str(text),
        other => SerializedEditorState::from_value(other.clone()),
    }
    .map_err(|err| format!("caption editorState does not parse: {err}"))?;

    let mut editor = Editor::caption();
    let state = editor
        .parse_editor_state(&parsed)
        .map_err(|err| format!("caption editorState was rejected: {err}"))?;
    if state.tree().is_empty() {
        return Err("caption editorState is empty".to_string());
    }
    editor
        .set_editor_state(state)
        .map_err(|err| format!("caption editorState could not be adopted: {err}"))?;
    editor.clear_history();
    Ok(editor)
}

#[derive(Debug, Clone)]
pub struct ImageNode {
    src: String,
    alt_text: String,
    width: Dimension,
    height: Dimension,
    max_width: u32,
    show_caption: bool,
    caption: CaptionEditor,
}

impl ImageNode {
    pub(crate) fn new(payload: ImagePayload) -> Self {
        let caption = if payload.show_caption {
            CaptionEditor::restore_or_default(payload.caption.as_ref())
        } else {
            CaptionEditor::default()
        };
        Self {
            src: payload.src,
            alt_text: payload.alt_text,
            width: payload.width,
            height: payload.height,
            max_width: payload.max_width,
            show_caption: payload.show_caption,
            caption,
        }
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn alt_text(&self) -> &str {
        &self.alt_text
    }

    pub fn width(&self) -> Dimension {
        self.width
    }

    pub fn height(&self) -> Dimension {
        self.height
    }

    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    pub fn show_caption(&self) -> bool {
        self.show_caption
    }

    pub fn caption(&self) -> &CaptionEditor {
        &self.caption
    }

    pub fn set_width_and_height(&mut self, width: Dimension, height: Dimension) {
        self.width = width;
        self.height = height;
    }

    pub fn set_show_caption(&mut self, show_caption: bool) {
        self.show_caption = show_caption;
    }

    /// Copy with its own caption editor. Never fails; a caption that cannot
    /// be copied is replaced by an empty one.
    pub fn duplicate(&self) -> Self {
        Self {
            caption: self.caption.deep_clone(),
            ..self.clone()
        }
    }

    pub fn to_payload(&self) -> ImagePayload {
        ImagePayload {
            src: self.src.clone(),
            alt_text: self.alt_text.clone(),
            width: self.width,
            height: self.height,
            max_width: self.max_width,
            show_caption: self.show_caption,
            caption: self.show_caption.then(|| self.caption.to_value()),
        }
    }

    pub(crate) fn export_dom(&self) -> Vec<DomNode> {
        let mut img = DomElement::new("img")
            .attr("src", self.src.as_str())
            .attr("alt", self.alt_text.as_str());
        if let Some(width) = self.width.px() {
            img = img.attr("width", width.to_string());
        }
        if let Some(height) = self.height.px() {
            img = img.attr("height", height.to_string());
        }
        let mut out = vec![img.into()];
        if self.show_caption {
            out.push(
                DomElement::new("div")
                    .attr(CAPTION_ATTR, "true")
                    .child(DomNode::text(self.caption.text_content()))
                    .into(),
            );
        }
        out
    }
}

fn is_importable_src(src: &str) -> bool {
    let src = src.trim();
    !src.is_empty() && !src.starts_with("file:///")
}

fn convert_image_element(el: &DomElement) -> Option<DomConversionOutput> {
    let src = el.get_attr("src").filter(|src| is_importable_src(src))?;
    let dimension = |name: &str| -> Dimension {
        el.get_attr(name)
            .and_then(|v| v.trim().trim_end_matches("px").parse::<u32>().ok())
            .into()
    };
    let payload = ImagePayload::new(src, el.get_attr("alt").unwrap_or_default())
        .size(dimension("width"), dimension("height"));
    Some(DomConversionOutput::node(NodeKind::image(payload)))
}

fn convert_caption_element(el: &DomElement) -> Option<DomConversionOutput> {
    el.has_attr(CAPTION_ATTR).then_some(DomConversionOutput::Ignore)
}

impl UpdateContext<'_> {
    pub fn writable_image(&mut self, key: NodeKey) -> Result<&mut ImageNode, UpdateError> {
        let found = self.node_type(key)?;
        self.writable(key)?
            .as_image_mut()
            .ok_or(UpdateError::UnexpectedNodeType {
                key,
                expected: NodeType::Image,
                found,
            })
    }

    pub fn set_image_size(
        &mut self,
        key: NodeKey,
        width: Dimension,
        height: Dimension,
    ) -> Result<(), UpdateError> {
        self.writable_image(key)?.set_width_and_height(width, height);
        Ok(())
    }

    pub fn set_image_show_caption(
        &mut self,
        key: NodeKey,
        show_caption: bool,
    ) -> Result<(), UpdateError> {
        let node = self.node(key)?;
        let Some(current) = node.as_image().map(ImageNode::show_caption) else {
            return Err(UpdateError::UnexpectedNodeType {
                key,
                expected: NodeType::Image,
                found: node.node_type(),
            });
        };
        if current == show_caption {
            return Ok(());
        }
        self.writable_image(key)?.set_show_caption(show_caption);
        Ok(())
    }
}

fn insert_image(
    cx: &mut UpdateContext<'_>,
    payload: InsertImagePayload,
) -> Result<bool, CommandError> {
    if !is_importable_src(&payload.src) {
        return Err(CommandError::new("Missing or unsupported image src"));
    }
    let image = ImagePayload::new(payload.src.trim(), payload.alt_text)
        .size(payload.width.into(), payload.height.into())
        .show_caption(payload.show_caption);
    let key = cx.create_node(NodeKind::image(image))?;
    insert_block_at_selection(cx, key)?;
    debug!(%key, "inserted image");
    Ok(true)
}

pub struct ImagePlugin;

impl EditorPlugin for ImagePlugin {
    fn id(&self) -> &'static str {
        "image"
    }

    fn node_types(&self) -> Vec<NodeType> {
        vec![NodeType::Image]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new(INSERT_IMAGE_COMMAND, CommandPriority::Editor, |cx, payload| {
                insert_image(cx, decode_payload(payload)?)
            })
            .description("Insert an image block at the selection."),
        ]
    }

    fn dom_conversions(&self) -> Vec<DomConversion> {
        vec![
            DomConversion::new("img", 0, convert_image_element),
            DomConversion::new("div", 2, convert_caption_element),
        ]
    }
}
