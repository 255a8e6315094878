use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::command::{
    CommandDispatcher, CommandError, CommandHandle, CommandHandler, CommandPriority,
};
use crate::dom::DomConversionRegistry;
use crate::error::{PluginError, TreeError, UpdateError};
use crate::key::NodeKey;
use crate::node::{Node, NodeKind, NodeType, TextData};
use crate::plugin::{EditorPlugin, core_plugins, richtext_plugins};
use crate::selection::{Point, PointType, Selection, normalize_selection};
use crate::transform::{TransformFn, TransformRegistry};
use crate::tree::Tree;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub namespace: String,
    pub max_undo: usize,
    pub max_transform_iterations: usize,
    pub history: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            max_undo: 0,
            max_transform_iterations: 0,
            history: true,
        }
    }
}

impl EditorConfig {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_defaults(mut self) -> Self {
        if self.max_undo == 0 {
            self.max_undo = 200;
        }
        if self.max_transform_iterations == 0 {
            self.max_transform_iterations = 100;
        }
        self
    }
}

/// Committed document plus the selection derived from it.
///
/// Cloning a state shares image caption editors with the original, so undo
/// entries and rollback checkpoints all see the current caption. Caption
/// edits live in the caption's own history and are never undone or rolled
/// back by the outer document.
#[derive(Debug, Clone, Default)]
pub struct EditorState {
    pub(crate) tree: Tree,
    pub(crate) selection: Option<Selection>,
}

impl EditorState {
    pub fn new(tree: Tree, selection: Option<Selection>) -> Self {
        Self { tree, selection }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn text_content(&self) -> String {
        self.tree.text_content(self.tree.root())
    }

    pub fn top_level(&self) -> &[NodeKey] {
        self.tree.children(self.tree.root())
    }
}

pub type UpdateListener = Arc<dyn Fn(&EditorState) + Send + Sync>;

pub struct Editor {
    state: EditorState,
    config: EditorConfig,
    plugins: Vec<&'static str>,
    node_types: BTreeSet<NodeType>,
    transforms: TransformRegistry,
    commands: CommandDispatcher,
    dom: DomConversionRegistry,
    listeners: Vec<UpdateListener>,
    undo_stack: Vec<EditorState>,
    redo_stack: Vec<EditorState>,
}

impl fmt::Debug for Editor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Editor")
            .field("namespace", &self.config.namespace)
            .field("plugins", &self.plugins)
            .field("nodes", &self.state.tree.len())
            .field("selection", &self.state.selection)
            .finish_non_exhaustive()
    }
}

impl Editor {
    pub fn new(
        config: EditorConfig,
        plugins: impl IntoIterator<Item = Box<dyn EditorPlugin>>,
    ) -> Result<Self, PluginError> {
        let mut editor = Self {
            state: EditorState::default(),
            config: config.with_defaults(),
            plugins: Vec::new(),
            node_types: BTreeSet::from([NodeType::Root]),
            transforms: TransformRegistry::default(),
            commands: CommandDispatcher::default(),
            dom: DomConversionRegistry::default(),
            listeners: Vec::new(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        };
        for plugin in plugins {
            editor.register_plugin(plugin)?;
        }
        editor.normalize_in_place();
        Ok(editor)
    }

    pub fn with_core_plugins() -> Self {
        Self::new(EditorConfig::default(), core_plugins()).expect("core plugins must be valid")
    }

    pub fn with_richtext_plugins() -> Self {
        Self::new(EditorConfig::default(), richtext_plugins())
            .expect("richtext plugins must be valid")
    }

    pub fn caption() -> Self {
        Self::new(
            EditorConfig::default().namespace("image-caption"),
            core_plugins(),
        )
        .expect("caption plugins must be valid")
    }

    pub fn register_plugin(&mut self, plugin: Box<dyn EditorPlugin>) -> Result<(), PluginError> {
        if self.plugins.contains(&plugin.id()) {
            return Err(PluginError::DuplicatePlugin(plugin.id()));
        }
        for node_type in plugin.node_types() {
            if node_type != NodeType::Root && !self.node_types.insert(node_type) {
                return Err(PluginError::DuplicateNodeType(node_type));
            }
        }
        for (node_type, transform) in plugin.transforms() {
            self.transforms.register(node_type, transform);
        }
        for spec in plugin.commands() {
            self.commands
                .register_arc(spec.command, spec.priority, spec.handler);
        }
        for conversion in plugin.dom_conversions() {
            self.dom.register(conversion);
        }
        self.plugins.push(plugin.id());
        Ok(())
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn read<R>(&self, f: impl FnOnce(&EditorState) -> R) -> R {
        f(&self.state)
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.state.selection.as_ref()
    }

    pub fn text_content(&self) -> String {
        self.state.text_content()
    }

    pub fn is_registered(&self, node_type: NodeType) -> bool {
        self.node_types.contains(&node_type)
    }

    pub fn node_types(&self) -> &BTreeSet<NodeType> {
        &self.node_types
    }

    pub fn dom_conversions(&self) -> &DomConversionRegistry {
        &self.dom
    }

    pub fn register_transform(
        &mut self,
        node_type: NodeType,
        transform: impl Fn(&mut UpdateContext<'_>, NodeKey) -> Result<(), UpdateError>
        + Send
        + Sync
        + 'static,
    ) {
        self.transforms.register(node_type, Arc::new(transform) as TransformFn);
    }

    pub fn register_command(
        &mut self,
        command: impl Into<String>,
        priority: CommandPriority,
        handler: impl Fn(&mut UpdateContext<'_>, Option<&Value>) -> Result<bool, CommandError>
        + Send
        + Sync
        + 'static,
    ) -> CommandHandle {
        self.commands
            .register_arc(command.into(), priority, Arc::new(handler) as CommandHandler)
    }

    pub fn unregister_command(&mut self, handle: CommandHandle) -> bool {
        self.commands.unregister(handle)
    }

    pub fn register_update_listener(
        &mut self,
        listener: impl Fn(&EditorState) + Send + Sync + 'static,
    ) {
        self.listeners.push(Arc::new(listener));
    }

    /// Runs `f` as one transaction.
    ///
    /// Mutations go to a pending copy of the committed state. Once `f`
    /// returns, registered transforms run until nothing is dirty, the
    /// selection is re-derived and unattached nodes are dropped. The pending
    /// state replaces the committed one only if every step succeeded.
    pub fn update<R>(
        &mut self,
        f: impl FnOnce(&mut UpdateContext<'_>) -> Result<R, UpdateError>,
    ) -> Result<R, UpdateError> {
        let mut pending = self.state.clone();
        let (result, tree_changed) = {
            let mut cx = UpdateContext::new(&mut pending, &self.commands, &self.node_types, &self.dom);
            let result = f(&mut cx)?;
            let iterations = self
                .transforms
                .run_to_fixed_point(&mut cx, self.config.max_transform_iterations)?;
            if iterations > 1 {
                debug!(
                    namespace = %self.config.namespace,
                    iterations,
                    "transforms settled"
                );
            }
            (result, cx.tree_changed)
        };

        let collected = pending.tree.collect_garbage();
        pending.selection = normalize_selection(&pending.tree, pending.selection.take());
        if collected > 0 {
            debug!(collected, "dropped unattached nodes");
        }

        let previous = std::mem::replace(&mut self.state, pending);
        if tree_changed && self.config.history {
            self.undo_stack.push(previous);
            self.redo_stack.clear();
            if self.undo_stack.len() > self.config.max_undo {
                self.undo_stack.remove(0);
            }
        }
        for listener in &self.listeners {
            listener(&self.state);
        }
        Ok(result)
    }

    pub fn dispatch(&mut self, command: &str, payload: Option<Value>) -> Result<bool, UpdateError> {
        self.update(|cx| Ok(cx.dispatch(command, payload.as_ref())))
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) -> Result<(), UpdateError> {
        self.update(|cx| {
            cx.set_selection(selection);
            Ok(())
        })
    }

    /// Replaces the whole document. Every node is visited by the transform
    /// engine before the new state becomes visible.
    pub fn set_editor_state(&mut self, state: EditorState) -> Result<(), UpdateError> {
        self.update(|cx| {
            cx.replace_state(state);
            Ok(())
        })
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo_stack.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.state, previous);
        self.redo_stack.push(current);
        for listener in &self.listeners {
            listener(&self.state);
        }
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(next) = self.redo_stack.pop() else {
            return false;
        };
        let current = std::mem::replace(&mut self.state, next);
        self.undo_stack.push(current);
        for listener in &self.listeners {
            listener(&self.state);
        }
        true
    }

    pub fn clear_history(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn normalize_in_place(&mut self) {
        let history = self.config.history;
        self.config.history = false;
        if let Err(err) = self.update(|cx| {
            cx.mark_all_dirty();
            Ok(())
        }) {
            tracing::error!(error = %err, "initial normalization failed");
        }
        self.config.history = history;
    }
}

pub(crate) struct Checkpoint {
    state: EditorState,
    dirty: BTreeSet<NodeKey>,
    tree_changed: bool,
}

/// Handle passed to every mutation, transform and command handler.
///
/// All tree mutations go through this context so the transform engine
/// learns which nodes need another look before commit.
pub struct UpdateContext<'a> {
    state: &'a mut EditorState,
    commands: &'a CommandDispatcher,
    node_types: &'a BTreeSet<NodeType>,
    dom: &'a DomConversionRegistry,
    dirty: BTreeSet<NodeKey>,
    tree_changed: bool,
}

impl<'a> UpdateContext<'a> {
    fn new(
        state: &'a mut EditorState,
        commands: &'a CommandDispatcher,
        node_types: &'a BTreeSet<NodeType>,
        dom: &'a DomConversionRegistry,
    ) -> Self {
        Self {
            state,
            commands,
            node_types,
            dom,
            dirty: BTreeSet::new(),
            tree_changed: false,
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.state.tree
    }

    pub fn state(&self) -> &EditorState {
        self.state
    }

    pub fn root(&self) -> NodeKey {
        self.state.tree.root()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.state.selection.as_ref()
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.state.selection = selection;
    }

    pub fn select_point(&mut self, point: Point) {
        self.state.selection = Some(Selection::collapsed(point));
    }

    pub fn is_registered(&self, node_type: NodeType) -> bool {
        self.node_types.contains(&node_type)
    }

    pub(crate) fn dom_registry(&self) -> &'a DomConversionRegistry {
        self.dom
    }

    /// Folds a nested update request into the current transaction.
    pub fn update<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, UpdateError>,
    ) -> Result<R, UpdateError> {
        f(self)
    }

    pub fn dispatch(&mut self, command: &str, payload: Option<&Value>) -> bool {
        let commands = self.commands;
        commands.dispatch(self, command, payload)
    }

    pub fn node(&self, key: NodeKey) -> Result<&Node, UpdateError> {
        self.state
            .tree
            .get(key)
            .ok_or(UpdateError::Tree(TreeError::UnknownNode(key)))
    }

    pub fn node_type(&self, key: NodeKey) -> Result<NodeType, UpdateError> {
        self.node(key).map(Node::node_type)
    }

    pub fn create_node(&mut self, kind: NodeKind) -> Result<NodeKey, UpdateError> {
        let node_type = kind.node_type();
        if node_type == NodeType::Root || !self.is_registered(node_type) {
            return Err(UpdateError::UnregisteredNodeType(node_type));
        }
        let key = self.state.tree.insert_node(kind);
        self.touch(key);
        Ok(key)
    }

    /// Inserts `key` under `parent`. `index` is interpreted after `key` has
    /// been detached from its current position.
    pub fn insert_child(
        &mut self,
        parent: NodeKey,
        key: NodeKey,
        index: usize,
    ) -> Result<(), UpdateError> {
        if let Some(old_parent) = self.state.tree.parent(key) {
            self.touch(old_parent);
        }
        self.state.tree.detach(key)?;
        self.state.tree.insert_child(parent, key, index)?;
        self.touch(parent);
        self.touch(key);
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeKey, key: NodeKey) -> Result<(), UpdateError> {
        if let Some(old_parent) = self.state.tree.parent(key) {
            self.touch(old_parent);
        }
        self.state.tree.detach(key)?;
        let index = self.state.tree.children(parent).len();
        self.state.tree.insert_child(parent, key, index)?;
        self.touch(parent);
        self.touch(key);
        Ok(())
    }

    pub fn append_children(&mut self, parent: NodeKey, keys: &[NodeKey]) -> Result<(), UpdateError> {
        for key in keys {
            self.append_child(parent, *key)?;
        }
        Ok(())
    }

    pub fn insert_before(&mut self, sibling: NodeKey, key: NodeKey) -> Result<(), UpdateError> {
        self.insert_relative(sibling, key, 0)
    }

    pub fn insert_after(&mut self, sibling: NodeKey, key: NodeKey) -> Result<(), UpdateError> {
        self.insert_relative(sibling, key, 1)
    }

    fn insert_relative(
        &mut self,
        sibling: NodeKey,
        key: NodeKey,
        shift: usize,
    ) -> Result<(), UpdateError> {
        if sibling == key {
            return Ok(());
        }
        if let Some(old_parent) = self.state.tree.parent(key) {
            self.touch(old_parent);
        }
        self.state.tree.detach(key)?;
        let parent = self
            .state
            .tree
            .parent(sibling)
            .ok_or(TreeError::Detached(sibling))?;
        let index = self
            .state
            .tree
            .index_in_parent(sibling)
            .ok_or(TreeError::Detached(sibling))?;
        self.state.tree.insert_child(parent, key, index + shift)?;
        self.touch(parent);
        self.touch(key);
        Ok(())
    }

    pub fn remove_node(&mut self, key: NodeKey) -> Result<(), UpdateError> {
        if let Some(parent) = self.state.tree.remove(key)? {
            self.touch(parent);
        }
        self.tree_changed = true;
        Ok(())
    }

    pub fn replace_node(
        &mut self,
        key: NodeKey,
        replacement: NodeKey,
        include_children: bool,
    ) -> Result<(), UpdateError> {
        if include_children {
            let children = self.state.tree.children(key).to_vec();
            for child in children {
                self.append_child(replacement, child)?;
            }
        }
        self.insert_before(key, replacement)?;
        self.remove_node(key)
    }

    pub fn unwrap_node(&mut self, key: NodeKey) -> Result<Vec<NodeKey>, UpdateError> {
        let children = self.state.tree.children(key).to_vec();
        for child in &children {
            self.insert_before(key, *child)?;
        }
        self.remove_node(key)?;
        Ok(children)
    }

    /// Deep-copies the subtree at `key` into fresh, unattached nodes. Image
    /// captions are copied too, so the clone never shares an editor with the
    /// source.
    pub fn clone_node(&mut self, key: NodeKey) -> Result<NodeKey, UpdateError> {
        let node = self.node(key)?;
        let children = node.children().to_vec();
        let kind = match node.kind() {
            NodeKind::Image(img) => NodeKind::Image(img.duplicate()),
            other => other.clone(),
        };
        let copy = self.create_node(kind)?;
        for child in children {
            let child_copy = self.clone_node(child)?;
            self.append_child(copy, child_copy)?;
        }
        Ok(copy)
    }

    pub(crate) fn writable(&mut self, key: NodeKey) -> Result<&mut Node, UpdateError> {
        self.touch(key);
        self.state
            .tree
            .get_mut(key)
            .ok_or(UpdateError::Tree(TreeError::UnknownNode(key)))
    }

    pub fn writable_text(&mut self, key: NodeKey) -> Result<&mut TextData, UpdateError> {
        let found = self.node_type(key)?;
        self.writable(key)?
            .as_text_mut()
            .ok_or(UpdateError::UnexpectedNodeType {
                key,
                expected: NodeType::Text,
                found,
            })
    }

    pub fn set_collapsible_open(&mut self, key: NodeKey, open: bool) -> Result<(), UpdateError> {
        let node = self.expect_type(key, NodeType::CollapsibleContainer)?;
        if node.is_open() == Some(open) {
            return Ok(());
        }
        self.writable(key)?.set_open(open);
        Ok(())
    }

    pub fn expect_type(&self, key: NodeKey, expected: NodeType) -> Result<&Node, UpdateError> {
        let node = self.node(key)?;
        if node.node_type() != expected {
            return Err(UpdateError::UnexpectedNodeType {
                key,
                expected,
                found: node.node_type(),
            });
        }
        Ok(node)
    }

    pub fn mark_dirty(&mut self, key: NodeKey) {
        self.dirty.insert(key);
    }

    fn touch(&mut self, key: NodeKey) {
        self.dirty.insert(key);
        self.tree_changed = true;
    }

    pub(crate) fn remap_text_points(&mut self, from: NodeKey, to: NodeKey, shift: usize) {
        if let Some(Selection::Range { anchor, focus }) = &mut self.state.selection {
            for point in [anchor, focus] {
                if point.key == from && point.kind == PointType::Text {
                    point.key = to;
                    point.offset += shift;
                }
            }
        }
    }

    pub(crate) fn replace_state(&mut self, state: EditorState) {
        *self.state = state;
        self.mark_all_dirty();
        self.tree_changed = true;
    }

    pub(crate) fn mark_all_dirty(&mut self) {
        let keys: Vec<NodeKey> = self.state.tree.keys().collect();
        self.dirty.extend(keys);
    }

    pub(crate) fn take_dirty(&mut self) -> BTreeSet<NodeKey> {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn pending_dirty(&self) -> Vec<(NodeKey, NodeType)> {
        self.dirty
            .iter()
            .filter_map(|k| Some((*k, self.state.tree.node_type(*k)?)))
            .collect()
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            state: self.state.clone(),
            dirty: self.dirty.clone(),
            tree_changed: self.tree_changed,
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        *self.state = checkpoint.state;
        self.dirty = checkpoint.dirty;
        self.tree_changed = checkpoint.tree_changed;
    }
}
