use std::collections::{HashMap, HashSet};

use crate::error::TreeError;
use crate::key::NodeKey;
use crate::node::{Node, NodeKind, NodeType};

/// Arena of nodes addressed by [`NodeKey`].
///
/// Parent and child links are stored as keys inside the arena; a node is
/// owned by the tree and belongs to at most one child list. Nodes created
/// but never attached under the root are dropped when the transaction that
/// created them commits.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: HashMap<NodeKey, Node>,
    root: NodeKey,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let root = NodeKey::next();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                key: root,
                parent: None,
                kind: NodeKind::root(),
            },
        );
        Self { nodes, root }
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    pub fn get(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(&key)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children(self.root).is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node_type(&self, key: NodeKey) -> Option<NodeType> {
        self.get(key).map(Node::node_type)
    }

    pub fn kind(&self, key: NodeKey) -> Option<&NodeKind> {
        self.get(key).map(Node::kind)
    }

    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.get(key).map(Node::children).unwrap_or(&[])
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.get(key).and_then(Node::parent)
    }

    pub fn index_in_parent(&self, key: NodeKey) -> Option<usize> {
        let parent = self.parent(key)?;
        self.children(parent).iter().position(|k| *k == key)
    }

    pub fn previous_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let parent = self.parent(key)?;
        let ix = self.index_in_parent(key)?;
        ix.checked_sub(1)
            .and_then(|ix| self.children(parent).get(ix).copied())
    }

    pub fn next_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let parent = self.parent(key)?;
        let ix = self.index_in_parent(key)?;
        self.children(parent).get(ix + 1).copied()
    }

    pub fn first_child(&self, key: NodeKey) -> Option<NodeKey> {
        self.children(key).first().copied()
    }

    pub fn last_child(&self, key: NodeKey) -> Option<NodeKey> {
        self.children(key).last().copied()
    }

    pub fn is_ancestor(&self, ancestor: NodeKey, key: NodeKey) -> bool {
        let mut current = self.parent(key);
        while let Some(k) = current {
            if k == ancestor {
                return true;
            }
            current = self.parent(k);
        }
        false
    }

    pub fn is_attached(&self, key: NodeKey) -> bool {
        key == self.root || self.is_ancestor(self.root, key)
    }

    pub fn nearest_of_type(&self, key: NodeKey, node_type: NodeType) -> Option<NodeKey> {
        self.find_ancestor_or_self(key, |node| node.node_type() == node_type)
    }

    pub fn find_ancestor_or_self(
        &self,
        key: NodeKey,
        predicate: impl Fn(&Node) -> bool,
    ) -> Option<NodeKey> {
        let mut current = Some(key);
        while let Some(k) = current {
            let node = self.get(k)?;
            if predicate(node) {
                return Some(k);
            }
            current = node.parent;
        }
        None
    }

    pub fn path_to(&self, key: NodeKey) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = key;
        while current != self.root {
            path.push(self.index_in_parent(current)?);
            current = self.parent(current)?;
        }
        path.reverse();
        Some(path)
    }

    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeKey> = self.children(key).iter().rev().copied().collect();
        while let Some(k) = stack.pop() {
            out.push(k);
            stack.extend(self.children(k).iter().rev().copied());
        }
        out
    }

    pub fn text_content(&self, key: NodeKey) -> String {
        let Some(node) = self.get(key) else {
            return String::new();
        };
        match node.kind() {
            NodeKind::Text(t) => t.text.clone(),
            NodeKind::LineBreak => "\n".to_string(),
            NodeKind::Equation(eq) => eq.text_content().to_string(),
            NodeKind::Image(_) => String::new(),
            _ => {
                let children = node.children();
                let mut out = String::new();
                for (ix, child) in children.iter().enumerate() {
                    out.push_str(&self.text_content(*child));
                    let is_block_element = self
                        .kind(*child)
                        .is_some_and(|k| k.is_element() && !k.is_inline());
                    if is_block_element && ix + 1 < children.len() {
                        out.push_str("\n\n");
                    }
                }
                out
            }
        }
    }

    pub(crate) fn get_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(&key)
    }

    pub(crate) fn insert_node(&mut self, mut kind: NodeKind) -> NodeKey {
        kind.take_children();
        let key = NodeKey::next();
        self.nodes.insert(
            key,
            Node {
                key,
                parent: None,
                kind,
            },
        );
        key
    }

    /// Moves `key` under `parent` at `index`, detaching it from its previous
    /// parent first. Returns the previous parent.
    pub(crate) fn insert_child(
        &mut self,
        parent: NodeKey,
        key: NodeKey,
        index: usize,
    ) -> Result<Option<NodeKey>, TreeError> {
        if key == self.root {
            return Err(TreeError::Root);
        }
        if !self.contains(key) {
            return Err(TreeError::UnknownNode(key));
        }
        let parent_node = self.get(parent).ok_or(TreeError::UnknownNode(parent))?;
        if !parent_node.kind().is_element() {
            return Err(TreeError::NotAnElement(parent));
        }
        if parent == key || self.is_ancestor(key, parent) {
            return Err(TreeError::Cycle { parent, key });
        }

        let previous = self.detach(key)?;
        let children = self
            .get_mut(parent)
            .and_then(|node| node.kind.element_mut())
            .map(|el| &mut el.children)
            .ok_or(TreeError::NotAnElement(parent))?;
        if index > children.len() {
            let len = children.len();
            // Undo the detach so a failed insert leaves the tree untouched.
            if let Some((old_parent, old_index)) = previous {
                self.reattach(old_parent, key, old_index);
            }
            return Err(TreeError::IndexOutOfBounds { parent, index, len });
        }
        children.insert(index, key);
        if let Some(node) = self.get_mut(key) {
            node.parent = Some(parent);
        }
        Ok(previous.map(|(p, _)| p))
    }

    fn reattach(&mut self, parent: NodeKey, key: NodeKey, index: usize) {
        if let Some(children) = self
            .get_mut(parent)
            .and_then(|node| node.kind.element_mut())
            .map(|el| &mut el.children)
        {
            let index = index.min(children.len());
            children.insert(index, key);
        }
        if let Some(node) = self.get_mut(key) {
            node.parent = Some(parent);
        }
    }

    pub(crate) fn detach(&mut self, key: NodeKey) -> Result<Option<(NodeKey, usize)>, TreeError> {
        let node = self.get(key).ok_or(TreeError::UnknownNode(key))?;
        let Some(parent) = node.parent else {
            return Ok(None);
        };
        let mut removed_at = None;
        if let Some(children) = self
            .get_mut(parent)
            .and_then(|node| node.kind.element_mut())
            .map(|el| &mut el.children)
        {
            if let Some(ix) = children.iter().position(|k| *k == key) {
                children.remove(ix);
                removed_at = Some(ix);
            }
        }
        if let Some(node) = self.get_mut(key) {
            node.parent = None;
        }
        Ok(removed_at.map(|ix| (parent, ix)))
    }

    pub(crate) fn remove(&mut self, key: NodeKey) -> Result<Option<NodeKey>, TreeError> {
        if key == self.root {
            return Err(TreeError::Root);
        }
        let previous = self.detach(key)?;
        let mut doomed = self.descendants(key);
        doomed.push(key);
        for k in doomed {
            self.nodes.remove(&k);
        }
        Ok(previous.map(|(p, _)| p))
    }

    pub(crate) fn collect_garbage(&mut self) -> usize {
        let mut reachable: HashSet<NodeKey> = self.descendants(self.root).into_iter().collect();
        reachable.insert(self.root);
        let before = self.nodes.len();
        self.nodes.retain(|k, _| reachable.contains(k));
        before - self.nodes.len()
    }
}
