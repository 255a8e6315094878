use thiserror::Error;

use crate::key::NodeKey;
use crate::node::NodeType;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("unknown node {0}")]
    UnknownNode(NodeKey),

    #[error("node {0} cannot hold children")]
    NotAnElement(NodeKey),

    #[error("insert index {index} is out of bounds for node {parent} with {len} children")]
    IndexOutOfBounds {
        parent: NodeKey,
        index: usize,
        len: usize,
    },

    #[error("inserting node {key} under {parent} would create a cycle")]
    Cycle { parent: NodeKey, key: NodeKey },

    #[error("node {0} has no parent")]
    Detached(NodeKey),

    #[error("the root node cannot be removed or moved")]
    Root,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node type `{0}` is not registered with this editor")]
    UnregisteredNodeType(NodeType),

    #[error("expected a root node at the top level, found `{0}`")]
    MissingRoot(NodeType),

    #[error("a root node may only appear at the top level")]
    NestedRoot,

    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("node {key} is a `{found}` node, expected `{expected}`")]
    UnexpectedNodeType {
        key: NodeKey,
        expected: NodeType,
        found: NodeType,
    },

    #[error("node type `{0}` is not registered with this editor")]
    UnregisteredNodeType(NodeType),

    #[error("transforms did not settle after {iterations} iterations (still dirty: {pending:?})")]
    TransformDiverged {
        iterations: usize,
        pending: Vec<(NodeKey, NodeType)>,
    },

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("duplicate plugin id: {0}")]
    DuplicatePlugin(&'static str),

    #[error("node type `{0}` is registered by more than one plugin")]
    DuplicateNodeType(NodeType),
}
