use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;

use crate::core::UpdateContext;
use crate::error::UpdateError;
use crate::key::NodeKey;
use crate::node::NodeType;

pub type TransformFn =
    Arc<dyn Fn(&mut UpdateContext<'_>, NodeKey) -> Result<(), UpdateError> + Send + Sync>;

#[derive(Default, Clone)]
pub struct TransformRegistry {
    by_type: HashMap<NodeType, Vec<TransformFn>>,
}

impl TransformRegistry {
    pub fn register(&mut self, node_type: NodeType, transform: TransformFn) {
        self.by_type.entry(node_type).or_default().push(transform);
    }

    pub fn for_type(&self, node_type: NodeType) -> &[TransformFn] {
        self.by_type
            .get(&node_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Drains the dirty set until it stays empty. Returns the number of
    /// passes it took.
    pub(crate) fn run_to_fixed_point(
        &self,
        cx: &mut UpdateContext<'_>,
        max_iterations: usize,
    ) -> Result<usize, UpdateError> {
        for iteration in 0..max_iterations {
            let dirty = cx.take_dirty();
            if dirty.is_empty() {
                return Ok(iteration);
            }
            for key in dirty {
                let Some(node_type) = cx.tree().node_type(key) else {
                    continue;
                };
                if !cx.tree().is_attached(key) {
                    continue;
                }
                for transform in self.for_type(node_type) {
                    // An earlier transform may have removed or replaced the node.
                    if cx.tree().node_type(key) != Some(node_type) {
                        break;
                    }
                    transform(cx, key)?;
                }
            }
        }

        let pending = cx.pending_dirty();
        if pending.is_empty() {
            return Ok(max_iterations);
        }
        error!(
            iterations = max_iterations,
            pending = ?pending,
            "transforms did not converge; aborting transaction"
        );
        Err(UpdateError::TransformDiverged {
            iterations: max_iterations,
            pending,
        })
    }
}
