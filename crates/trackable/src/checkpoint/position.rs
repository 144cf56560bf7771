//! Restore positions and checkpoint collaborator contracts.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use ndarray::ArrayD;

use crate::graph::{Trackable, TrackableRef};
use crate::Result;

/// Explicit monotone generation counter ordering checkpoint restore passes.
///
/// Passed by reference to every restore call site rather than living as a
/// process-wide singleton, so independent restore sequences never interfere.
/// Ordering between restorations is decided entirely by comparing the ids it
/// hands out, never by call order.
#[derive(Debug, Default)]
pub struct RestoreUidSource {
    next: Cell<u64>,
}

impl RestoreUidSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next generation id.
    pub fn next_uid(&self) -> u64 {
        let uid = self.next.get() + 1;
        self.next.set(uid);
        uid
    }
}

/// Position-based source of checkpointed state.
///
/// Implemented by a restore pass over a saved object graph; `node_id`
/// addresses a node in the source's own graph.
pub trait RestoreSource {
    fn restore_uid(&self) -> u64;

    /// Whether the node holds a single leaf payload with no dependencies of
    /// its own.
    fn is_simple(&self, node_id: usize) -> bool;

    /// Ready-made initial value for a simple node.
    fn initial_value(&self, node_id: usize) -> Option<ArrayD<f32>>;

    /// Apply the node's state to `target` and descend into matching
    /// children.
    fn restore_node(self: Rc<Self>, node_id: usize, target: &TrackableRef) -> Result<()>;
}

/// Name-based source applying state to leaves by their registered names.
pub trait NameBasedRestorer {
    fn restore_uid(&self) -> u64;

    fn eager_restore(&self, node: &mut dyn Trackable) -> Result<()>;
}

/// A pending instruction: when a dependency of the holding name appears,
/// apply restoration from this source's generation.
#[derive(Clone)]
pub struct CheckpointPosition {
    source: Rc<dyn RestoreSource>,
    node_id: usize,
}

impl CheckpointPosition {
    pub fn new(source: Rc<dyn RestoreSource>, node_id: usize) -> Self {
        Self { source, node_id }
    }

    pub fn restore_uid(&self) -> u64 {
        self.source.restore_uid()
    }

    pub fn node_id(&self) -> usize {
        self.node_id
    }

    pub fn is_simple(&self) -> bool {
        self.source.is_simple(self.node_id)
    }

    /// Precomputed initial value, if this position is simple.
    pub fn initial_value(&self) -> Option<CheckpointInitialValue> {
        self.source
            .initial_value(self.node_id)
            .map(|value| CheckpointInitialValue {
                restore_uid: self.restore_uid(),
                value,
            })
    }

    /// Apply the queued restoration to `target`.
    pub fn restore(&self, target: &TrackableRef) -> Result<()> {
        self.source.clone().restore_node(self.node_id, target)
    }
}

impl fmt::Debug for CheckpointPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointPosition")
            .field("restore_uid", &self.restore_uid())
            .field("node_id", &self.node_id)
            .finish()
    }
}

/// A ready initial value claimed from the simple restoration fast path.
#[derive(Clone, Debug)]
pub struct CheckpointInitialValue {
    pub restore_uid: u64,
    pub value: ArrayD<f32>,
}
