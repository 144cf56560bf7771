//! Checkpointing: restore positions, object graphs, and file management.
//!
//! Provides:
//! - Collaborator contracts (`RestoreSource`, `NameBasedRestorer`) and the
//!   pending-instruction types queued on trackable nodes
//! - `ObjectGraph` export and `CheckpointRestore` passes over live graphs
//! - `CheckpointManager` for the on-disk checkpoint lifecycle

mod graph;
mod manager;
mod position;
mod restore;

pub use graph::{export_object_graph, ChildEdge, ObjectGraph, ObjectNode};
pub use manager::{CheckpointConfig, CheckpointManager};
pub use position::{
    CheckpointInitialValue, CheckpointPosition, NameBasedRestorer, RestoreSource, RestoreUidSource,
};
pub use restore::{restore_by_name, CheckpointRestore, NameBasedCheckpoint};

/// Save target discriminator.
///
/// Consulted only to decide whether function-like entries must additionally
/// be surfaced as children (export targets serialize traced functions;
/// plain checkpoints do not).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveType {
    Checkpoint,
    SavedModel,
}
