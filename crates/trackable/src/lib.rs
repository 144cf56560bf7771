//! # Trackable
//!
//! Dependency-tracked object graphs with deferred checkpoint restoration.
//!
//! ## Overview
//!
//! Trackable provides:
//! - A `Trackable` capability trait for objects participating in a
//!   checkpoint dependency graph, with named dependencies and deferred
//!   ("restore when attached") restoration
//! - Trackable data structures that decide which contained values become
//!   graph dependencies and aggregate variable-like leaves
//! - A transparent dict wrapper that keeps a built-in-style mapping usable
//!   as an ordinary mapping while detecting mutations that would make a
//!   checkpoint inconsistent
//! - Object-graph export/restore passes and on-disk checkpoint management
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trackable::prelude::*;
//! use ndarray::ArrayD;
//!
//! let weights = Variable::new("weights", ArrayD::zeros(ndarray::IxDyn(&[4])), true);
//! let mut state = DictWrapper::default();
//! state.insert("weights", Value::Variable(weights))?;
//!
//! let root: TrackableRef = std::rc::Rc::new(std::cell::RefCell::new(state));
//! let graph = export_object_graph(&root, SaveType::Checkpoint)?;
//! ```

pub mod checkpoint;
pub mod graph;
pub mod structure;
pub mod wrap;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{
        export_object_graph, restore_by_name, CheckpointConfig, CheckpointManager,
        CheckpointRestore, NameBasedCheckpoint, ObjectGraph, RestoreUidSource, SaveType,
    };
    pub use crate::graph::{
        add_variable_with_initializer, same_trackable, track_dependency, Key, Leaf, TrackState,
        Trackable, TrackableRef, Value, Variable, VariableRef,
    };
    pub use crate::structure::{DataStructure, StructureState};
    pub use crate::wrap::{DictWrapper, Proxy};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error(
        "only trackable objects can be added as dependencies of a \
         trackable data structure; got {value}"
    )]
    Untrackable { value: String },

    #[error(
        "a dependency named '{name}' is already declared; \
         names must be unique unless overwrite is permitted"
    )]
    DuplicateDependencyName { name: String },

    #[error(
        "unable to save the dictionary wrapper {wrapper}: the wrapped \
         dictionary contains a non-string key which maps to a trackable \
         object or mutable data structure. If you don't need this dictionary \
         checkpointed, keep it outside the tracked object graph; it will be \
         subsequently ignored"
    )]
    NonStringKey { wrapper: String },

    #[error(
        "unable to save the dictionary wrapper: the wrapped dictionary was \
         modified outside the wrapper (its current value is {current}, its \
         value when a checkpoint dependency was added was {snapshot}), which \
         breaks restoration on object creation. If you don't need this \
         dictionary checkpointed, keep it outside the tracked object graph; \
         it will be subsequently ignored"
    )]
    ExternalModification { current: String, snapshot: String },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("restore error: {0}")]
    RestoreError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, TrackError>;
