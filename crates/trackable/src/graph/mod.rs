//! Trackable node core: the dependency graph base unit.
//!
//! A trackable owns named references to other trackables, records pending
//! ("deferred") restorations for dependencies that are not attached yet, and
//! replays them the moment a matching name is declared.

mod node;
pub mod sentinel;
mod value;
mod variable;

pub use node::{
    handle_deferred_dependencies, name_based_attribute_restore, same_trackable, track_dependency,
    TrackState, Trackable, TrackableRef, TrackableReference,
};
pub use sentinel::{AttributeSentinel, SentinelRef};
pub use value::{Key, Leaf, Value};
pub use variable::{add_variable_with_initializer, Variable, VariableRef};

pub(crate) use value::format_map;
pub(crate) use variable::VariablePayload;
