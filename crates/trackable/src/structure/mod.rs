//! Trackable data structures: tracked collections with leaf aggregation.

mod sticky;

pub use sticky::{sticky_attribute_assignment, wrap_or_unwrap};

use crate::graph::sentinel::{self, SentinelRef};
use crate::graph::{AttributeSentinel, Trackable, Value, VariableRef};
use crate::{Result, TrackError};

/// Bookkeeping shared by all trackable data structures.
pub struct StructureState {
    trainable: bool,
    /// Variable-like leaves handed to `track_value`, in declaration order.
    extra_variables: Vec<VariableRef>,
    sentinel: SentinelRef,
}

impl Default for StructureState {
    fn default() -> Self {
        Self {
            trainable: true,
            extra_variables: Vec::new(),
            sentinel: AttributeSentinel::new_ref(),
        }
    }
}

impl StructureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    pub fn sentinel(&self) -> &SentinelRef {
        &self.sentinel
    }

    pub fn extra_variables(&self) -> &[VariableRef] {
        &self.extra_variables
    }
}

/// A trackable that manages a collection of values.
///
/// The structure decides which contained values become tracked dependencies
/// and aggregates variable-like leaves recursively through contained
/// trackables.
pub trait DataStructure: Trackable {
    fn structure_state(&self) -> &StructureState;

    fn structure_state_mut(&mut self) -> &mut StructureState;

    /// Contained values in aggregation order.
    fn values(&self) -> Vec<Value>;

    fn trainable(&self) -> bool {
        self.structure_state().trainable
    }

    /// Toggle trainability and cascade the change to owners.
    fn set_trainable(&mut self, trainable: bool) {
        self.structure_state_mut().trainable = trainable;
        sentinel::invalidate_all(self.structure_state().sentinel());
    }

    /// Route `value` into the dependency graph under `name`.
    ///
    /// Plain mappings are adopted via sticky assignment, variable-like
    /// leaves are collected for aggregation, and the final value must be
    /// trackable. The child's sentinel (if any) gains this structure as a
    /// parent so ownership changes cascade.
    fn track_value(&mut self, value: Value, name: &str) -> Result<Value>
    where
        Self: Sized,
    {
        let value = sticky_attribute_assignment(self, name, value)?;
        if let Value::Variable(variable) = &value {
            self.structure_state_mut()
                .extra_variables
                .push(variable.clone());
        }
        let Some(tracked) = value.as_trackable() else {
            return Err(TrackError::Untrackable {
                value: value.describe(),
            });
        };
        if let Some(child_sentinel) = tracked.borrow().attribute_sentinel() {
            sentinel::add_parent(&child_sentinel, self.structure_state().sentinel());
        }
        Ok(value)
    }
}

/// Variable leaves of `structure` declared trainable: nested trackables'
/// trainable leaves in declaration order, then this structure's own
/// trainable extras. Empty when the structure itself is non-trainable.
pub fn trainable_variables(structure: &dyn DataStructure) -> Vec<VariableRef> {
    if !structure.structure_state().trainable {
        return Vec::new();
    }
    let mut collected = nested(structure, |node| node.trainable_variables());
    collected.extend(
        structure
            .structure_state()
            .extra_variables
            .iter()
            .filter(|variable| variable.borrow().trainable())
            .cloned(),
    );
    collected
}

/// Non-trainable variable leaves of `structure`.
///
/// When the structure itself is non-trainable, every leaf is forced into
/// this partition: nested trainable leaves first, then trainable extras,
/// then nested non-trainable leaves, then non-trainable extras, preserving
/// relative order within each group.
pub fn non_trainable_variables(structure: &dyn DataStructure) -> Vec<VariableRef> {
    let state = structure.structure_state();
    let trainable_extras: Vec<VariableRef> = state
        .extra_variables
        .iter()
        .filter(|variable| variable.borrow().trainable())
        .cloned()
        .collect();
    let non_trainable_extras: Vec<VariableRef> = state
        .extra_variables
        .iter()
        .filter(|variable| !variable.borrow().trainable())
        .cloned()
        .collect();
    let nested_non_trainable = nested(structure, |node| node.non_trainable_variables());

    if state.trainable {
        let mut collected = nested_non_trainable;
        collected.extend(non_trainable_extras);
        collected
    } else {
        let mut collected = nested(structure, |node| node.trainable_variables());
        collected.extend(trainable_extras);
        collected.extend(nested_non_trainable);
        collected.extend(non_trainable_extras);
        collected
    }
}

/// All variable leaves: trainable first, then non-trainable.
pub fn variables(structure: &dyn DataStructure) -> Vec<VariableRef> {
    let mut collected = trainable_variables(structure);
    collected.extend(non_trainable_variables(structure));
    collected
}

/// Walk contained trackable nodes (not variable leaves, which are collected
/// through the extras bookkeeping) and concatenate what `f` yields.
fn nested(
    structure: &dyn DataStructure,
    f: impl Fn(&dyn Trackable) -> Vec<VariableRef>,
) -> Vec<VariableRef> {
    let mut collected = Vec::new();
    for value in structure.values() {
        if let Value::Node(node) = &value {
            collected.extend(f(&*node.borrow()));
        }
    }
    collected
}
