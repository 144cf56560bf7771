//! Trackable node base: ordered dependencies and deferred restoration.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::checkpoint::{CheckpointInitialValue, CheckpointPosition, NameBasedRestorer, SaveType};
use crate::graph::sentinel::SentinelRef;
use crate::graph::value::Value;
use crate::graph::variable::VariableRef;
use crate::{Result, TrackError};

/// Shared handle to a node in the dependency graph.
///
/// The graph is single-threaded and cooperatively shared; identity is
/// `Rc::ptr_eq` (see [`same_trackable`]).
pub type TrackableRef = Rc<RefCell<dyn Trackable>>;

/// A named, owned reference from one trackable to another.
#[derive(Clone)]
pub struct TrackableReference {
    pub name: String,
    pub node: TrackableRef,
}

/// Per-node dependency and restoration bookkeeping.
#[derive(Default)]
pub struct TrackState {
    /// Last restore generation applied to this node.
    update_uid: Option<u64>,
    /// Unconditional dependencies in declaration order. Names are unique.
    dependencies: Vec<TrackableReference>,
    /// Restorations queued for dependencies that are not attached yet.
    deferred: HashMap<String, SmallVec<[CheckpointPosition; 2]>>,
    /// Pending name-based restorations, replayed onto newly attached
    /// dependencies.
    name_based_restores: Vec<Rc<dyn NameBasedRestorer>>,
}

impl TrackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last restore generation applied, if any.
    pub fn update_uid(&self) -> Option<u64> {
        self.update_uid
    }

    pub(crate) fn set_update_uid(&mut self, uid: u64) {
        self.update_uid = Some(uid);
    }

    /// Unconditional dependencies in declaration order.
    pub fn dependencies(&self) -> &[TrackableReference] {
        &self.dependencies
    }

    /// Look up a declared dependency by name.
    pub fn lookup_dependency(&self, name: &str) -> Option<TrackableRef> {
        self.dependencies
            .iter()
            .find(|reference| reference.name == name)
            .map(|reference| reference.node.clone())
    }

    /// Queue a restoration for a dependency that is not attached yet.
    pub fn defer_restoration(&mut self, name: impl Into<String>, position: CheckpointPosition) {
        self.deferred.entry(name.into()).or_default().push(position);
    }

    /// Whether restorations are queued under `name`.
    pub fn has_deferred(&self, name: &str) -> bool {
        self.deferred.get(name).is_some_and(|queued| !queued.is_empty())
    }

    /// Ready-made initial value for `name`, only when *every* queued
    /// restoration is simple (a single leaf payload, no nested
    /// dependencies). The highest generation wins. Any complex pending
    /// restoration disqualifies the fast path so it cannot be dropped
    /// silently; the caller then falls back to full graph restoration.
    pub fn preload_simple_restoration(&self, name: &str) -> Option<CheckpointInitialValue> {
        let queued = self.deferred.get(name)?;
        if queued.is_empty() || queued.iter().any(|position| !position.is_simple()) {
            return None;
        }
        queued
            .iter()
            .max_by_key(|position| position.restore_uid())?
            .initial_value()
    }
}

/// Capability set for objects participating in the checkpoint dependency
/// graph.
pub trait Trackable {
    /// Dependency and restoration bookkeeping for this node.
    fn track_state(&self) -> &TrackState;

    fn track_state_mut(&mut self) -> &mut TrackState;

    /// Children to serialize, as `(name, value)` pairs in declaration order.
    ///
    /// The default lists the unconditional dependencies. Structures may add
    /// entries (function leaves on export) or refuse entirely (a dirty dict
    /// wrapper).
    fn trackable_children(&self, save_type: SaveType) -> Result<Vec<(String, Value)>> {
        let _ = save_type;
        Ok(self
            .track_state()
            .dependencies()
            .iter()
            .map(|reference| (reference.name.clone(), Value::Node(reference.node.clone())))
            .collect())
    }

    /// Extra leaf state carried by this node, if any.
    fn serialize_payload(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore leaf state from a checkpoint payload.
    fn restore_payload(&mut self, payload: &serde_json::Value) -> Result<()> {
        let _ = payload;
        Ok(())
    }

    /// Registered name for name-based restoration, if this node is a named
    /// leaf.
    fn leaf_name(&self) -> Option<String> {
        None
    }

    /// Mutation sentinel shared with owners, if this node participates in
    /// cascading ownership updates.
    fn attribute_sentinel(&self) -> Option<SentinelRef> {
        None
    }

    /// Variable-like leaves declared trainable, in declaration order.
    fn trainable_variables(&self) -> Vec<VariableRef> {
        Vec::new()
    }

    /// Variable-like leaves declared non-trainable (or demoted), in
    /// declaration order.
    fn non_trainable_variables(&self) -> Vec<VariableRef> {
        Vec::new()
    }
}

/// Object identity for graph nodes.
pub fn same_trackable(a: &TrackableRef, b: &TrackableRef) -> bool {
    Rc::ptr_eq(a, b)
}

/// Declare `node` as a dependency of `owner` under `name`.
///
/// Names are unique per owner: redeclaring a name held by a different object
/// fails unless `overwrite` is set, in which case the reference is replaced
/// at its original position in the declaration order. First-time declaration
/// replays any deferred restorations queued for `name`.
pub fn track_dependency(
    owner: &mut dyn Trackable,
    name: &str,
    node: &TrackableRef,
    overwrite: bool,
) -> Result<()> {
    match owner.track_state().lookup_dependency(name) {
        Some(existing) if !same_trackable(&existing, node) => {
            if !overwrite {
                return Err(TrackError::DuplicateDependencyName {
                    name: name.to_string(),
                });
            }
            for reference in &mut owner.track_state_mut().dependencies {
                if reference.name == name {
                    reference.node = node.clone();
                }
            }
            tracing::debug!(name, "replaced dependency");
        }
        Some(_) => {
            // Same object under the same name; nothing to do.
        }
        None => {
            owner.track_state_mut().dependencies.push(TrackableReference {
                name: name.to_string(),
                node: node.clone(),
            });
            tracing::debug!(name, "declared dependency");
            handle_deferred_dependencies(owner, name, node)?;
        }
    }
    Ok(())
}

/// Replay restorations that were waiting for a dependency named `name`.
///
/// Queued positions are applied newest generation first: a later
/// checkpoint's instructions are authoritative, and older generations are
/// rejected by the target's update marker rather than clobbering the newer
/// state. Pending name-based restorations follow in the same order.
/// Consumed positions are removed and never reapplied.
pub fn handle_deferred_dependencies(
    owner: &mut dyn Trackable,
    name: &str,
    node: &TrackableRef,
) -> Result<()> {
    let mut queued: Vec<CheckpointPosition> = owner
        .track_state_mut()
        .deferred
        .remove(name)
        .map(SmallVec::into_vec)
        .unwrap_or_default();
    queued.sort_by(|a, b| b.restore_uid().cmp(&a.restore_uid()));
    for position in &queued {
        position.restore(node)?;
    }

    let mut restorers = owner.track_state().name_based_restores.clone();
    restorers.sort_by(|a, b| b.restore_uid().cmp(&a.restore_uid()));
    for restorer in &restorers {
        let mut target = node.borrow_mut();
        name_based_attribute_restore(&mut *target, restorer)?;
    }
    Ok(())
}

/// Eager attribute restore: record `restorer` on `node` and, if the node has
/// not yet been brought up to the restorer's generation, apply it
/// immediately and advance the update marker. Applying the same or an older
/// generation twice is a no-op.
pub fn name_based_attribute_restore(
    node: &mut dyn Trackable,
    restorer: &Rc<dyn NameBasedRestorer>,
) -> Result<()> {
    let known = node
        .track_state()
        .name_based_restores
        .iter()
        .any(|existing| Rc::ptr_eq(existing, restorer));
    if !known {
        node.track_state_mut().name_based_restores.push(restorer.clone());
    }
    let uid = restorer.restore_uid();
    if node.track_state().update_uid.is_none_or(|seen| seen < uid) {
        restorer.eager_restore(node)?;
        node.track_state_mut().update_uid = Some(uid);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::RestoreSource;
    use ndarray::ArrayD;

    struct TestNode {
        track: TrackState,
    }

    impl TestNode {
        fn new() -> Self {
            Self {
                track: TrackState::new(),
            }
        }
    }

    impl Trackable for TestNode {
        fn track_state(&self) -> &TrackState {
            &self.track
        }

        fn track_state_mut(&mut self) -> &mut TrackState {
            &mut self.track
        }
    }

    fn leaf() -> TrackableRef {
        Rc::new(RefCell::new(TestNode::new()))
    }

    /// Records the generations in the order they were applied.
    struct ScriptedSource {
        uid: u64,
        simple: bool,
        value: Option<ArrayD<f32>>,
        log: Rc<RefCell<Vec<u64>>>,
    }

    impl RestoreSource for ScriptedSource {
        fn restore_uid(&self) -> u64 {
            self.uid
        }

        fn is_simple(&self, _node_id: usize) -> bool {
            self.simple
        }

        fn initial_value(&self, _node_id: usize) -> Option<ArrayD<f32>> {
            self.value.clone()
        }

        fn restore_node(self: Rc<Self>, _node_id: usize, _target: &TrackableRef) -> Result<()> {
            self.log.borrow_mut().push(self.uid);
            Ok(())
        }
    }

    fn scripted(
        uid: u64,
        simple: bool,
        value: Option<ArrayD<f32>>,
        log: &Rc<RefCell<Vec<u64>>>,
    ) -> CheckpointPosition {
        let source: Rc<dyn RestoreSource> = Rc::new(ScriptedSource {
            uid,
            simple,
            value,
            log: log.clone(),
        });
        CheckpointPosition::new(source, 0)
    }

    #[test]
    fn test_duplicate_name_without_overwrite_fails() {
        let mut owner = TestNode::new();
        let first = leaf();
        let second = leaf();

        track_dependency(&mut owner, "child", &first, false).unwrap();
        let err = track_dependency(&mut owner, "child", &second, false).unwrap_err();
        assert!(matches!(
            err,
            TrackError::DuplicateDependencyName { ref name } if name == "child"
        ));
    }

    #[test]
    fn test_redeclaring_same_object_is_a_no_op() {
        let mut owner = TestNode::new();
        let node = leaf();

        track_dependency(&mut owner, "child", &node, false).unwrap();
        track_dependency(&mut owner, "child", &node, false).unwrap();
        assert_eq!(owner.track_state().dependencies().len(), 1);
    }

    #[test]
    fn test_overwrite_replaces_in_place() {
        let mut owner = TestNode::new();
        let first = leaf();
        let second = leaf();
        let replacement = leaf();

        track_dependency(&mut owner, "a", &first, false).unwrap();
        track_dependency(&mut owner, "b", &second, false).unwrap();
        track_dependency(&mut owner, "a", &replacement, true).unwrap();

        let deps = owner.track_state().dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "a");
        assert!(same_trackable(&deps[0].node, &replacement));
        assert_eq!(deps[1].name, "b");
    }

    #[test]
    fn test_deferred_replay_applies_newest_generation_first() {
        let mut owner = TestNode::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        owner
            .track_state_mut()
            .defer_restoration("child", scripted(5, false, None, &log));
        owner
            .track_state_mut()
            .defer_restoration("child", scripted(9, false, None, &log));

        let node = leaf();
        track_dependency(&mut owner, "child", &node, false).unwrap();

        assert_eq!(*log.borrow(), vec![9, 5]);
        // Consumed positions are not replayed again.
        assert!(!owner.track_state().has_deferred("child"));
    }

    #[test]
    fn test_preload_requires_every_position_to_be_simple() {
        let mut owner = TestNode::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let value = ArrayD::from_elem(ndarray::IxDyn(&[1]), 1.0f32);
        owner
            .track_state_mut()
            .defer_restoration("w", scripted(3, true, Some(value.clone()), &log));
        owner
            .track_state_mut()
            .defer_restoration("w", scripted(4, false, None, &log));

        assert!(owner.track_state().preload_simple_restoration("w").is_none());
    }

    #[test]
    fn test_preload_picks_highest_generation() {
        let mut owner = TestNode::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let old = ArrayD::from_elem(ndarray::IxDyn(&[1]), 1.0f32);
        let new = ArrayD::from_elem(ndarray::IxDyn(&[1]), 2.0f32);
        owner
            .track_state_mut()
            .defer_restoration("w", scripted(3, true, Some(old), &log));
        owner
            .track_state_mut()
            .defer_restoration("w", scripted(7, true, Some(new.clone()), &log));

        let preloaded = owner
            .track_state()
            .preload_simple_restoration("w")
            .expect("both positions are simple");
        assert_eq!(preloaded.restore_uid, 7);
        assert_eq!(preloaded.value, new);
    }
}
