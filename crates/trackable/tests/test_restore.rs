use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ndarray::{ArrayD, IxDyn};
use tempfile::tempdir;
use trackable::checkpoint::{
    export_object_graph, restore_by_name, CheckpointConfig, CheckpointManager, CheckpointRestore,
    NameBasedCheckpoint, NameBasedRestorer, RestoreUidSource, SaveType,
};
use trackable::graph::{
    add_variable_with_initializer, Trackable as _, TrackableRef, Value, Variable, VariableRef,
};
use trackable::wrap::DictWrapper;

fn filled(shape: &[usize], value: f32) -> ArrayD<f32> {
    ArrayD::from_elem(IxDyn(shape), value)
}

fn shared(wrapper: DictWrapper) -> (Rc<RefCell<DictWrapper>>, TrackableRef) {
    let concrete = Rc::new(RefCell::new(wrapper));
    let node: TrackableRef = concrete.clone();
    (concrete, node)
}

#[test]
fn test_export_restore_round_trip() {
    let weights = Variable::new("w", filled(&[2], 3.0), true);
    let mut state = DictWrapper::default();
    state
        .insert("w", Value::Variable(weights.clone()))
        .unwrap();
    let (_concrete, root) = shared(state);

    let graph = export_object_graph(&root, SaveType::Checkpoint).unwrap();

    // Drift the variable, then bring it back from the checkpoint.
    weights.borrow_mut().assign(filled(&[2], -1.0)).unwrap();

    let uids = RestoreUidSource::new();
    let checkpoint = CheckpointRestore::new(graph, &uids);
    checkpoint.restore(&root).unwrap();

    assert_eq!(*weights.borrow().value(), filled(&[2], 3.0));
}

#[test]
fn test_restore_through_nested_structures() {
    let kernel = Variable::new("kernel", filled(&[4], 0.5), true);
    let mut layer = DictWrapper::default();
    layer
        .insert("kernel", Value::Variable(kernel.clone()))
        .unwrap();
    let (_layer_rc, layer_node) = shared(layer);

    let mut model = DictWrapper::default();
    model.insert("layer", Value::Node(layer_node)).unwrap();
    let (_model_rc, root) = shared(model);

    let graph = export_object_graph(&root, SaveType::Checkpoint).unwrap();
    kernel.borrow_mut().assign(filled(&[4], 9.0)).unwrap();

    let uids = RestoreUidSource::new();
    CheckpointRestore::new(graph, &uids).restore(&root).unwrap();
    assert_eq!(*kernel.borrow().value(), filled(&[4], 0.5));
}

#[test]
fn test_missing_dependency_is_deferred_until_attached() {
    // Save a graph whose root has a "w" dependency.
    let weights = Variable::new("w", filled(&[2], 7.0), true);
    let mut state = DictWrapper::default();
    state.insert("w", Value::Variable(weights)).unwrap();
    let (_source_rc, source_root) = shared(state);
    let graph = export_object_graph(&source_root, SaveType::Checkpoint).unwrap();

    // Restore into a fresh graph that does not have "w" yet.
    let (fresh_rc, fresh_root) = shared(DictWrapper::default());
    let uids = RestoreUidSource::new();
    let checkpoint = CheckpointRestore::new(graph, &uids);
    checkpoint.restore(&fresh_root).unwrap();
    assert!(fresh_rc.borrow().track_state().has_deferred("w"));

    // Attaching the dependency replays the queued restoration.
    let late = Variable::new("w", filled(&[2], 0.0), true);
    fresh_rc
        .borrow_mut()
        .insert("w", Value::Variable(late.clone()))
        .unwrap();

    assert_eq!(*late.borrow().value(), filled(&[2], 7.0));
    assert!(!fresh_rc.borrow().track_state().has_deferred("w"));
}

#[test]
fn test_newer_generation_wins_over_older() {
    let make_graph = |value: f32| {
        let weights = Variable::new("w", filled(&[1], value), true);
        let mut state = DictWrapper::default();
        state.insert("w", Value::Variable(weights)).unwrap();
        let (_rc, root) = shared(state);
        export_object_graph(&root, SaveType::Checkpoint).unwrap()
    };
    let older_graph = make_graph(5.0);
    let newer_graph = make_graph(9.0);

    let uids = RestoreUidSource::new();
    let older = CheckpointRestore::new(older_graph, &uids);
    let newer = CheckpointRestore::new(newer_graph, &uids);

    // Both passes run against a root that lacks "w"; both queue positions.
    let (fresh_rc, fresh_root) = shared(DictWrapper::default());
    older.restore(&fresh_root).unwrap();
    newer.restore(&fresh_root).unwrap();

    let late = Variable::new("w", filled(&[1], 0.0), true);
    fresh_rc
        .borrow_mut()
        .insert("w", Value::Variable(late.clone()))
        .unwrap();

    // The newer checkpoint's state is authoritative; the older replay must
    // not clobber it.
    assert_eq!(*late.borrow().value(), filled(&[1], 9.0));
}

#[test]
fn test_restore_on_create_prefers_newer_checkpoint_value() {
    let weights = Variable::new("w", filled(&[3], 2.5), true);
    let mut state = DictWrapper::default();
    state.insert("w", Value::Variable(weights)).unwrap();
    let (_rc, source_root) = shared(state);
    let graph = export_object_graph(&source_root, SaveType::Checkpoint).unwrap();

    let (fresh_rc, fresh_root) = shared(DictWrapper::default());
    let uids = RestoreUidSource::new();
    CheckpointRestore::new(graph, &uids)
        .restore(&fresh_root)
        .unwrap();

    // The queued simple restoration beats the plain initializer.
    let created: VariableRef = {
        let mut owner = fresh_rc.borrow_mut();
        add_variable_with_initializer(&mut *owner, "w", filled(&[3], 0.0), true).unwrap()
    };
    assert_eq!(*created.borrow().value(), filled(&[3], 2.5));
}

#[test]
fn test_restore_is_idempotent_per_generation() {
    let weights = Variable::new("w", filled(&[1], 1.0), true);
    let mut state = DictWrapper::default();
    state
        .insert("w", Value::Variable(weights.clone()))
        .unwrap();
    let (_rc, root) = shared(state);
    let graph = export_object_graph(&root, SaveType::Checkpoint).unwrap();

    let uids = RestoreUidSource::new();
    let checkpoint = CheckpointRestore::new(graph, &uids);
    checkpoint.clone().restore(&root).unwrap();

    // State touched after the pass is not re-restored by replaying the same
    // generation.
    weights.borrow_mut().assign(filled(&[1], 8.0)).unwrap();
    checkpoint.restore(&root).unwrap();
    assert_eq!(*weights.borrow().value(), filled(&[1], 8.0));
}

#[test]
fn test_name_based_restore_reaches_late_attachments() {
    let (rc, root) = shared(DictWrapper::default());

    let uids = RestoreUidSource::new();
    let mut values = HashMap::new();
    values.insert("late".to_string(), filled(&[2], 5.0));
    let restorer: Rc<dyn NameBasedRestorer> = NameBasedCheckpoint::new(values, &uids);
    restore_by_name(&root, &restorer).unwrap();

    // The restorer was registered on the root; a dependency attached later
    // is restored the moment it appears.
    let late = Variable::new("late", filled(&[2], 0.0), true);
    rc.borrow_mut()
        .insert("late", Value::Variable(late.clone()))
        .unwrap();

    assert_eq!(*late.borrow().value(), filled(&[2], 5.0));
}

#[test]
fn test_manager_round_trip_through_disk() {
    let weights = Variable::new("w", filled(&[2], 4.0), true);
    let mut state = DictWrapper::default();
    state.insert("w", Value::Variable(weights)).unwrap();
    let (_rc, root) = shared(state);
    let graph = export_object_graph(&root, SaveType::Checkpoint).unwrap();

    let dir = tempdir().unwrap();
    let mut manager = CheckpointManager::new(CheckpointConfig::new(dir.path()));
    manager.save(&graph).unwrap();

    let loaded = manager.load_latest().unwrap().expect("checkpoint on disk");

    // Restore the loaded graph into a brand-new object graph.
    let restored = Variable::new("w", filled(&[2], 0.0), true);
    let mut target = DictWrapper::default();
    target
        .insert("w", Value::Variable(restored.clone()))
        .unwrap();
    let (_target_rc, target_root) = shared(target);

    let uids = RestoreUidSource::new();
    CheckpointRestore::new(loaded, &uids)
        .restore(&target_root)
        .unwrap();
    assert_eq!(*restored.borrow().value(), filled(&[2], 4.0));
}

#[test]
fn test_dirty_wrapper_refuses_export() {
    let mut state = DictWrapper::default();
    state
        .insert("a", Value::Variable(Variable::new("a", filled(&[1], 1.0), true)))
        .unwrap();
    state.backing_mut().shift_remove(&trackable::graph::Key::from("a"));
    let (_rc, root) = shared(state);

    assert!(export_object_graph(&root, SaveType::Checkpoint).is_err());
}
