//! Restore passes over saved object graphs.

use std::collections::HashMap;
use std::rc::Rc;

use ndarray::ArrayD;

use super::graph::ObjectGraph;
use super::position::{CheckpointPosition, NameBasedRestorer, RestoreSource, RestoreUidSource};
use crate::graph::{name_based_attribute_restore, Trackable, TrackableRef, VariablePayload};
use crate::{Result, TrackError};

/// A position-based restore pass over a saved object graph.
///
/// Dependencies present on the live graph are restored immediately; missing
/// ones get a queued [`CheckpointPosition`] that is replayed when a matching
/// name is attached. Applying a generation at or below a node's update
/// marker is a no-op, which makes replay idempotent per generation and keeps
/// a newer checkpoint authoritative over an older one.
pub struct CheckpointRestore {
    graph: ObjectGraph,
    restore_uid: u64,
}

impl CheckpointRestore {
    /// Begin a restore pass, claiming a fresh generation id from `uids`.
    pub fn new(graph: ObjectGraph, uids: &RestoreUidSource) -> Rc<Self> {
        Rc::new(Self {
            graph,
            restore_uid: uids.next_uid(),
        })
    }

    /// Apply this checkpoint to `root`.
    pub fn restore(self: Rc<Self>, root: &TrackableRef) -> Result<()> {
        tracing::debug!(restore_uid = self.restore_uid, "starting restore pass");
        apply(&self, 0, root)
    }
}

fn apply(this: &Rc<CheckpointRestore>, node_id: usize, target: &TrackableRef) -> Result<()> {
    let node = this.graph.node(node_id).ok_or_else(|| {
        TrackError::RestoreError(format!("saved object graph has no node {node_id}"))
    })?;

    {
        let mut live = target.borrow_mut();
        let already_current = live
            .track_state()
            .update_uid()
            .is_some_and(|seen| seen >= this.restore_uid);
        if already_current {
            // A newer (or this very) generation has been applied; an older
            // checkpoint must not clobber it.
            return Ok(());
        }
        if let Some(payload) = &node.payload {
            live.restore_payload(payload)?;
        }
        live.track_state_mut().set_update_uid(this.restore_uid);
    }

    // Match saved children against live dependencies; queue the misses.
    let mut matched: Vec<(usize, TrackableRef)> = Vec::new();
    let mut missing: Vec<(String, usize)> = Vec::new();
    {
        let live = target.borrow();
        for edge in &node.children {
            match live.track_state().lookup_dependency(&edge.name) {
                Some(child) => matched.push((edge.node_id, child)),
                None => missing.push((edge.name.clone(), edge.node_id)),
            }
        }
    }
    for (name, child_id) in missing {
        tracing::debug!(name = %name, "dependency not attached yet; deferring restoration");
        let source: Rc<dyn RestoreSource> = this.clone();
        target
            .borrow_mut()
            .track_state_mut()
            .defer_restoration(name, CheckpointPosition::new(source, child_id));
    }
    for (child_id, child) in matched {
        apply(this, child_id, &child)?;
    }
    Ok(())
}

impl RestoreSource for CheckpointRestore {
    fn restore_uid(&self) -> u64 {
        self.restore_uid
    }

    fn is_simple(&self, node_id: usize) -> bool {
        self.graph.node(node_id).is_some_and(|node| {
            node.children.is_empty()
                && node.functions.is_empty()
                && simple_array(node.payload.as_ref()).is_some()
        })
    }

    fn initial_value(&self, node_id: usize) -> Option<ArrayD<f32>> {
        simple_array(self.graph.node(node_id)?.payload.as_ref())
    }

    fn restore_node(self: Rc<Self>, node_id: usize, target: &TrackableRef) -> Result<()> {
        apply(&self, node_id, target)
    }
}

/// A single leaf array, if the payload is a plain variable payload.
fn simple_array(payload: Option<&serde_json::Value>) -> Option<ArrayD<f32>> {
    let payload = payload?;
    serde_json::from_value::<VariablePayload>(payload.clone())
        .ok()
        .map(|parsed| parsed.value)
}

/// A flat name-to-array checkpoint applied to named variable leaves.
///
/// Unlike a position-based pass, this does not follow the object graph: each
/// node is matched purely by its registered leaf name. Nodes without a
/// matching entry are left untouched.
pub struct NameBasedCheckpoint {
    values: HashMap<String, ArrayD<f32>>,
    restore_uid: u64,
}

impl NameBasedCheckpoint {
    pub fn new(values: HashMap<String, ArrayD<f32>>, uids: &RestoreUidSource) -> Rc<Self> {
        Rc::new(Self {
            values,
            restore_uid: uids.next_uid(),
        })
    }
}

impl NameBasedRestorer for NameBasedCheckpoint {
    fn restore_uid(&self) -> u64 {
        self.restore_uid
    }

    fn eager_restore(&self, node: &mut dyn Trackable) -> Result<()> {
        let Some(name) = node.leaf_name() else {
            return Ok(());
        };
        let Some(value) = self.values.get(&name) else {
            return Ok(());
        };
        let payload = serde_json::to_value(VariablePayload {
            name,
            trainable: true,
            value: value.clone(),
        })?;
        node.restore_payload(&payload)
    }
}

/// Walk the live graph from `root`, registering `restorer` on every node and
/// eagerly applying it where the node's generation is behind.
///
/// Registration matters as much as application: dependencies attached later
/// replay the pending restorer the moment they appear.
pub fn restore_by_name(root: &TrackableRef, restorer: &Rc<dyn NameBasedRestorer>) -> Result<()> {
    let mut queue: Vec<TrackableRef> = vec![root.clone()];
    let mut seen: Vec<usize> = Vec::new();
    while let Some(node) = queue.pop() {
        let ptr = Rc::as_ptr(&node) as *const () as usize;
        if seen.contains(&ptr) {
            continue;
        }
        seen.push(ptr);
        name_based_attribute_restore(&mut *node.borrow_mut(), restorer)?;
        let children: Vec<TrackableRef> = node
            .borrow()
            .track_state()
            .dependencies()
            .iter()
            .map(|reference| reference.node.clone())
            .collect();
        queue.extend(children);
    }
    Ok(())
}
