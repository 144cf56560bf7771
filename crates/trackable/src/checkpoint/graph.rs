//! Serialized object graphs.

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::checkpoint::SaveType;
use crate::graph::{Leaf, TrackableRef, Value};
use crate::Result;

/// A named edge from one saved node to another.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChildEdge {
    pub name: String,
    pub node_id: usize,
}

/// One node of a saved object graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObjectNode {
    /// Named edges to other nodes, in declaration order.
    pub children: Vec<ChildEdge>,
    /// Function-like entries surfaced for export targets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<(String, String)>,
    /// Leaf payload, if the node carries one.
    pub payload: Option<serde_json::Value>,
}

/// A whole checkpointed object graph. Node 0 is the root.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObjectGraph {
    pub nodes: Vec<ObjectNode>,
}

impl ObjectGraph {
    pub fn root(&self) -> Option<&ObjectNode> {
        self.nodes.first()
    }

    pub fn node(&self, id: usize) -> Option<&ObjectNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Walk the live graph from `root`, emitting each reachable node once.
///
/// Shared nodes are deduplicated by identity, so diamonds and back-edges
/// serialize as edges into the same node id. A node that refuses to list its
/// children (a dirty dict wrapper) aborts the walk with its error.
pub fn export_object_graph(root: &TrackableRef, save_type: SaveType) -> Result<ObjectGraph> {
    let mut graph = ObjectGraph::default();
    let mut ids: HashMap<usize, usize> = HashMap::new();
    let mut queue: Vec<(usize, TrackableRef)> = Vec::new();

    ids.insert(identity(root), 0);
    graph.nodes.push(ObjectNode::default());
    queue.push((0, root.clone()));

    let mut cursor = 0;
    while cursor < queue.len() {
        let (node_id, node) = queue[cursor].clone();
        cursor += 1;

        let (children, payload) = {
            let borrowed = node.borrow();
            (borrowed.trackable_children(save_type)?, borrowed.serialize_payload())
        };

        let mut object_node = ObjectNode {
            payload,
            ..Default::default()
        };
        for (name, child) in children {
            match child.as_trackable() {
                Some(child_node) => {
                    let key = identity(&child_node);
                    let child_id = match ids.get(&key) {
                        Some(&existing) => existing,
                        None => {
                            let id = graph.nodes.len();
                            ids.insert(key, id);
                            graph.nodes.push(ObjectNode::default());
                            queue.push((id, child_node.clone()));
                            id
                        }
                    };
                    object_node.children.push(ChildEdge { name, node_id: child_id });
                }
                None => {
                    if let Value::Leaf(Leaf::Function(symbol)) = &child {
                        object_node.functions.push((name, symbol.clone()));
                    }
                }
            }
        }
        graph.nodes[node_id] = object_node;
    }

    tracing::debug!(nodes = graph.len(), "exported object graph");
    Ok(graph)
}

fn identity(node: &TrackableRef) -> usize {
    Rc::as_ptr(node) as *const () as usize
}
