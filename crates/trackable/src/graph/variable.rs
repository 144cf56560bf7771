//! Variable-like trackable leaves.

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::graph::node::{track_dependency, TrackState, Trackable, TrackableRef};
use crate::{Result, TrackError};

/// Shared handle to a variable leaf.
pub type VariableRef = Rc<RefCell<Variable>>;

/// Serialized form of a variable's leaf state.
#[derive(Serialize, Deserialize)]
pub(crate) struct VariablePayload {
    pub(crate) name: String,
    pub(crate) trainable: bool,
    pub(crate) value: ArrayD<f32>,
}

/// A named array leaf participating in trainable/non-trainable aggregation.
///
/// Variables carry no graph structure of their own; they are the unit of
/// state a checkpoint actually stores and restores.
pub struct Variable {
    name: String,
    value: ArrayD<f32>,
    trainable: bool,
    track: TrackState,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: ArrayD<f32>, trainable: bool) -> VariableRef {
        Rc::new(RefCell::new(Self {
            name: name.into(),
            value,
            trainable,
            track: TrackState::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ArrayD<f32> {
        &self.value
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    /// Replace the held value. The shape is fixed at creation.
    pub fn assign(&mut self, value: ArrayD<f32>) -> Result<()> {
        if value.shape() != self.value.shape() {
            return Err(TrackError::ShapeMismatch {
                expected: self.value.shape().to_vec(),
                actual: value.shape().to_vec(),
            });
        }
        self.value = value;
        Ok(())
    }
}

impl Trackable for Variable {
    fn track_state(&self) -> &TrackState {
        &self.track
    }

    fn track_state_mut(&mut self) -> &mut TrackState {
        &mut self.track
    }

    fn serialize_payload(&self) -> Option<serde_json::Value> {
        serde_json::to_value(VariablePayload {
            name: self.name.clone(),
            trainable: self.trainable,
            value: self.value.clone(),
        })
        .ok()
    }

    fn restore_payload(&mut self, payload: &serde_json::Value) -> Result<()> {
        let restored: VariablePayload = serde_json::from_value(payload.clone())?;
        self.assign(restored.value)
    }

    fn leaf_name(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// Create a variable under `name` on `owner`, preferring a queued simple
/// checkpoint restoration over `initial_value` ("restore-on-create").
///
/// A plain initial value always loses to a pending checkpoint value, since
/// the checkpoint carries state the caller asked to bring back. The created
/// variable is declared as a dependency of `owner`, which also replays any
/// queued restorations for `name`.
pub fn add_variable_with_initializer(
    owner: &mut dyn Trackable,
    name: &str,
    initial_value: ArrayD<f32>,
    trainable: bool,
) -> Result<VariableRef> {
    let value = match owner.track_state().preload_simple_restoration(name) {
        Some(checkpointed) => {
            tracing::debug!(
                name,
                restore_uid = checkpointed.restore_uid,
                "initializing variable from checkpoint"
            );
            checkpointed.value
        }
        None => initial_value,
    };
    let variable = Variable::new(name, value, trainable);
    let node: TrackableRef = variable.clone();
    track_dependency(owner, name, &node, false)?;
    Ok(variable)
}
