//! Dict wrapper: a mapping participating in the dependency graph.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;

use indexmap::IndexMap;

use crate::checkpoint::SaveType;
use crate::graph::sentinel::SentinelRef;
use crate::graph::{format_map, Key, TrackState, Trackable, Value, VariableRef};
use crate::structure::{self, sticky_attribute_assignment, wrap_or_unwrap, DataStructure, StructureState};
use crate::wrap::Proxy;
use crate::{Result, TrackError};

/// Dependency name shared by values stored under non-string keys.
const NON_STRING_KEY_NAME: &str = "-non_string_key";

/// A mapping whose entries participate in the checkpoint dependency graph.
///
/// Reads behave exactly as on the wrapped mapping (the wrapper derefs to
/// it). Mutations go through [`insert`](DictWrapper::insert),
/// [`remove`](DictWrapper::remove), and [`update`](DictWrapper::update),
/// which re-run tracking and dirtiness checks. Mutating the backing mapping
/// through any other channel is detected by comparing live content against
/// the snapshot taken at the last acknowledged state, and permanently marks
/// the wrapper unsaveable: a silently incomplete checkpoint is worse than a
/// failed one.
pub struct DictWrapper {
    backing: Proxy<IndexMap<Key, Value>>,
    track: TrackState,
    structure: StructureState,
    /// One-way: a non-string key mapped to a tracked value.
    non_string_key: Cell<bool>,
    /// One-way: the wrapped mapping diverged from the snapshot.
    external_modification: Cell<bool>,
    /// Wrapped content at the last point the wrapper acknowledged it.
    snapshot: RefCell<Option<IndexMap<Key, Value>>>,
    /// Rendering of the snapshot at the moment divergence was detected.
    diverged_snapshot: RefCell<Option<String>>,
}

impl DictWrapper {
    /// Wrap a mapping, tracking every initial entry.
    ///
    /// Non-string keys are tolerated; their values are tracked under a
    /// shared sentinel name, and if such a value is trackable the wrapper is
    /// marked permanently unsaveable. The first snapshot is taken once all
    /// initial entries are tracked.
    pub fn new(entries: IndexMap<Key, Value>) -> Self {
        let mut wrapper = Self {
            backing: Proxy::default(),
            track: TrackState::new(),
            structure: StructureState::new(),
            non_string_key: Cell::new(false),
            external_modification: Cell::new(false),
            snapshot: RefCell::new(None),
            diverged_snapshot: RefCell::new(None),
        };
        for (key, value) in entries {
            let raw = value.clone();
            let tracked = match wrapper.track_entry(&key, value) {
                Ok(tracked) => tracked,
                // A fresh wrapper has no queued restorations to replay, so
                // tracking can only refuse the value itself; keep it raw.
                Err(error) => {
                    tracing::warn!(key = %key, error = %error, "keeping untracked value");
                    raw
                }
            };
            wrapper.backing.target_mut().insert(key, tracked);
        }
        wrapper.update_snapshot();
        wrapper
    }

    /// Wrap the entries of any `(key, value)` iterator.
    pub fn from_entries(entries: impl IntoIterator<Item = (Key, Value)>) -> Self {
        Self::new(entries.into_iter().collect())
    }

    /// Write an entry through the wrapper.
    ///
    /// Runs the external-modification check, re-tracks the value (string
    /// keys become dependency names; non-string keys store the value
    /// untracked but mark the wrapper unsaveable if it is trackable), writes
    /// through, and refreshes the snapshot. Returns the previous value under
    /// the key, if any.
    pub fn insert(&mut self, key: impl Into<Key>, value: Value) -> Result<Option<Value>> {
        let key = key.into();
        self.check_external_modification();
        let value = match key.as_str() {
            Some(_) => self.track_entry(&key, value)?,
            None => {
                let no_dependency = matches!(value, Value::NoDependency(_));
                let value = wrap_or_unwrap(value);
                if !no_dependency && value.as_trackable().is_some() {
                    // Non-string keys are fine until one maps to a value we
                    // would have to depend on; dependency names must be
                    // strings.
                    self.non_string_key.set(true);
                    tracing::warn!(key = %key, "non-string key maps to a trackable value; wrapper is unsaveable");
                }
                value
            }
        };
        let previous = self.backing.target_mut().insert(key, value);
        self.update_snapshot();
        Ok(previous)
    }

    /// Delete an entry through the wrapper. Returns the removed value.
    pub fn remove(&mut self, key: &Key) -> Option<Value> {
        self.check_external_modification();
        let removed = self.backing.target_mut().shift_remove(key);
        self.update_snapshot();
        removed
    }

    /// Bulk insertion; each entry goes through [`insert`](DictWrapper::insert).
    pub fn update(&mut self, entries: impl IntoIterator<Item = (Key, Value)>) -> Result<()> {
        for (key, value) in entries {
            self.insert(key, value)?;
        }
        Ok(())
    }

    /// Direct mutable access to the backing mapping, bypassing tracking.
    ///
    /// Changes made through this handle are not tracked and will be detected
    /// by the next dirtiness check, permanently marking the wrapper
    /// unsaveable. Exists for interoperability with code that insists on
    /// mutating the mapping in place.
    pub fn backing_mut(&mut self) -> &mut IndexMap<Key, Value> {
        self.backing.target_mut()
    }

    /// Whether a mutation has already made this wrapper unsaveable.
    pub fn dirty(&self) -> bool {
        self.external_modification.get() || self.non_string_key.get()
    }

    /// Compare live content against the snapshot; divergence means the
    /// backing mapping was mutated around the wrapper. One-way: once set,
    /// the live snapshot is dropped (its rendering is kept for diagnostics)
    /// and the flag never clears.
    pub fn check_external_modification(&self) {
        if self.dirty() {
            return;
        }
        let diverged = {
            let snapshot = self.snapshot.borrow();
            match snapshot.as_ref() {
                Some(acknowledged) => *self.backing.target() != *acknowledged,
                None => true,
            }
        };
        if diverged {
            tracing::warn!("wrapped mapping diverged from the acknowledged snapshot; wrapper is unsaveable");
            let rendered = self
                .snapshot
                .borrow()
                .as_ref()
                .map(format_map)
                .unwrap_or_else(|| "<none>".to_string());
            *self.diverged_snapshot.borrow_mut() = Some(rendered);
            *self.snapshot.borrow_mut() = None;
            self.external_modification.set(true);
        }
    }

    /// Acknowledge the current wrapped content as consistent.
    fn update_snapshot(&self) {
        if self.dirty() {
            return;
        }
        *self.snapshot.borrow_mut() = Some(self.backing.target().clone());
    }

    /// Track one entry, tolerating untrackable values.
    ///
    /// String keys become dependency names. Values under non-string keys are
    /// tracked under a shared sentinel name; if such a value ends up tracked
    /// the wrapper becomes permanently unsaveable. An untrackable value is
    /// kept as-is after one retry through sticky assignment, which still
    /// adopts containers and strips no-dependency markers.
    fn track_entry(&mut self, key: &Key, value: Value) -> Result<Value> {
        let (name, string_key) = match key.as_str() {
            Some(name) => (name.to_string(), true),
            None => (NON_STRING_KEY_NAME.to_string(), false),
        };
        let no_dependency = matches!(value, Value::NoDependency(_));
        let fallback = value.clone();
        match self.track_value(value, &name) {
            Ok(tracked) => {
                if !string_key && !no_dependency {
                    // A non-string key maps to a tracked value; dependency
                    // names must be strings, so this wrapper can no longer
                    // be saved.
                    self.non_string_key.set(true);
                    tracing::warn!(key = %key, "non-string key maps to a tracked value; wrapper is unsaveable");
                }
                Ok(tracked)
            }
            Err(TrackError::Untrackable { .. }) => {
                sticky_attribute_assignment(self, &name, fallback)
            }
            Err(other) => Err(other),
        }
    }

    fn render_content(&self) -> String {
        format_map(self.backing.target())
    }
}

impl Default for DictWrapper {
    fn default() -> Self {
        Self::new(IndexMap::new())
    }
}

impl Trackable for DictWrapper {
    fn track_state(&self) -> &TrackState {
        &self.track
    }

    fn track_state_mut(&mut self) -> &mut TrackState {
        &mut self.track
    }

    /// Check that the wrapper is saveable before listing its dependencies.
    fn trackable_children(&self, save_type: SaveType) -> Result<Vec<(String, Value)>> {
        self.check_external_modification();
        if self.non_string_key.get() {
            return Err(TrackError::NonStringKey {
                wrapper: self.render_content(),
            });
        }
        if self.external_modification.get() {
            return Err(TrackError::ExternalModification {
                current: self.render_content(),
                snapshot: self
                    .diverged_snapshot
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| "<none>".to_string()),
            });
        }
        debug_assert!(!self.dirty());

        let mut children: Vec<(String, Value)> = self
            .track_state()
            .dependencies()
            .iter()
            .map(|reference| (reference.name.clone(), Value::Node(reference.node.clone())))
            .collect();
        if save_type == SaveType::SavedModel {
            // Export targets additionally serialize traced functions.
            for (key, value) in self.backing.target() {
                if value.is_function() {
                    if let Some(name) = key.as_str() {
                        children.push((name.to_string(), value.clone()));
                    }
                }
            }
        }
        Ok(children)
    }

    fn attribute_sentinel(&self) -> Option<SentinelRef> {
        Some(self.structure.sentinel().clone())
    }

    fn trainable_variables(&self) -> Vec<VariableRef> {
        structure::trainable_variables(self)
    }

    fn non_trainable_variables(&self) -> Vec<VariableRef> {
        structure::non_trainable_variables(self)
    }
}

impl DataStructure for DictWrapper {
    fn structure_state(&self) -> &StructureState {
        &self.structure
    }

    fn structure_state_mut(&mut self) -> &mut StructureState {
        &mut self.structure
    }

    /// Contained values sorted deterministically by key, regardless of the
    /// wrapped mapping's insertion order.
    fn values(&self) -> Vec<Value> {
        let mut entries: Vec<(&Key, &Value)> = self.backing.target().iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, value)| value.clone()).collect()
    }
}

impl Deref for DictWrapper {
    type Target = IndexMap<Key, Value>;

    fn deref(&self) -> &Self::Target {
        self.backing.target()
    }
}

/// Structural equality, like the wrapped mapping. This deliberately
/// overrides the identity semantics graph nodes default to: two wrappers
/// holding equal content compare equal like ordinary mappings.
impl PartialEq for DictWrapper {
    fn eq(&self, other: &Self) -> bool {
        *self.backing.target() == *other.backing.target()
    }
}

impl PartialEq<IndexMap<Key, Value>> for DictWrapper {
    fn eq(&self, other: &IndexMap<Key, Value>) -> bool {
        *self.backing.target() == *other
    }
}

impl fmt::Debug for DictWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_content())
    }
}
