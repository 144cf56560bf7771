//! Sticky attribute assignment: container adoption on assignment.

use std::cell::RefCell;
use std::rc::Rc;

use crate::graph::{track_dependency, Trackable, TrackableRef, Value};
use crate::wrap::DictWrapper;
use crate::Result;

/// Adopt plain containers into the graph and unwrap no-dependency markers.
///
/// Plain mappings become dict wrappers so their entries participate in
/// dependency tracking; every other value passes through unchanged.
pub fn wrap_or_unwrap(value: Value) -> Value {
    match value {
        Value::NoDependency(inner) => *inner,
        Value::Map(map) => {
            let wrapper: TrackableRef = Rc::new(RefCell::new(DictWrapper::new(map)));
            Value::Node(wrapper)
        }
        other => other,
    }
}

/// Assignment hook shared by attribute and item writes.
///
/// Wraps `value` if needed and, when the result is trackable, declares it as
/// a dependency of `owner` under `name`. Reassignment through the owner is
/// explicit, so an existing holder of the name is overwritten rather than
/// rejected. Values marked no-dependency are unwrapped and stored without
/// tracking.
pub fn sticky_attribute_assignment(
    owner: &mut dyn Trackable,
    name: &str,
    value: Value,
) -> Result<Value> {
    let no_dependency = matches!(value, Value::NoDependency(_));
    let value = wrap_or_unwrap(value);
    if !no_dependency {
        if let Some(node) = value.as_trackable() {
            track_dependency(owner, name, &node, true)?;
        }
    }
    Ok(value)
}
