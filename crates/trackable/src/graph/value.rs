//! Mapping keys and contained values.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use ndarray::ArrayD;

use super::node::TrackableRef;
use super::variable::VariableRef;

/// A mapping key: string or integer.
///
/// Checkpoint dependency names must be strings. Integer keys are tolerated
/// by the dict wrapper, but once one maps to a tracked value the wrapper is
/// permanently unsaveable. Keys order strings before integers so value
/// enumeration stays deterministic for mixed-key mappings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Str(String),
    Int(i64),
}

impl Key {
    /// The string form of this key, if it has one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            Key::Int(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => f.write_str(s),
            Key::Int(i) => write!(f, "{i}"),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s:?}"),
            Key::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

/// Opaque leaf data kept in a structure but never tracked as a dependency.
#[derive(Clone, Debug, PartialEq)]
pub enum Leaf {
    Scalar(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(ArrayD<f32>),
    /// Reference to a traced function, surfaced as a child on export.
    Function(String),
}

impl Leaf {
    pub fn is_function(&self) -> bool {
        matches!(self, Leaf::Function(_))
    }
}

/// A value contained in a trackable data structure.
#[derive(Clone)]
pub enum Value {
    /// Variable-like trackable leaf.
    Variable(VariableRef),
    /// Any other trackable node.
    Node(TrackableRef),
    /// Opaque untracked leaf.
    Leaf(Leaf),
    /// Plain mapping not yet adopted into the graph.
    Map(IndexMap<Key, Value>),
    /// Explicitly excluded from dependency tracking.
    NoDependency(Box<Value>),
}

impl Value {
    /// Handle on the trackable payload, if this value participates in the
    /// dependency graph.
    pub fn as_trackable(&self) -> Option<TrackableRef> {
        match self {
            Value::Variable(variable) => {
                let node: TrackableRef = variable.clone();
                Some(node)
            }
            Value::Node(node) => Some(node.clone()),
            _ => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Leaf(leaf) if leaf.is_function())
    }

    /// Short human label used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Value::Variable(_) => "a variable".into(),
            Value::Node(_) => "a trackable node".into(),
            Value::Leaf(leaf) => format!("the opaque leaf {leaf:?}"),
            Value::Map(_) => "a plain mapping".into(),
            Value::NoDependency(_) => "a no-dependency value".into(),
        }
    }
}

/// Identity for trackables, structure for everything else. Trackable nodes
/// are used as mapping/set members, where structural comparison would be
/// ambiguous for cyclic graphs.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Variable(a), Value::Variable(b)) => Rc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => Rc::ptr_eq(a, b),
            (Value::Leaf(a), Value::Leaf(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::NoDependency(a), Value::NoDependency(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Variable(variable) => match variable.try_borrow() {
                Ok(inner) => write!(f, "<variable '{}'>", inner.name()),
                Err(_) => f.write_str("<variable>"),
            },
            Value::Node(_) => f.write_str("<trackable>"),
            Value::Leaf(leaf) => leaf.fmt(f),
            Value::Map(map) => f.write_str(&format_map(map)),
            Value::NoDependency(inner) => write!(f, "NoDependency({inner:?})"),
        }
    }
}

impl From<Leaf> for Value {
    fn from(leaf: Leaf) -> Self {
        Value::Leaf(leaf)
    }
}

impl From<VariableRef> for Value {
    fn from(variable: VariableRef) -> Self {
        Value::Variable(variable)
    }
}

/// Render a mapping for error messages, in insertion order.
pub(crate) fn format_map(map: &IndexMap<Key, Value>) -> String {
    use std::fmt::Write;

    let mut out = String::from("{");
    for (index, (key, value)) in map.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{key:?}: {value:?}");
    }
    out.push('}');
    out
}
