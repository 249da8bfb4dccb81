#![forbid(unsafe_code)]

//! Raw mappings and the values they hold.
//!
//! A [`Mapping`] is a shared, identity-bearing string-keyed map: cloning it
//! yields another handle to the **same** instance, and [`Mapping::ptr_eq`]
//! is the identity test used for change detection. Keys iterate in sorted
//! order, so snapshots and serialized output are deterministic.
//!
//! Callers build mappings with [`Mapping::insert`] or `From<[(K, V); N]>`
//! before wrapping them. Once wrapped, every mutation must go through the
//! owning [`ReactiveNode`]; inserting into a wrapped mapping directly
//! bypasses change detection and desynchronizes the node's children.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::node::ReactiveNode;

/// A shared string-keyed mapping with reference identity.
#[derive(Clone, Default)]
pub struct Mapping {
    entries: Rc<RefCell<BTreeMap<String, Value>>>,
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.borrow().iter()).finish()
    }
}

impl Mapping {
    /// Create an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the value stored at `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    /// Store `value` at `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.borrow_mut().insert(key.into(), value.into())
    }

    /// Remove `key`, returning the previous value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.borrow_mut().remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Snapshot of the keys, in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    /// Snapshot of the entries, in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Access the entries by reference without cloning.
    ///
    /// Do not touch this mapping from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&BTreeMap<String, Value>) -> R) -> R {
        f(&self.entries.borrow())
    }

    /// Whether both handles refer to the same mapping instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Mapping) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Mapping {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Rc::new(RefCell::new(map)),
        }
    }
}

/// A value stored in a [`Mapping`].
///
/// Scalars compare by value (`Int` and `Float` numerically, so `1 == 1.0`).
/// `Map` and `Node` compare by instance identity, and a `Node` equals the
/// `Map` it wraps.
#[derive(Clone, Debug)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A plain, unwrapped mapping.
    Map(Mapping),
    /// A mapping already wrapped by a reactive node.
    Node(ReactiveNode),
}

impl Value {
    /// Short name of the variant, for logs and diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Map(_) => "map",
            Self::Node(_) => "node",
        }
    }

    /// Whether the value is a mapping, wrapped or not.
    #[must_use]
    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Map(_) | Self::Node(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value; integers widen to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The underlying mapping; for a node, its raw mapping.
    #[must_use]
    pub fn as_mapping(&self) -> Option<Mapping> {
        match self {
            Self::Map(m) => Some(m.clone()),
            Self::Node(n) => Some(n.raw()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_node(&self) -> Option<&ReactiveNode> {
        match self {
            Self::Node(n) => Some(n),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                int_eq_float(*a, *b)
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a.ptr_eq(b),
            (Self::Node(a), Self::Node(b)) => a.ptr_eq(b),
            (Self::Node(n), Self::Map(m)) | (Self::Map(m), Self::Node(n)) => n.raw().ptr_eq(m),
            _ => false,
        }
    }
}

/// Exact comparison: `b` must be integral, in `i64` range, and equal to `a`
/// without rounding either side.
fn int_eq_float(a: i64, b: f64) -> bool {
    // 2^63 is exactly representable; `i64::MAX as f64` rounds up to it.
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    b.fract() == 0.0 && (-TWO_POW_63..TWO_POW_63).contains(&b) && b as i64 == a
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Mapping> for Value {
    fn from(m: Mapping) -> Self {
        Self::Map(m)
    }
}

impl From<ReactiveNode> for Value {
    fn from(n: ReactiveNode) -> Self {
        Self::Node(n)
    }
}
