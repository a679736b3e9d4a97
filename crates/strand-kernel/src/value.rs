//! Dynamic values exchanged between coroutines and the kernel.
//!
//! Coroutines resume with a [`Value`] and return one when they finish.  The
//! type is small: enough to carry operation results (byte
//! buffers, strand ids, composite-wait result maps, spawn callbacks) and
//! ordinary user data.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::handle::KernelHandle;
use crate::yieldable::Yieldable;

// ---------------------------------------------------------------------------
// Strand identity
// ---------------------------------------------------------------------------

/// Identifier of a strand, unique within its kernel.
///
/// Ids are allocated monotonically and never reused, so an allocated id that
/// is no longer live belongs to a strand that has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrandId(u64);

impl StrandId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strand#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamically typed value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Result of a composite wait, keyed by spawn index.
    Map(ResultMap),
    /// Handle of a spawned strand.
    Strand(StrandId),
    /// Callable that spawns a strand when invoked.
    Callback(Callback),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view of the value, accepting both integers and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_strand(&self) -> Option<StrandId> {
        match self {
            Self::Strand(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ResultMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Self::Callback(cb) => Some(cb),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<StrandId> for Value {
    fn from(v: StrandId) -> Self {
        Self::Strand(v)
    }
}

impl From<ResultMap> for Value {
    fn from(v: ResultMap) -> Self {
        Self::Map(v)
    }
}

// ---------------------------------------------------------------------------
// ResultMap
// ---------------------------------------------------------------------------

/// Composite-wait results keyed by substrand spawn index.
///
/// Iteration follows **completion order**; the keys recover spawn order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultMap {
    entries: Vec<(usize, Value)>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result.  Call in completion order.
    pub fn insert(&mut self, index: usize, value: Value) {
        self.entries.push((index, value));
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.iter().any(|(i, _)| *i == index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(spawn index, value)` pairs in completion order.
    pub fn iter(&self) -> impl Iterator<Item = &(usize, Value)> {
        self.entries.iter()
    }

    /// Spawn indices in completion order.
    pub fn keys(&self) -> Vec<usize> {
        self.entries.iter().map(|(i, _)| *i).collect()
    }

    /// Values re-sorted into spawn order.
    pub fn into_spawn_order(mut self) -> Vec<Value> {
        self.entries.sort_by_key(|(i, _)| *i);
        self.entries.into_iter().map(|(_, v)| v).collect()
    }
}

impl FromIterator<(usize, Value)> for ResultMap {
    fn from_iter<I: IntoIterator<Item = (usize, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

/// Builds the entry point of a strand from the callback's arguments.
pub type TaskFactory = Rc<dyn Fn(Vec<Value>) -> Yieldable>;

/// A plain callable handed out by the `callback` operation.
///
/// Invoking it spawns a new strand on the kernel it came from; the strand
/// starts on the next scheduler pass.
#[derive(Clone)]
pub struct Callback {
    factory: TaskFactory,
    handle: KernelHandle,
}

impl Callback {
    pub(crate) fn new(factory: TaskFactory, handle: KernelHandle) -> Self {
        Self { factory, handle }
    }

    /// Spawn the wrapped task with `args` forwarded to its factory.
    pub fn invoke(&self, args: Vec<Value>) -> StrandId {
        self.handle.spawn((self.factory)(args))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.factory, &other.factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_map_iterates_in_completion_order() {
        let mut map = ResultMap::new();
        map.insert(1, Value::from("b"));
        map.insert(0, Value::from("a"));

        assert_eq!(map.keys(), vec![1, 0]);
        assert_eq!(map.get(0), Some(&Value::from("a")));
        assert!(!map.contains(2));
        assert_eq!(
            map.into_spawn_order(),
            vec![Value::from("a"), Value::from("b")]
        );
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(Value::Null.as_f64(), None);
        assert!(Value::default().is_null());
    }

    #[test]
    fn strand_id_display() {
        assert_eq!(StrandId::new(7).to_string(), "strand#7");
    }
}
