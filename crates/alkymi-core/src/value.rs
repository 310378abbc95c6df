//! Tagged runtime value representation for recipe outputs.
//!
//! [`Value`] is the dynamic counterpart to the engine's static graph model.
//! Every bound function consumes and produces `Value`s; every value kind has
//! a canonical checksum rule (see [`crate::checksum`]) and a canonical
//! on-disk form (see the store crate).
//!
//! Equality and hashing are defined over semantic content: floats compare by
//! canonical bit pattern (all NaNs are one value), mappings compare by
//! entries regardless of insertion order, and sets compare by elements.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use indexmap::IndexMap;

/// Canonical bit pattern used for every NaN.
const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

/// Returns the canonical IEEE-754 bit pattern of `f`.
///
/// All NaNs collapse to one pattern so that structurally equal values always
/// produce equal checksums. `0.0` and `-0.0` keep their distinct bits.
pub fn canonical_float_bits(f: f64) -> u64 {
    if f.is_nan() {
        CANONICAL_NAN_BITS
    } else {
        f.to_bits()
    }
}

/// A runtime value produced or consumed by a bound function.
///
/// - Primitives: `Null`, `Bool`, `Int`, `Float`, `Str`, `Bytes`
/// - Containers: `Seq` (ordered), `Map` (keyed, insertion-ordered),
///   `Set` (element order irrelevant to identity)
/// - `Path`: reference to an external file or directory; its checksum
///   covers the file's content so external edits are detected
/// - `Opaque`: bytes produced by a user-installed codec, refused when
///   opaque support is disabled in the configuration
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    /// Keyed mapping with full values as keys; iteration order is the
    /// insertion order, which is significant for foreach recipes.
    Map(IndexMap<Value, Value>),
    Set(Vec<Value>),
    Path(PathBuf),
    Opaque { codec: String, bytes: Vec<u8> },
}

impl Value {
    /// Returns a human-readable description of the value's kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "seq",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Path(_) => "path",
            Value::Opaque { .. } => "opaque",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<Value, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&std::path::Path> {
        match self {
            Value::Path(p) => Some(p),
            _ => None,
        }
    }
}

// Conversions for the common leaf kinds.

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Seq(items)
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Value::Path(p)
    }
}

/// Multiset equality over set elements.
fn set_eq(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let count = |xs: &[Value], x: &Value| xs.iter().filter(|y| *y == x).count();
    a.iter().all(|x| count(a, x) == count(b, x))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                canonical_float_bits(*a) == canonical_float_bits(*b)
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            // IndexMap equality is order-insensitive, which matches the
            // "mappings compare by entries" semantics.
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => set_eq(a, b),
            (Value::Path(a), Value::Path(b)) => a == b,
            (
                Value::Opaque { codec: ca, bytes: ba },
                Value::Opaque { codec: cb, bytes: bb },
            ) => ca == cb && ba == bb,
            _ => false,
        }
    }
}

impl Eq for Value {}

/// Order-independent fold of a sequence of hashable items, so that equal
/// maps and sets hash equally regardless of entry order.
fn unordered_fold<I, T>(items: I) -> u64
where
    I: Iterator<Item = T>,
    T: Hash,
{
    let mut acc: u64 = 0;
    for item in items {
        let mut h = DefaultHasher::new();
        item.hash(&mut h);
        acc ^= h.finish();
    }
    acc
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => canonical_float_bits(*f).hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Seq(items) => items.hash(state),
            Value::Map(entries) => {
                entries.len().hash(state);
                unordered_fold(entries.iter()).hash(state);
            }
            Value::Set(items) => {
                items.len().hash(state);
                unordered_fold(items.iter()).hash(state);
            }
            Value::Path(p) => p.hash(state),
            Value::Opaque { codec, bytes } => {
                codec.hash(state);
                bytes.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Value::Path(p) => write!(f, "{}", p.display()),
            Value::Opaque { codec, bytes } => {
                write!(f, "<opaque {} ({} bytes)>", codec, bytes.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_equals_nan() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(f64::NAN), Value::Float(-f64::NAN));
    }

    #[test]
    fn negative_zero_is_distinct() {
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn map_equality_ignores_entry_order() {
        let mut a = IndexMap::new();
        a.insert(Value::from("x"), Value::from(1i64));
        a.insert(Value::from("y"), Value::from(2i64));
        let mut b = IndexMap::new();
        b.insert(Value::from("y"), Value::from(2i64));
        b.insert(Value::from("x"), Value::from(1i64));
        assert_eq!(Value::Map(a), Value::Map(b));
    }

    #[test]
    fn set_equality_is_by_elements() {
        let a = Value::Set(vec![Value::from(1i64), Value::from(2i64)]);
        let b = Value::Set(vec![Value::from(2i64), Value::from(1i64)]);
        assert_eq!(a, b);

        let c = Value::Set(vec![Value::from(1i64), Value::from(1i64)]);
        assert_ne!(a, c);
    }

    #[test]
    fn equal_maps_hash_equally() {
        use std::collections::hash_map::DefaultHasher;

        let mut a = IndexMap::new();
        a.insert(Value::from("x"), Value::from(1i64));
        a.insert(Value::from("y"), Value::from(2i64));
        let mut b = IndexMap::new();
        b.insert(Value::from("y"), Value::from(2i64));
        b.insert(Value::from("x"), Value::from(1i64));

        let hash = |v: &Value| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&Value::Map(a)), hash(&Value::Map(b)));
    }

    #[test]
    fn values_work_as_map_keys() {
        let mut m = IndexMap::new();
        m.insert(Value::from(1i64), Value::from("one"));
        m.insert(Value::from("two"), Value::from(2i64));
        assert_eq!(m.get(&Value::from(1i64)), Some(&Value::from("one")));
        assert_eq!(m.get(&Value::from("two")), Some(&Value::from(2i64)));
    }

    #[test]
    fn kind_names() {
        assert_eq!(Value::Null.kind_name(), "null");
        assert_eq!(Value::from(3i64).kind_name(), "int");
        assert_eq!(Value::Path(PathBuf::from("/tmp/x")).kind_name(), "path");
    }
}
