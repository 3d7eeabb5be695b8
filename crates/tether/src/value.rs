use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Element type of a [`Value::Bytes`] typed-array payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BytesKind {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl BytesKind {
    pub fn tag(self) -> &'static str {
        match self {
            BytesKind::U8 => "u8",
            BytesKind::U16 => "u16",
            BytesKind::U32 => "u32",
            BytesKind::I8 => "i8",
            BytesKind::I16 => "i16",
            BytesKind::I32 => "i32",
            BytesKind::F32 => "f32",
            BytesKind::F64 => "f64",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "u8" => Some(BytesKind::U8),
            "u16" => Some(BytesKind::U16),
            "u32" => Some(BytesKind::U32),
            "i8" => Some(BytesKind::I8),
            "i16" => Some(BytesKind::I16),
            "i32" => Some(BytesKind::I32),
            "f32" => Some(BytesKind::F32),
            "f64" => Some(BytesKind::F64),
            _ => None,
        }
    }
}

/// A local callable carried inside a [`Value`] tree.
///
/// Callbacks are fire-and-forget: invocations take a decoded argument list
/// and return nothing. The codec swaps them for `__callback__<uuid>`
/// placeholders before a message reaches the adapter, so a `Callback` never
/// crosses the wire itself.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(Vec<Value>) + Send + Sync + 'static>);

impl Callback {
    pub fn new(f: impl Fn(Vec<Value>) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, args: Vec<Value>) {
        (self.0)(args)
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// The value domain the wire carries: a JSON superset with `undefined`,
/// big integers, dates, regular expressions, typed arrays, maps, sets, and
/// local callables.
///
/// Composite nodes (`Array`, `Object`, `Map`, `Set`, `Bytes`) are
/// reference-counted, so a subgraph reachable twice stays one node through
/// an encode/decode round trip. Equality is structural; callables compare
/// by identity.
#[derive(Clone, Debug)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    BigInt(i128),
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    RegExp {
        source: String,
        flags: String,
    },
    Bytes {
        kind: BytesKind,
        data: Arc<Vec<u8>>,
    },
    Array(Arc<Vec<Value>>),
    Object(Arc<BTreeMap<String, Value>>),
    Map(Arc<Vec<(Value, Value)>>),
    Set(Arc<Vec<Value>>),
    Function(Callback),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }

    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Value::Map(Arc::new(entries))
    }

    pub fn set(items: Vec<Value>) -> Self {
        Value::Set(Arc::new(items))
    }

    pub fn bytes(kind: BytesKind, data: Vec<u8>) -> Self {
        Value::Bytes {
            kind,
            data: Arc::new(data),
        }
    }

    pub fn callback(f: impl Fn(Vec<Value>) + Send + Sync + 'static) -> Self {
        Value::Function(Callback::new(f))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Callback> {
        match self {
            Value::Function(cb) => Some(cb),
            _ => None,
        }
    }

    /// Field access for object values; `None` for anything else.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Replaces the node at `path` (object keys and array indices), used to
    /// swap envelope-sidecar placeholders for live callbacks. Returns false
    /// when the path does not resolve.
    pub(crate) fn replace_at_path(&mut self, path: &[String], replacement: Value) -> bool {
        let Some((head, rest)) = path.split_first() else {
            *self = replacement;
            return true;
        };
        match self {
            Value::Object(entries) => {
                let entries = Arc::make_mut(entries);
                match entries.get_mut(head) {
                    Some(child) => child.replace_at_path(rest, replacement),
                    None => false,
                }
            }
            Value::Array(items) => {
                let Ok(index) = head.parse::<usize>() else {
                    return false;
                };
                let items = Arc::make_mut(items);
                match items.get_mut(index) {
                    Some(child) => child.replace_at_path(rest, replacement),
                    None => false,
                }
            }
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (
                Value::RegExp {
                    source: sa,
                    flags: fa,
                },
                Value::RegExp {
                    source: sb,
                    flags: fb,
                },
            ) => sa == sb && fa == fb,
            (
                Value::Bytes {
                    kind: ka,
                    data: da,
                },
                Value::Bytes {
                    kind: kb,
                    data: db,
                },
            ) => ka == kb && da == db,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = Value::object([("x", Value::Int(1)), ("y", Value::array(vec![Value::Null]))]);
        let b = Value::object([("x", Value::Int(1)), ("y", Value::array(vec![Value::Null]))]);
        assert_eq!(a, b);
        assert_ne!(Value::Undefined, Value::Null);
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn functions_compare_by_identity() {
        let f = Value::callback(|_| {});
        let g = f.clone();
        assert_eq!(f, g);
        assert_ne!(f, Value::callback(|_| {}));
    }

    #[test]
    fn replace_at_path_walks_objects_and_arrays() {
        let mut v = Value::object([(
            "args",
            Value::array(vec![
                Value::Int(0),
                Value::object([("cb", Value::String("placeholder".into()))]),
            ]),
        )]);
        let path = ["args".to_string(), "1".to_string(), "cb".to_string()];
        assert!(v.replace_at_path(&path, Value::Int(9)));
        assert_eq!(
            v.get("args").and_then(|a| a.as_array()).map(|a| a[1].clone()),
            Some(Value::object([("cb", Value::Int(9))]))
        );

        let missing = ["args".to_string(), "7".to_string()];
        assert!(!v.replace_at_path(&missing, Value::Null));
    }

    #[test]
    fn shared_nodes_keep_identity_through_clone() {
        let shared = Value::array(vec![Value::Int(1)]);
        let outer = Value::object([("a", shared.clone()), ("b", shared.clone())]);
        let (Some(Value::Array(a)), Some(Value::Array(b))) = (outer.get("a"), outer.get("b"))
        else {
            panic!("expected arrays");
        };
        assert!(Arc::ptr_eq(a, b));
    }
}
