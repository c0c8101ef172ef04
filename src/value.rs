use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Host-side data exposed to templates through attribute and item lookup.
///
/// Implement this for application types that should be reachable with
/// dotted paths without first converting them into a [`Value::Map`].
pub trait Object: fmt::Debug + Send + Sync {
    /// Attribute lookup, e.g. the `name` in `user.name`.
    fn get_attr(&self, name: &str) -> Option<Value>;

    /// Mapping-style lookup; tried before attributes.
    fn get_item(&self, _key: &str) -> Option<Value> {
        None
    }

    /// Elements produced when the object is used as a `for` iterable.
    fn iterate(&self) -> Option<Vec<Value>> {
        None
    }

    fn render(&self) -> String {
        format!("{self:?}")
    }
}

type CallFn = dyn Fn() -> std::result::Result<Value, String> + Send + Sync;

/// A callable with zero required arguments, invoked during path resolution.
#[derive(Clone)]
pub struct Function(Arc<CallFn>);

impl Function {
    pub fn call(&self) -> std::result::Result<Value, String> {
        (self.0)()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<function>")
    }
}

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Arc<dyn Object>),
    Function(Function),
}

impl Value {
    pub fn from_object<O: Object + 'static>(object: O) -> Self {
        Value::Object(Arc::new(object))
    }

    /// Wraps an infallible zero-argument callable.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Value::Function(Function(Arc::new(move || Ok(f()))))
    }

    /// Wraps a zero-argument callable whose error message surfaces as a
    /// resolution error.
    pub fn from_fallible_fn<F>(f: F) -> Self
    where
        F: Fn() -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Value::Function(Function(Arc::new(f)))
    }

    /// Converts any serializable value through its JSON representation.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(serde_json::to_value(value)?.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(a) => !a.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Elements visited by a `for` loop, or `None` if the value is not iterable.
    pub fn iterate(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.clone()),
            Value::Map(map) => Some(map.keys().cloned().map(Value::String).collect()),
            Value::String(s) => Some(s.chars().map(|c| Value::String(c.to_string())).collect()),
            Value::Object(obj) => obj.iterate(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            // Whole floats keep their decimal point so they read differently from ints.
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Object(obj) => f.write_str(&obj.render()),
            Value::Function(func) => write!(f, "{func:?}"),
        }
    }
}

/// The ordered lookup strategies tried for each segment of a dotted path.
pub trait Lookup {
    fn try_mapping_get(&self, key: &str) -> Option<Value>;
    fn try_attribute_get(&self, name: &str) -> Option<Value>;
    /// `Some` only for callables; the inner result is the call's outcome.
    fn try_zero_arg_call(&self) -> Option<std::result::Result<Value, String>>;
}

impl Lookup for Value {
    fn try_mapping_get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Map(map) => map.get(key).cloned(),
            Value::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            Value::Object(obj) => obj.get_item(key),
            _ => None,
        }
    }

    fn try_attribute_get(&self, name: &str) -> Option<Value> {
        match self {
            Value::Object(obj) => obj.get_attr(name),
            _ => None,
        }
    }

    fn try_zero_arg_call(&self) -> Option<std::result::Result<Value, String>> {
        match self {
            Value::Function(func) => Some(func.call()),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

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

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(map: BTreeMap<String, V>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Value {
    fn from(map: HashMap<String, V>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Per-render data: variable name to value.
///
/// The renderer only reads it; loop variables live in a separate overlay.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context {
    vars: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_var<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.vars.insert(key.into(), value.into());
    }

    /// Builder-style [`Context::set_var`].
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.set_var(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Builds a context from a JSON object; each top-level key becomes a variable.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self {
                vars: map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            }),
            other => Err(Error::InvalidContext(format!(
                "expected a JSON object at the root, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Builds a context from any struct or map that serializes to an object.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::from_json(serde_json::to_value(value)?)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
