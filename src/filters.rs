use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A named, argument-less transform applied to a resolved value.
pub trait Filter: Send + Sync {
    fn apply(&self, value: Value) -> Value;
}

impl<F> Filter for F
where
    F: Fn(Value) -> Value + Send + Sync,
{
    fn apply(&self, value: Value) -> Value {
        self(value)
    }
}

/// Filters available to one engine instance.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// A registry with no filters at all.
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    pub fn register<F: Filter + 'static>(&mut self, name: impl Into<String>, filter: F) {
        let name = name.into();
        trace!(filter = %name, "registering filter");
        self.filters.insert(name, Arc::new(filter));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    /// Runs `value` through `names` left to right.
    pub fn apply_all(&self, mut value: Value, names: &[String]) -> Result<Value> {
        for name in names {
            let filter = self
                .filters
                .get(name)
                .ok_or_else(|| Error::UnknownFilter(name.clone()))?;
            value = filter.apply(value);
        }
        Ok(value)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("upper", |v: Value| map_str(v, |s| s.to_uppercase()));
        registry.register("lower", |v: Value| map_str(v, |s| s.to_lowercase()));
        registry.register("capitalize", |v: Value| map_str(v, capitalize));
        registry.register("title", |v: Value| {
            map_str(v, |s| s.split(' ').map(capitalize).collect::<Vec<_>>().join(" "))
        });
        registry.register("trim", |v: Value| map_str(v, |s| s.trim().to_string()));
        registry.register("string", |v: Value| Value::String(v.to_string()));
        registry.register("escape", |v: Value| map_str(v, escape_html));
        registry.register("safe", |v: Value| v);
        registry.register("length", |v: Value| match &v {
            Value::String(s) => Value::from(s.chars().count()),
            Value::List(items) => Value::from(items.len()),
            Value::Map(map) => Value::from(map.len()),
            _ => v.iterate().map_or(Value::Int(0), |items| Value::from(items.len())),
        });
        registry.register("reverse", |v: Value| match v {
            Value::String(s) => Value::String(s.chars().rev().collect()),
            other => match other.iterate() {
                Some(mut items) => {
                    items.reverse();
                    Value::List(items)
                }
                None => other,
            },
        });
        registry.register("first", |v: Value| {
            v.iterate()
                .and_then(|items| items.into_iter().next())
                .unwrap_or(Value::Null)
        });
        registry.register("last", |v: Value| {
            v.iterate()
                .and_then(|items| items.into_iter().last())
                .unwrap_or(Value::Null)
        });
        registry
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("FilterRegistry").field("filters", &names).finish()
    }
}

// Non-string input is rendered to text first.
fn map_str(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => Value::String(f(&other.to_string())),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
