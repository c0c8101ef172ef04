use crate::error::{Error, Result};
use std::collections::HashMap;

/// Supplies template source text by name for `extends` and `include`.
pub trait Loader: Send + Sync {
    fn load(&self, name: &str) -> Result<String>;
}

impl<F> Loader for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn load(&self, name: &str) -> Result<String> {
        self(name).ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }
}

/// Templates held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    templates: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.add(name, source);
        self
    }
}

impl Loader for MemoryLoader {
    fn load(&self, name: &str) -> Result<String> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryLoader {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            templates: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_finds_added_templates() {
        let loader = MemoryLoader::new().with("a", "A");
        assert_eq!(loader.load("a").unwrap(), "A");
        assert!(matches!(loader.load("b"), Err(Error::TemplateNotFound(n)) if n == "b"));
    }

    #[test]
    fn closures_are_loaders() {
        let loader = |name: &str| (name == "x").then(|| "X".to_string());
        assert_eq!(loader.load("x").unwrap(), "X");
        assert!(matches!(loader.load("y"), Err(Error::TemplateNotFound(_))));
    }
}
