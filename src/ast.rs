use std::collections::HashMap;
use std::fmt;

/// A dotted lookup followed by a left-to-right filter pipeline,
/// e.g. `user.name|lower|capitalize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarExpr {
    pub path: Vec<String>, // ["user", "name"]
    pub filters: Vec<String>,
}

impl fmt::Display for VarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path.join("."))?;
        for filter in &self.filters {
            write!(f, "|{filter}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Var(VarExpr),
    If {
        cases: Vec<(VarExpr, Vec<Node>)>, // (condition, body). Includes if and elifs.
        else_body: Option<Vec<Node>>,
    },
    For {
        target: String, // e.g., "item"
        iterable: VarExpr,
        body: Vec<Node>,
    },
    Block {
        name: String,
        body: Vec<Node>,
    },
    /// `{% super %}` inside a block: splice the overridden ancestor body here.
    Super,
    /// Leading `{% extends %}`; renders nothing, the parent is recorded on the template.
    Extends(String),
    Include(String),
}

/// A parsed template: top-level nodes plus what inheritance needs to know.
///
/// Built once by [`crate::compile`] or [`crate::Engine::compile`] and never
/// mutated afterwards, so a single instance can be rendered from many threads.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub(crate) name: Option<String>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) parent: Option<String>,
    pub(crate) blocks: HashMap<String, Vec<Node>>,
}

impl Template {
    /// The name this template was loaded under, if it came from a loader.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Target of the leading `{% extends %}` tag.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Body of a block defined in this template's own source.
    pub fn block(&self, name: &str) -> Option<&[Node]> {
        self.blocks.get(name).map(Vec::as_slice)
    }

    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }
}
