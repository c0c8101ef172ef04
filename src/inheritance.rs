//! Block inheritance: turns a template and its `extends` chain into the
//! single effective node tree that gets rendered.
//!
//! Resolution happens in two passes. First the ancestor chain is loaded
//! bottom-up (child, parent, grandparent, ...) so every template's local block
//! map is available. Then the root's nodes are walked top-down and each block
//! is replaced by the body from the most derived template that defines it.
//! Nothing in the input templates is modified.

use crate::ast::{Node, Template};
use crate::engine::Engine;
use crate::error::{Error, Result};
use std::borrow::Cow;
use tracing::debug;

/// Effective nodes for `template`. Templates without a parent are returned as-is.
pub(crate) fn resolve<'t>(engine: &Engine, template: &'t Template) -> Result<Cow<'t, [Node]>> {
    if template.parent.is_none() {
        return Ok(Cow::Borrowed(&template.nodes));
    }
    let ancestors = load_ancestors(engine, template)?;
    let levels: Vec<&Template> = std::iter::once(template).chain(ancestors.iter()).collect();
    let root = levels[levels.len() - 1];

    let chain = Chain { levels: &levels };
    let nodes = chain.nodes(&root.nodes, None, &mut Vec::new())?;
    debug!(
        template = ?template.name,
        depth = levels.len(),
        root = ?root.name,
        "resolved inheritance chain"
    );
    Ok(Cow::Owned(nodes))
}

/// Parents of `template`, nearest first.
fn load_ancestors(engine: &Engine, template: &Template) -> Result<Vec<Template>> {
    let mut seen: Vec<String> = template.name.iter().cloned().collect();
    let mut ancestors = Vec::new();
    let mut next = template.parent.clone();
    while let Some(name) = next {
        if seen.contains(&name) {
            seen.push(name);
            return Err(Error::ExtendsCycle(seen));
        }
        debug!(parent = %name, "loading parent template");
        let parent = engine.get_template(&name)?;
        next = parent.parent.clone();
        seen.push(name);
        ancestors.push(parent);
    }
    Ok(ancestors)
}

/// Templates from most derived (index 0) to root.
struct Chain<'a> {
    levels: &'a [&'a Template],
}

impl<'a> Chain<'a> {
    /// First template at or above `from` that defines `name`.
    fn definer(&self, name: &str, from: usize) -> Option<(usize, &'a [Node])> {
        self.levels
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(level, t)| t.blocks.get(name).map(|body| (level, body.as_slice())))
    }

    /// Expands the body that `level` defines for block `name`.
    ///
    /// `active` holds every (block, level) body currently being expanded; a
    /// repeat means overrides and `{% super %}` splices feed back into
    /// each other.
    fn expand(
        &self,
        name: &'a str,
        level: usize,
        body: &'a [Node],
        active: &mut Vec<(&'a str, usize)>,
    ) -> Result<Vec<Node>> {
        if active.contains(&(name, level)) {
            let mut cycle: Vec<String> = active.iter().map(|(n, l)| self.label(n, *l)).collect();
            cycle.push(self.label(name, level));
            return Err(Error::BlockCycle(cycle));
        }
        active.push((name, level));
        let nodes = self.nodes(body, Some((name, level)), active);
        active.pop();
        nodes
    }

    fn label(&self, block: &str, level: usize) -> String {
        let template = self.levels[level].name.as_deref().unwrap_or("<anonymous>");
        format!("{template}:{block}")
    }

    /// `current` is the block being expanded and the level its body came from,
    /// which is where `{% super %}` starts looking.
    fn nodes(
        &self,
        nodes: &'a [Node],
        current: Option<(&'a str, usize)>,
        active: &mut Vec<(&'a str, usize)>,
    ) -> Result<Vec<Node>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::Block { name, body } => {
                    let body = match self.definer(name, 0) {
                        Some((level, over)) => self.expand(name, level, over, active)?,
                        None => self.nodes(body, current, active)?,
                    };
                    out.push(Node::Block {
                        name: name.clone(),
                        body,
                    });
                }
                Node::Super => {
                    if let Some((name, level)) = current {
                        if let Some((above, body)) = self.definer(name, level + 1) {
                            out.extend(self.expand(name, above, body, active)?);
                        }
                    }
                }
                Node::If { cases, else_body } => {
                    let mut resolved = Vec::with_capacity(cases.len());
                    for (cond, body) in cases {
                        resolved.push((cond.clone(), self.nodes(body, current, active)?));
                    }
                    let else_body = match else_body {
                        Some(body) => Some(self.nodes(body, current, active)?),
                        None => None,
                    };
                    out.push(Node::If {
                        cases: resolved,
                        else_body,
                    });
                }
                Node::For {
                    target,
                    iterable,
                    body,
                } => out.push(Node::For {
                    target: target.clone(),
                    iterable: iterable.clone(),
                    body: self.nodes(body, current, active)?,
                }),
                other => out.push(other.clone()),
            }
        }
        Ok(out)
    }
}
