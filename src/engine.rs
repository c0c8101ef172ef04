use crate::ast::{Node, Template};
use crate::error::Result;
use crate::eval::Evaluator;
use crate::filters::{Filter, FilterRegistry};
use crate::inheritance;
use crate::loader::{Loader, MemoryLoader};
use crate::parser::Parser;
use crate::value::Context;
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::fmt;

/// Shared engine behind [`crate::compile`] and [`Template::render`]:
/// default filters, no loadable templates.
pub(crate) static DEFAULT_ENGINE: Lazy<Engine> = Lazy::new(Engine::new);

/// One independently configured template environment: the filters that
/// templates may use and where `extends`/`include` targets come from.
///
/// Engines hold no per-render state, so one engine (and any [`Template`]
/// it compiled) can serve concurrent renders.
pub struct Engine {
    filters: FilterRegistry,
    loader: Box<dyn Loader>,
}

impl Engine {
    /// Default filters and an empty in-memory loader.
    pub fn new() -> Self {
        Self::with_loader(MemoryLoader::new())
    }

    pub fn with_loader<L: Loader + 'static>(loader: L) -> Self {
        Self {
            filters: FilterRegistry::default(),
            loader: Box::new(loader),
        }
    }

    pub fn set_loader<L: Loader + 'static>(&mut self, loader: L) {
        self.loader = Box::new(loader);
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterRegistry {
        &mut self.filters
    }

    pub fn register_filter<F: Filter + 'static>(&mut self, name: impl Into<String>, filter: F) {
        self.filters.register(name, filter);
    }

    /// Tokenizes and parses `source`. Structural defects fail here, before
    /// any context is involved.
    pub fn compile(&self, source: &str) -> Result<Template> {
        Parser::new(source).parse()
    }

    /// Loads `name` through the loader and compiles it.
    pub fn get_template(&self, name: &str) -> Result<Template> {
        let source = self.loader.load(name)?;
        let mut template = self.compile(&source)?;
        template.name = Some(name.to_string());
        Ok(template)
    }

    /// The tree actually rendered for `template`, with every block taken
    /// from the most derived template in its `extends` chain.
    pub fn effective_tree<'t>(&self, template: &'t Template) -> Result<Cow<'t, [Node]>> {
        inheritance::resolve(self, template)
    }

    pub fn render_template(&self, template: &Template, context: &Context) -> Result<String> {
        let nodes = self.effective_tree(template)?;
        Evaluator::new(self, context)
            .rooted_at(template.name())
            .render(&nodes)
    }

    /// Loads, compiles and renders the template called `name`.
    pub fn render(&self, name: &str, context: &Context) -> Result<String> {
        let template = self.get_template(name)?;
        self.render_template(&template, context)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

impl Template {
    /// Renders with the default engine. Use [`Template::render_with`] when the
    /// template extends or includes others.
    pub fn render(&self, context: &Context) -> Result<String> {
        DEFAULT_ENGINE.render_template(self, context)
    }

    pub fn render_with(&self, engine: &Engine, context: &Context) -> Result<String> {
        engine.render_template(self, context)
    }
}
