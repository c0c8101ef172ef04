//! templite: a small template compiler.
//!
//! Source text is tokenized, parsed into a node tree, resolved against its
//! `extends` chain, and rendered against a [`Context`]. A compiled
//! [`Template`] is immutable and can be rendered any number of times.
//!
//! Supported syntax:
//! - `{{ user.name|lower|capitalize }}`: dotted lookup (mapping key, then
//!   attribute, then zero-argument call at each step) and a filter pipeline.
//! - `{% if x %} ... {% elif y %} ... {% else %} ... {% endif %}`.
//! - `{% for item in items %} ... {% endfor %}`, with `loop.index`,
//!   `loop.index0`, `loop.first`, `loop.last` and `loop.length` in the body.
//! - `{% block name %} ... {% endblock %}`, `{% extends "base" %}`,
//!   `{% super %}` and `{% include "partial" %}`.
//! - `{# comments #}`, which may span lines.
//!
//! Not supported: filter arguments, multi-variable loops, whitespace
//! control, custom tags and automatic escaping.
//!
//! Whitespace in literal text is emitted exactly as written.
//!
//! ```
//! use templite::{Context, Engine, MemoryLoader};
//!
//! let loader = MemoryLoader::new()
//!     .with("base.html", "<title>{% block title %}Base{% endblock %}</title>")
//!     .with("page.html", "{% extends \"base.html\" %}{% block title %}{{ name|upper }}{% endblock %}");
//! let engine = Engine::with_loader(loader);
//!
//! let ctx = Context::new().with("name", "home");
//! assert_eq!(engine.render("page.html", &ctx).unwrap(), "<title>HOME</title>");
//! ```

pub mod ast;
pub mod engine;
pub mod error;
pub mod eval;
pub mod filters;
mod inheritance;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod value;

pub use ast::{Node, Template, VarExpr};
pub use engine::Engine;
pub use error::{Error, Result};
pub use filters::{Filter, FilterRegistry};
pub use loader::{Loader, MemoryLoader};
pub use value::{Context, Lookup, Object, Value};

/// Compiles `source` into a reusable [`Template`].
///
/// Templates compiled here render with the default engine through
/// [`Template::render`]; pass an [`Engine`] to [`Template::render_with`] to
/// resolve `extends` and `include`.
pub fn compile(source: &str) -> Result<Template> {
    engine::DEFAULT_ENGINE.compile(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_text_passes_through() {
        let ctx = Context::new();
        assert_eq!(compile("Hello").unwrap().render(&ctx).unwrap(), "Hello");
        assert_eq!(
            compile("Hello, 20% fun time!").unwrap().render(&ctx).unwrap(),
            "Hello, 20% fun time!"
        );
    }

    #[test]
    fn simple_for_loop_over_messages() {
        // Newlines come solely from the template body.
        let template = compile(
            "{% for message in messages %}{{ message.role }}: {{ message.content }}\n{% endfor %}",
        )
        .unwrap();
        let ctx = Context::from_json(serde_json::json!({
            "messages": [
                {"role": "system", "content": "You are a helpful assistant."},
                {"role": "user", "content": "Hello"},
            ]
        }))
        .unwrap();

        assert_eq!(
            template.render(&ctx).unwrap(),
            "system: You are a helpful assistant.\nuser: Hello\n"
        );
    }

    #[test]
    fn reusable_across_contexts() {
        let template = compile("This is {{name|upper}}{{punct}}").unwrap();
        let ned = Context::new().with("name", "Ned").with("punct", "!");
        let ben = Context::new().with("name", "Ben").with("punct", "!");
        assert_eq!(template.render(&ned).unwrap(), "This is NED!");
        assert_eq!(template.render(&ben).unwrap(), "This is BEN!");
        assert_eq!(template.render(&ned).unwrap(), "This is NED!");
    }

    #[test]
    fn missing_endfor_fails_to_compile() {
        assert!(matches!(
            compile("before {% for message in messages %}broken"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn missing_closing_delimiter_fails_to_compile() {
        assert!(matches!(
            compile("oops {% for message in messages broken"),
            Err(Error::Tokenize { .. })
        ));
    }
}
