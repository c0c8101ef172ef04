use crate::ast::*;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::value::{Context, Lookup, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Walks an effective node tree against one context.
///
/// The caller's [`Context`] is only read. Loop variables go into a stack of
/// overlay scopes that is popped when each iteration finishes.
pub struct Evaluator<'a> {
    engine: &'a Engine,
    context: &'a Context,
    scopes: Vec<HashMap<String, Value>>,
    // Names of the templates currently being rendered, outermost first.
    includes: Vec<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(engine: &'a Engine, context: &'a Context) -> Self {
        Self {
            engine,
            context,
            scopes: Vec::new(),
            includes: Vec::new(),
        }
    }

    /// Records the name of the top-level template so it cannot include itself.
    pub fn rooted_at(mut self, name: Option<&str>) -> Self {
        self.includes.extend(name.map(str::to_string));
        self
    }

    fn get_var(&self, name: &str) -> Option<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(val) = scope.get(name) {
                return Some(val.clone());
            }
        }
        self.context.get(name).cloned()
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn set_local(&mut self, name: String, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, value);
        }
    }

    /// Renders `nodes`; on error nothing is returned, not even a partial buffer.
    pub fn render(&mut self, nodes: &[Node]) -> Result<String> {
        let mut output = String::new();
        self.render_into(nodes, &mut output)?;
        Ok(output)
    }

    fn render_into(&mut self, nodes: &[Node], output: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(s) => output.push_str(s),
                Node::Var(expr) => {
                    let val = self.eval_expr(expr)?;
                    output.push_str(&val.to_string());
                }
                Node::If { cases, else_body } => {
                    let mut matched = false;
                    for (cond, body) in cases {
                        if self.eval_expr(cond)?.is_truthy() {
                            self.render_into(body, output)?;
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        if let Some(body) = else_body {
                            self.render_into(body, output)?;
                        }
                    }
                }
                Node::For {
                    target,
                    iterable,
                    body,
                } => {
                    let iter_val = self.eval_expr(iterable)?;
                    let items = iter_val.iterate().ok_or_else(|| Error::NotIterable {
                        expr: iterable.to_string(),
                        kind: iter_val.kind(),
                    })?;
                    let len = items.len();
                    for (i, item) in items.into_iter().enumerate() {
                        self.push_scope();
                        self.set_local("loop".to_string(), loop_info(i, len));
                        self.set_local(target.clone(), item);
                        let result = self.render_into(body, output);
                        self.pop_scope();
                        result?;
                    }
                }
                Node::Block { body, .. } => self.render_into(body, output)?,
                // Only meaningful to the inheritance pass.
                Node::Super | Node::Extends(_) => {}
                Node::Include(name) => self.include(name, output)?,
            }
        }
        Ok(())
    }

    fn include(&mut self, name: &str, output: &mut String) -> Result<()> {
        if self.includes.iter().any(|n| n == name) {
            let mut chain = self.includes.clone();
            chain.push(name.to_string());
            return Err(Error::IncludeCycle(chain));
        }
        debug!(template = name, depth = self.includes.len(), "rendering include");
        let template = self.engine.get_template(name)?;
        let nodes = self.engine.effective_tree(&template)?;

        self.includes.push(name.to_string());
        let result = self.render_into(&nodes, output);
        self.includes.pop();
        result
    }

    /// Resolves the dotted path, then runs the filter pipeline.
    pub fn eval_expr(&self, expr: &VarExpr) -> Result<Value> {
        let value = self.resolve_path(&expr.path)?;
        self.engine.filters().apply_all(value, &expr.filters)
    }

    fn resolve_path(&self, path: &[String]) -> Result<Value> {
        let full = || path.join(".");
        let (head, rest) = path
            .split_first()
            .ok_or_else(|| Error::resolution("", "empty path"))?;

        let value = self
            .get_var(head)
            .ok_or_else(|| Error::resolution(full(), format!("'{head}' is not defined")))?;
        let mut value = call_if_callable(value, head, &full)?;

        for segment in rest {
            let next = value
                .try_mapping_get(segment)
                .or_else(|| value.try_attribute_get(segment))
                .ok_or_else(|| {
                    Error::resolution(
                        full(),
                        format!("{} has no key or attribute '{segment}'", value.kind()),
                    )
                })?;
            value = call_if_callable(next, segment, &full)?;
        }
        Ok(value)
    }
}

fn call_if_callable(value: Value, segment: &str, full: &dyn Fn() -> String) -> Result<Value> {
    match value.try_zero_arg_call() {
        Some(Ok(result)) => Ok(result),
        Some(Err(message)) => Err(Error::resolution(
            full(),
            format!("calling '{segment}' failed: {message}"),
        )),
        None => Ok(value),
    }
}

fn loop_info(index: usize, len: usize) -> Value {
    let mut info = BTreeMap::new();
    info.insert("index".to_string(), Value::from(index + 1));
    info.insert("index0".to_string(), Value::from(index));
    info.insert("first".to_string(), Value::Bool(index == 0));
    info.insert("last".to_string(), Value::Bool(index + 1 == len));
    info.insert("length".to_string(), Value::from(len));
    Value::Map(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Object;
    use serde_json::json;

    #[derive(Debug)]
    struct Doc {
        txt: String,
    }

    impl Object for Doc {
        fn get_attr(&self, name: &str) -> Option<Value> {
            match name {
                "txt" => Some(self.txt.clone().into()),
                "ditto" => {
                    let twice = format!("{0}{0}", self.txt);
                    Some(Value::from_fn(move || twice.clone().into()))
                }
                _ => None,
            }
        }

        fn get_item(&self, key: &str) -> Option<Value> {
            (key == "txt").then(|| Value::from("item wins"))
        }
    }

    fn expr(path: &str, filters: &[&str]) -> VarExpr {
        VarExpr {
            path: path.split('.').map(str::to_string).collect(),
            filters: filters.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn mapping_before_attribute_then_call() {
        let engine = Engine::new();
        let ctx = Context::new().with("doc", Value::from_object(Doc { txt: "Once".into() }));
        let ev = Evaluator::new(&engine, &ctx);
        assert_eq!(ev.eval_expr(&expr("doc.txt", &[])).unwrap(), Value::from("item wins"));
        assert_eq!(ev.eval_expr(&expr("doc.ditto", &[])).unwrap(), Value::from("OnceOnce"));
        assert_eq!(
            ev.eval_expr(&expr("doc.ditto", &["upper"])).unwrap(),
            Value::from("ONCEONCE")
        );
    }

    #[test]
    fn top_level_callables_are_invoked() {
        let engine = Engine::new();
        let ctx = Context::new().with("getit", Value::from_fn(|| json!({"x": "Hello"}).into()));
        let ev = Evaluator::new(&engine, &ctx);
        assert_eq!(ev.eval_expr(&expr("getit.x", &[])).unwrap(), Value::from("Hello"));
    }

    #[test]
    fn failing_callable_is_a_resolution_error() {
        let engine = Engine::new();
        let ctx = Context::new().with("boom", Value::from_fallible_fn(|| Err("no".to_string())));
        let ev = Evaluator::new(&engine, &ctx);
        match ev.eval_expr(&expr("boom", &[])) {
            Err(Error::Resolution { path, reason }) => {
                assert_eq!(path, "boom");
                assert!(reason.contains("no"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_segment_names_the_full_path() {
        let engine = Engine::new();
        let ctx = Context::from_json(json!({"foo": {"bar": null}})).unwrap();
        let ev = Evaluator::new(&engine, &ctx);
        match ev.eval_expr(&expr("foo.bar.baz", &[])) {
            Err(Error::Resolution { path, reason }) => {
                assert_eq!(path, "foo.bar.baz");
                assert_eq!(reason, "null has no key or attribute 'baz'");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn loop_scope_is_discarded_after_the_loop() {
        let engine = Engine::new();
        let ctx = Context::from_json(json!({"n": "outer", "nums": [1, 2]})).unwrap();
        let nodes = vec![
            Node::For {
                target: "n".into(),
                iterable: expr("nums", &[]),
                body: vec![Node::Var(expr("n", &[])), Node::Var(expr("loop.index", &[]))],
            },
            Node::Var(expr("n", &[])),
        ];
        let out = Evaluator::new(&engine, &ctx).render(&nodes).unwrap();
        assert_eq!(out, "1122outer");
        assert_eq!(ctx.get("n"), Some(&Value::from("outer")));
    }
}
