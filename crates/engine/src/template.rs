//! Template resolution for node configs and edge conditions.
//!
//! Templates are rendered with minijinja against the run's data context:
//!
//! ```json
//! {
//!   "url": "{{ variables.base_url }}/users/{{ input.user_id }}",
//!   "user": "{{ fetch_user }}",
//!   "token": "{{ nodes[\"get-token\"].value }}"
//! }
//! ```
//!
//! A string that is exactly one `{{ expr }}` keeps the JSON type of `expr`
//! (`"user"` above resolves to an object). Any other string containing
//! template syntax renders to a string, and plain strings pass through.
//! Undefined references are errors, never left in place.

use std::collections::BTreeMap;

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::TemplateError;

/// Root keys of the data context; a node whose logical ID collides with one
/// of these is only reachable through `nodes[...]`.
pub const RESERVED_KEYS: &[&str] = &["variables", "input", "nodes", "iteration"];

/// Accumulated data a run resolves templates against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataContext {
    variables: Map<String, Value>,
    input: Value,
    outputs: BTreeMap<String, Value>,
}

impl DataContext {
    pub fn new(variables: Map<String, Value>, input: Value) -> Self {
        Self {
            variables,
            input,
            outputs: BTreeMap::new(),
        }
    }

    /// Make a completed node's output visible to later scheduling steps.
    /// A later iteration of the same node replaces the earlier output.
    pub fn record_output(&mut self, node_id: &str, output: Value) {
        self.outputs.insert(node_id.to_owned(), output);
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    /// The JSON root templates see.
    pub fn snapshot(&self) -> Value {
        let mut root = Map::new();
        for (id, output) in &self.outputs {
            if !RESERVED_KEYS.contains(&id.as_str()) {
                root.insert(id.clone(), output.clone());
            }
        }
        root.insert("variables".into(), Value::Object(self.variables.clone()));
        root.insert("input".into(), self.input.clone());
        root.insert(
            "nodes".into(),
            Value::Object(
                self.outputs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        );
        Value::Object(root)
    }
}

#[derive(Serialize)]
struct Scope<'a> {
    #[serde(flatten)]
    data: &'a Value,
    iteration: u32,
}

/// Stateless, side-effect-free resolver. Safe to share across runs.
pub struct TemplateResolver {
    env: Environment<'static>,
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateResolver {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    /// Resolve every template in `template` against `data` (a
    /// [`DataContext::snapshot`]). `iteration` is exposed as `{{ iteration }}`.
    pub fn resolve(&self, template: &Value, data: &Value, iteration: u32) -> Result<Value, TemplateError> {
        let ctx = minijinja::Value::from_serialize(Scope { data, iteration });
        self.resolve_value(template, &ctx, "config")
    }

    /// Evaluate an edge condition such as `fetch.status == 200` (optionally
    /// wrapped in `{{ }}`) to a boolean using template truthiness.
    pub fn evaluate_condition(
        &self,
        condition: &str,
        data: &Value,
        iteration: u32,
        path: &str,
    ) -> Result<bool, TemplateError> {
        let expr = whole_expression(condition).unwrap_or_else(|| condition.trim());
        let ctx = minijinja::Value::from_serialize(Scope { data, iteration });
        let value = self.eval(expr, &ctx, path)?;
        Ok(value.is_true())
    }

    /// Syntax-only check of every template in `template`. Needs no data
    /// context, so it runs before an execution starts.
    pub fn check(&self, template: &Value, path: &str) -> Result<(), TemplateError> {
        match template {
            Value::String(s) => {
                if let Some(expr) = whole_expression(s) {
                    self.env.compile_expression(expr).map(|_| ()).map_err(|e| classify(&e, path))
                } else if has_template_syntax(s) {
                    self.env.template_from_str(s).map(|_| ()).map_err(|e| classify(&e, path))
                } else {
                    Ok(())
                }
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, item)| self.check(item, &format!("{path}[{i}]"))),
            Value::Object(map) => map
                .iter()
                .try_for_each(|(key, item)| self.check(item, &format!("{path}.{key}"))),
            _ => Ok(()),
        }
    }

    pub fn check_condition(&self, condition: &str, path: &str) -> Result<(), TemplateError> {
        let expr = whole_expression(condition).unwrap_or_else(|| condition.trim());
        self.env
            .compile_expression(expr)
            .map(|_| ())
            .map_err(|e| classify(&e, path))
    }

    fn resolve_value(&self, template: &Value, ctx: &minijinja::Value, path: &str) -> Result<Value, TemplateError> {
        match template {
            Value::String(s) => self.resolve_str(s, ctx, path),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.resolve_value(item, ctx, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key.clone(), self.resolve_value(item, ctx, &format!("{path}.{key}"))?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_str(&self, s: &str, ctx: &minijinja::Value, path: &str) -> Result<Value, TemplateError> {
        if let Some(expr) = whole_expression(s) {
            let value = self.eval(expr, ctx, path)?;
            return serde_json::to_value(&value).map_err(|e| TemplateError::Unresolved {
                path: path.to_owned(),
                message: e.to_string(),
            });
        }
        if !has_template_syntax(s) {
            return Ok(Value::String(s.to_owned()));
        }
        self.env
            .render_str(s, ctx.clone())
            .map(Value::String)
            .map_err(|e| classify(&e, path))
    }

    fn eval(&self, expr: &str, ctx: &minijinja::Value, path: &str) -> Result<minijinja::Value, TemplateError> {
        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(|e| classify(&e, path))?;
        let value = compiled.eval(ctx.clone()).map_err(|e| classify(&e, path))?;
        if value.is_undefined() {
            return Err(TemplateError::Unresolved {
                path: path.to_owned(),
                message: format!("'{expr}' is undefined"),
            });
        }
        Ok(value)
    }
}

/// The inner expression when `s` is exactly one `{{ … }}` tag.
fn whole_expression(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") || inner.contains("{%") {
        return None;
    }
    let inner = inner.trim_start_matches('-').trim_end_matches('-').trim();
    (!inner.is_empty()).then_some(inner)
}

fn has_template_syntax(s: &str) -> bool {
    s.contains("{{") || s.contains("{%") || s.contains("{#")
}

fn classify(err: &minijinja::Error, path: &str) -> TemplateError {
    let path = path.to_owned();
    let message = err.to_string();
    match err.kind() {
        ErrorKind::SyntaxError => TemplateError::Syntax { path, message },
        _ => TemplateError::Unresolved { path, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        let mut vars = Map::new();
        vars.insert("base_url".into(), json!("https://api.example.com"));
        let mut ctx = DataContext::new(vars, json!({ "user_id": 42, "tags": ["a", "b"] }));
        ctx.record_output("fetch", json!({ "status": 200, "body": { "name": "Ada" } }));
        ctx.record_output("get-token", json!({ "value": "t0k" }));
        ctx.record_output("input", json!({ "shadowed": true }));
        ctx.snapshot()
    }

    #[test]
    fn whole_expression_keeps_json_type() {
        let resolver = TemplateResolver::new();
        let out = resolver
            .resolve(
                &json!({ "body": "{{ fetch.body }}", "code": "{{ fetch.status }}", "tags": "{{input.tags}}" }),
                &context(),
                1,
            )
            .unwrap();
        assert_eq!(out["body"], json!({ "name": "Ada" }));
        assert_eq!(out["code"], json!(200));
        assert_eq!(out["tags"], json!(["a", "b"]));
    }

    #[test]
    fn mixed_strings_render_and_plain_strings_pass_through() {
        let resolver = TemplateResolver::new();
        let out = resolver
            .resolve(
                &json!({
                    "url": "{{ variables.base_url }}/users/{{ input.user_id }}",
                    "greeting": "Hello {{ fetch.body.name }}!",
                    "literal": "no templates here",
                    "nested": [{ "token": "{{ nodes[\"get-token\"].value }}" }, 7, null]
                }),
                &context(),
                1,
            )
            .unwrap();
        assert_eq!(out["url"], "https://api.example.com/users/42");
        assert_eq!(out["greeting"], "Hello Ada!");
        assert_eq!(out["literal"], "no templates here");
        assert_eq!(out["nested"], json!([{ "token": "t0k" }, 7, null]));
    }

    #[test]
    fn dangling_reference_is_an_error_with_its_path() {
        let resolver = TemplateResolver::new();
        let err = resolver
            .resolve(&json!({ "headers": { "auth": "{{ login.token }}" } }), &context(), 1)
            .unwrap_err();
        assert!(matches!(
            &err,
            TemplateError::Unresolved { path, .. } if path == "config.headers.auth"
        ));

        let err = resolver
            .resolve(&json!("id={{ fetch.body.missing }}"), &context(), 1)
            .unwrap_err();
        assert!(matches!(err, TemplateError::Unresolved { .. }));
    }

    #[test]
    fn broken_syntax_is_reported_as_syntax() {
        let resolver = TemplateResolver::new();
        let err = resolver.resolve(&json!("{{ fetch. }}"), &context(), 1).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn resolution_is_repeatable() {
        let resolver = TemplateResolver::new();
        let template = json!({ "a": "{{ fetch.status }}", "b": "x{{ input.user_id }}" });
        let ctx = context();
        let first = resolver.resolve(&template, &ctx, 1).unwrap();
        let second = resolver.resolve(&template, &ctx, 1).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn reserved_names_win_over_node_ids() {
        let resolver = TemplateResolver::new();
        let ctx = context();
        assert_eq!(resolver.resolve(&json!("{{ input.user_id }}"), &ctx, 1).unwrap(), json!(42));
        assert_eq!(
            resolver.resolve(&json!("{{ nodes.input.shadowed }}"), &ctx, 1).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn syntax_check_needs_no_data() {
        let resolver = TemplateResolver::new();
        assert!(resolver
            .check(&json!({ "a": "{{ later.value }}", "b": ["x {{ y }} z", 3] }), "config")
            .is_ok());
        let err = resolver.check(&json!({ "a": ["{% if %}"] }), "config").unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { path, .. } if path == "config.a[0]"));
        assert!(resolver.check_condition("a.ok and", "edges.e.condition").is_err());
    }

    #[test]
    fn iteration_is_exposed() {
        let resolver = TemplateResolver::new();
        assert_eq!(resolver.resolve(&json!("{{ iteration }}"), &context(), 3).unwrap(), json!(3));
    }

    #[test]
    fn conditions_use_truthiness() {
        let resolver = TemplateResolver::new();
        let ctx = context();
        assert!(resolver.evaluate_condition("fetch.status == 200", &ctx, 1, "e").unwrap());
        assert!(resolver.evaluate_condition("{{ input.user_id > 40 }}", &ctx, 1, "e").unwrap());
        assert!(!resolver.evaluate_condition("false", &ctx, 1, "e").unwrap());
        assert!(!resolver.evaluate_condition("input.tags | length > 5", &ctx, 1, "e").unwrap());
        assert!(resolver.evaluate_condition("ghost.ok", &ctx, 1, "e").is_err());
    }
}
