//! Orchestrates resolution of one key: fetch the raw value, detect circular
//! references across the recursion chain, invoke a [`TemplateEngine`] with a
//! lazy lookup that recurses back into the [`Renderer`], and cache the
//! result per scope.
use crate::context::{DebugEntry, DebugReport, QueryContext};
use crate::engine::{EngineKind, ExpandVars, TemplateEngine};
use crate::error::{RenderError, StoreError};
use crate::expand::{Expander, Lookup, LookupResult, PidValue};
use crate::settings::Settings;
use crate::store::LayerStore;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;

/// Resolves variables in one [`crate::LayerStore`] scope.
///
/// Bound to a single scope for its lifetime; the expansion cache
/// (`key -> expanded value`) lives on the `Renderer`, not the store, so
/// discarding the `Renderer` discards the cache. The cache is never
/// invalidated automatically when a layer changes — a caller who mutates
/// the store after constructing a `Renderer` must build a new one.
pub struct Renderer<'store> {
    store: &'store LayerStore,
    scope: Option<String>,
    engine: Box<dyn TemplateEngine>,
    cache: RefCell<HashMap<String, String>>,
}

impl<'store> Debug for Renderer<'store> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("scope", &self.scope)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<'store> Renderer<'store> {
    /// Create a Renderer bound to `scope` (or the default, scope-less
    /// ordering if `None`), using the `expandvars` engine with default
    /// [`Expander`] options (`$`, non-strict, no `recover_null`) except pid
    /// expansion, which the render path disables — `$$` renders as a
    /// literal double dollar sign rather than the process id (spec §8
    /// scenario 6). A standalone [`Expander`] still defaults pid expansion
    /// to on; only the renderer's default construction turns it off.
    pub fn new(store: &'store LayerStore, scope: impl Into<Option<String>>) -> Self {
        Self::with_engine(store, scope, EngineKind::ExpandVars)
    }

    /// Create a Renderer using the given [`EngineKind`], with default
    /// [`Expander`] options where applicable, except that an
    /// [`EngineKind::ExpandVars`] engine has pid expansion disabled (see
    /// [`Renderer::new`]).
    pub fn with_engine(
        store: &'store LayerStore,
        scope: impl Into<Option<String>>,
        kind: EngineKind,
    ) -> Self {
        let engine: Box<dyn TemplateEngine> = match kind {
            EngineKind::ExpandVars => Box::new(ExpandVars::new(
                Expander::new().with_pid_value(PidValue::Disabled),
            )),
            EngineKind::StringTemplate => <dyn TemplateEngine>::for_kind(kind),
        };
        Self::with_template_engine(store, scope, engine)
    }

    /// Create a Renderer using the `expandvars` engine configured with a
    /// caller-supplied [`Expander`] (var symbol, strict mode, pid value,
    /// recover_null).
    pub fn with_expander(
        store: &'store LayerStore,
        scope: impl Into<Option<String>>,
        expander: Expander,
    ) -> Self {
        Self::with_template_engine(store, scope, Box::new(ExpandVars::new(expander)))
    }

    /// Create a Renderer using any [`TemplateEngine`] implementation.
    pub fn with_template_engine(
        store: &'store LayerStore,
        scope: impl Into<Option<String>>,
        engine: Box<dyn TemplateEngine>,
    ) -> Self {
        Self {
            store,
            scope: scope.into(),
            engine,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// The scope this Renderer resolves against.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Render `key` using [`Settings::default`].
    pub fn render(&self, key: &str) -> Result<Value, RenderError> {
        self.render_with(key, Settings::default())
    }

    /// Render `key` with explicit settings.
    pub fn render_with(&self, key: &str, settings: Settings) -> Result<Value, RenderError> {
        let ctx = QueryContext::root(key, settings);
        self.render_inner(key, &ctx)
    }

    /// Render `key` with explicit settings, also returning the accumulated
    /// [`DebugReport`] regardless of `settings.debug` (the report is simply
    /// empty if debug reporting wasn't enabled).
    pub fn render_debug(
        &self,
        key: &str,
        settings: Settings,
    ) -> Result<(Value, DebugReport), RenderError> {
        let ctx = QueryContext::root(key, settings);
        let value = self.render_inner(key, &ctx)?;
        Ok((value, ctx.into_report()))
    }

    /// Render every variable visible in this Renderer's scope.
    ///
    /// Named `render_all`; the Python implementation this crate supersedes
    /// calls the equivalent method `render_values`.
    pub fn render_all(&self, settings: Settings) -> Result<Map<String, Value>, RenderError> {
        let names = self.store.get_var_names(self.scope.as_deref())?;
        let mut out = Map::new();
        for name in names {
            let value = self.render_with(&name, settings.clone())?;
            out.insert(name, value);
        }
        Ok(out)
    }

    fn render_inner(&self, key: &str, ctx: &QueryContext) -> Result<Value, RenderError> {
        if ctx.settings.cache {
            if let Some(cached) = self.cache.borrow().get(key) {
                let cached = cached.clone();
                ctx.record(|| DebugEntry {
                    key: key.to_string(),
                    scope: self.scope.clone(),
                    source: None,
                    raw: None,
                    rendered: Some(cached.clone()),
                    cached: true,
                });
                return Ok(Value::String(cached));
            }
        }

        let raw = match self.store.get_value(key, self.scope.as_deref()) {
            Ok(raw) => raw,
            Err(err @ StoreError::UndefinedVar { .. }) => {
                let render_err = RenderError::Store(err);
                let value = ctx.settings.on_undefined_error.resolve(key, render_err)?;
                return Ok(Value::String(value));
            }
            Err(err) => return Err(err.into()),
        };

        if !ctx.settings.template {
            return Ok(raw);
        }

        let text = match &raw {
            Value::String(s) => s.clone(),
            _ => return Ok(raw),
        };

        if !self.engine.is_template(&text) {
            return Ok(Value::String(text));
        }

        let mut lookup = RenderLookup {
            renderer: self,
            ctx,
            error: RefCell::new(None),
        };
        let expanded = self.engine.expand(&text, &mut lookup);

        if let Some(err) = lookup.error.into_inner() {
            // Cycle (and anything else the nested lookup observed) is never
            // suppressed by settings, regardless of what the engine itself
            // returned.
            return Err(err);
        }

        let rendered = match expanded {
            Ok(value) => value,
            Err(expand_err) => {
                let render_err = RenderError::Expand(expand_err);
                tracing::warn!(
                    key,
                    error = %render_err,
                    "templating error, returning raw value"
                );
                match &ctx.settings.on_templating_error {
                    Some(policy) => policy.resolve(&text, render_err)?,
                    None => text.clone(),
                }
            }
        };

        if ctx.settings.cache {
            self.cache
                .borrow_mut()
                .insert(key.to_string(), rendered.clone());
        }

        let source = self
            .store
            .inspect_var(key, self.scope.as_deref())
            .ok()
            .and_then(|layers| layers.first().map(|l| l.source().name().to_string()));
        ctx.record(|| DebugEntry {
            key: key.to_string(),
            scope: self.scope.clone(),
            source,
            raw: Some(raw.clone()),
            rendered: Some(rendered.clone()),
            cached: false,
        });

        Ok(Value::String(rendered))
    }
}

/// The lazy lookup handed to the [`TemplateEngine`]: on each requested name,
/// recurses back into [`Renderer::render_inner`] rather than materializing
/// every value up front.
///
/// [`Lookup::get`] can't return a `Result` (the expander grammar treats
/// "missing" as a plain value, not a fallible operation), so errors that
/// must survive past the engine's own undefined/strict handling — circular
/// references above all — are stashed in `error` and re-raised by
/// [`Renderer::render_inner`] once [`TemplateEngine::expand`] returns.
struct RenderLookup<'a, 'store> {
    renderer: &'a Renderer<'store>,
    ctx: &'a QueryContext,
    error: RefCell<Option<RenderError>>,
}

impl<'a, 'store> Lookup for RenderLookup<'a, 'store> {
    fn get(&mut self, name: &str) -> LookupResult {
        if self.error.borrow().is_some() {
            return LookupResult::Missing;
        }

        let child_ctx = match self.ctx.child(name) {
            Ok(ctx) => ctx,
            Err(err) => {
                *self.error.borrow_mut() = Some(err);
                return LookupResult::Missing;
            }
        };

        match self.renderer.render_inner(name, &child_ctx) {
            Ok(value) => LookupResult::Found(value_to_plain_string(&value)),
            Err(RenderError::Store(StoreError::UndefinedVar { .. })) => {
                match &self.ctx.settings.on_undefined_template_error {
                    Some(policy) => {
                        let err = RenderError::Store(StoreError::UndefinedVar {
                            name: name.to_string(),
                            scope: self.renderer.scope.clone(),
                        });
                        match policy.resolve(name, err) {
                            Ok(value) => LookupResult::Found(value),
                            Err(err) => {
                                *self.error.borrow_mut() = Some(err);
                                LookupResult::Missing
                            }
                        }
                    }
                    // Default (§4.3 table: "return raw value" is a
                    // templating-error fallback, not an undefined one):
                    // propagate, matching spec §8 scenario 4 and the
                    // original's `pytest.raises(UndefinedVarError)` around
                    // a nested `${not_existing}` reference.
                    None => {
                        let err = RenderError::Store(StoreError::UndefinedVar {
                            name: name.to_string(),
                            scope: self.renderer.scope.clone(),
                        });
                        *self.error.borrow_mut() = Some(err);
                        LookupResult::Missing
                    }
                }
            }
            Err(err) => {
                *self.error.borrow_mut() = Some(err);
                LookupResult::Missing
            }
        }
    }

    fn set(&mut self, _name: &str, _value: &str) -> bool {
        // The store is read-only during rendering; `${X:=default}`
        // degrades to `${X:-default}` against it.
        false
    }
}

/// Render a non-string [`Value`] the way a shell environment would: numbers
/// and booleans as their literal text, `null` as an empty string, and
/// arrays/objects as compact JSON (there is no shell-native representation
/// for them, so this is the least-surprising fallback for a value that
/// reached a string-templating context).
fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ErrorPolicy;
    use crate::store::Source;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store_with(pairs: &[(&str, &str)]) -> LayerStore {
        let mut store = LayerStore::new();
        store.add_source(Source::new("s", None, None), false).unwrap();
        let mut payload = Map::new();
        for (k, v) in pairs {
            payload.insert(k.to_string(), json!(v));
        }
        store.set_layer("s", payload, Map::new()).unwrap();
        store
    }

    #[test]
    fn test_render_template_with_template_false_returns_raw() {
        let store = store_with(&[("x", "${missing}")]);
        let renderer = Renderer::new(&store, None);
        let settings = Settings::default().with_template(false);
        assert_eq!(renderer.render_with("x", settings).unwrap(), json!("${missing}"));
    }

    #[test]
    fn test_non_string_passthrough() {
        let mut store = LayerStore::new();
        store.add_source(Source::new("s", None, None), false).unwrap();
        let mut payload = Map::new();
        payload.insert("n".into(), json!(42));
        payload.insert("b".into(), json!(true));
        store.set_layer("s", payload, Map::new()).unwrap();
        let renderer = Renderer::new(&store, None);
        assert_eq!(renderer.render("n").unwrap(), json!(42));
        assert_eq!(renderer.render("b").unwrap(), json!(true));
    }

    #[test]
    fn test_scope_precedence_end_to_end() {
        let mut store = LayerStore::new();
        store
            .add_sources(
                [
                    Source::new("app_cli", Some(300), None),
                    Source::new("project_env", Some(300), None),
                    Source::new("stack_env", Some(300), None),
                ],
                false,
            )
            .unwrap();
        store
            .set_scopes([
                ("scope_app".to_string(), vec!["app_cli".to_string()]),
                (
                    "scope_project".to_string(),
                    vec!["project_env".to_string(), "scope_app".to_string()],
                ),
                (
                    "scope_stack".to_string(),
                    vec!["stack_env".to_string(), "scope_project".to_string()],
                ),
            ])
            .unwrap();

        let mut app_cli = Map::new();
        app_cli.insert("app_name".into(), json!("dataset1"));
        store.set_layer("app_cli", app_cli, Map::new()).unwrap();

        let mut project_env = Map::new();
        project_env.insert("project_name".into(), json!("project1+${stack_name}"));
        store.set_layer("project_env", project_env, Map::new()).unwrap();

        let mut stack_env = Map::new();
        stack_env.insert("stack_name".into(), json!("dataset3"));
        stack_env.insert("stack_fname".into(), json!("${project_name}_${stack_name}"));
        store.set_layer("stack_env", stack_env, Map::new()).unwrap();

        let renderer = Renderer::new(&store, Some("scope_stack".to_string()));
        assert_eq!(
            renderer.render("stack_fname").unwrap(),
            json!("project1+dataset3_dataset3")
        );
    }

    #[test]
    fn test_circular_reference_is_detected() {
        let mut store = LayerStore::new();
        store.add_source(Source::new("s", None, None), false).unwrap();
        let mut payload = Map::new();
        payload.insert("project_name".into(), json!("a+${stack_fname}"));
        payload.insert("stack_fname".into(), json!("b+${project_name}"));
        store.set_layer("s", payload, Map::new()).unwrap();

        let renderer = Renderer::new(&store, None);
        let err = renderer.render("stack_fname").unwrap_err();
        match err {
            RenderError::Circular { chain, .. } => {
                assert!(chain.contains(&"stack_fname".to_string()));
                assert!(chain.contains(&"project_name".to_string()));
            }
            other => panic!("expected Circular, got {other:?}"),
        }
    }

    #[test]
    fn test_undefined_handling_policies() {
        let store = store_with(&[("x", "${missing}")]);
        let renderer = Renderer::new(&store, None);

        // Default: a nested reference to an undefined key raises, per
        // spec §8 scenario 4.
        let err = renderer.render("x").unwrap_err();
        assert!(matches!(err, RenderError::Store(StoreError::UndefinedVar { .. })));

        let settings = Settings::default()
            .with_on_undefined_template_error(ErrorPolicy::Literal("<U>".to_string()));
        assert_eq!(renderer.render_with("x", settings).unwrap(), json!("<U>"));

        let settings = Settings::default().with_on_undefined_template_error(
            ErrorPolicy::callback(|key, _err| format!("?{key}")),
        );
        assert_eq!(renderer.render_with("x", settings).unwrap(), json!("?missing"));
    }

    #[test]
    fn test_undefined_top_level_key_default_raises() {
        let store = store_with(&[]);
        let renderer = Renderer::new(&store, None);
        let err = renderer.render("nope").unwrap_err();
        assert!(matches!(err, RenderError::Store(StoreError::UndefinedVar { .. })));
    }

    #[test]
    fn test_undefined_top_level_key_literal_policy() {
        let store = store_with(&[]);
        let renderer = Renderer::new(&store, None);
        let settings =
            Settings::default().with_on_undefined_error(ErrorPolicy::Literal("<U>".to_string()));
        assert_eq!(renderer.render_with("nope", settings).unwrap(), json!("<U>"));
    }

    #[test]
    fn test_mixed_escapes_and_pid_passthrough() {
        // The render path disables pid expansion (spec §8 scenario 6): `$$`
        // renders literally rather than as the process id.
        let store = store_with(&[("base", "value"), ("mixed", "$$literal_${base}_$$another")]);
        let renderer = Renderer::new(&store, None);
        assert_eq!(
            renderer.render("mixed").unwrap(),
            json!("$$literal_value_$$another")
        );
    }

    #[test]
    fn test_templating_parse_error_passes_through_raw_by_default() {
        let store = store_with(&[("x", "${var_without_closing")]);
        let renderer = Renderer::new(&store, None);
        assert_eq!(renderer.render("x").unwrap(), json!("${var_without_closing"));
    }

    #[test]
    fn test_caching_returns_stable_results() {
        let store = store_with(&[("x", "${base}"), ("base", "value")]);
        let renderer = Renderer::new(&store, None);
        assert_eq!(renderer.render("x").unwrap(), renderer.render("x").unwrap());

        let settings = Settings::default().with_cache(false);
        assert_eq!(
            renderer.render_with("x", settings.clone()).unwrap(),
            renderer.render_with("x", settings).unwrap()
        );
    }

    #[test]
    fn test_debug_report_records_entries() {
        let store = store_with(&[("x", "${base}"), ("base", "value")]);
        let renderer = Renderer::new(&store, None);
        let settings = Settings::default().with_debug(true);
        let (value, report) = renderer.render_debug("x", settings).unwrap();
        assert_eq!(value, json!("value"));
        assert!(report.entries.iter().any(|e| e.key == "x"));
        assert!(report.entries.iter().any(|e| e.key == "base"));
    }

    #[test]
    fn test_with_expander_strict_mode_raises_unbound() {
        // "missing" is present but empty, so the store resolves it
        // successfully and the expander's own strict handling — an
        // `ExpandError`, governed by `on_templating_error` — is what
        // raises; a reference to a key absent from the store entirely is
        // instead a child-render `UndefinedVar` and raises before the
        // expander ever sees it (see `test_undefined_handling_policies`).
        // `on_templating_error` must be set to `Raise` explicitly: its
        // default is "return the raw value", which would otherwise
        // swallow the strict-mode error.
        let store = store_with(&[("x", "${missing}"), ("missing", "")]);
        let expander = Expander::new().with_strict(true);
        let renderer = Renderer::with_expander(&store, None, expander);
        let settings = Settings::default().with_on_templating_error(ErrorPolicy::Raise);
        let err = renderer.render_with("x", settings).unwrap_err();
        assert!(matches!(err, RenderError::Expand(crate::error::ExpandError::UnboundVariable(_))));
    }

    #[test]
    fn test_with_expander_strict_mode_recover_null() {
        // See `test_with_expander_strict_mode_raises_unbound`: "missing"
        // must be present-but-empty for the expander's own strict/recover
        // handling to be what's exercised, rather than the render-level
        // undefined-key policy.
        let store = store_with(&[("x", "${missing}"), ("missing", "")]);
        let expander = Expander::new()
            .with_strict(true)
            .with_recover_null("fallback");
        let renderer = Renderer::with_expander(&store, None, expander);
        assert_eq!(renderer.render("x").unwrap(), json!("fallback"));
    }

    #[test]
    fn test_with_expander_custom_var_symbol() {
        let store = store_with(&[("base", "value"), ("x", "@{base}")]);
        let expander = Expander::new().with_var_symbol('@');
        let renderer = Renderer::with_expander(&store, None, expander);
        assert_eq!(renderer.render("x").unwrap(), json!("value"));
    }

    #[test]
    fn test_render_all_collects_every_key() {
        let store = store_with(&[("a", "1"), ("b", "${a}2")]);
        let renderer = Renderer::new(&store, None);
        let all = renderer.render_all(Settings::default()).unwrap();
        assert_eq!(all["a"], json!("1"));
        assert_eq!(all["b"], json!("12"));
    }
}
