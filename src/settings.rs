//! Per-render-call settings and the tagged-variant helper that
//! funnels the `Raise | callable | literal` trichotomy through one call site.
use crate::error::RenderError;
use std::fmt;
use std::sync::Arc;

/// What to do when a query-time error is encountered.
///
/// Reused across all three policy fields on [`Settings`] (design notes call
/// this out explicitly: one tagged variant instead of three near-identical
/// branches at every error site). The callback receives the "subject" — the
/// undefined key name for `on_undefined_error`/`on_undefined_template_error`,
/// or the raw template text for `on_templating_error` — plus the error that
/// triggered the policy, and returns the string to use in its place.
#[derive(Clone)]
pub enum ErrorPolicy {
    /// Propagate the error to the caller.
    Raise,
    /// Substitute this fixed string.
    Literal(String),
    /// Call this function to produce a substitute string.
    Callback(Arc<dyn Fn(&str, &RenderError) -> String + Send + Sync>),
}

impl ErrorPolicy {
    /// Build a [`ErrorPolicy::Callback`] from any matching closure.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&str, &RenderError) -> String + Send + Sync + 'static,
    {
        ErrorPolicy::Callback(Arc::new(f))
    }

    /// Funnel the policy into a single "produce a value or rethrow" call.
    pub fn resolve(&self, subject: &str, err: RenderError) -> Result<String, RenderError> {
        match self {
            ErrorPolicy::Raise => Err(err),
            ErrorPolicy::Literal(value) => Ok(value.clone()),
            ErrorPolicy::Callback(f) => Ok(f(subject, &err)),
        }
    }
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Raise => write!(f, "ErrorPolicy::Raise"),
            ErrorPolicy::Literal(value) => write!(f, "ErrorPolicy::Literal({value:?})"),
            ErrorPolicy::Callback(_) => write!(f, "ErrorPolicy::Callback(..)"),
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        ErrorPolicy::Raise
    }
}

/// The per-render-call options controlling error policy, expansion,
/// debug reporting, and caching.
///
/// `on_templating_error` is `Option` rather than a bare [`ErrorPolicy`]: its
/// spec-default behavior is "return the raw, unexpanded value", which isn't
/// expressible as one of `Raise`, `Literal`, or `Callback` — it depends on
/// what the Renderer was given, not on a value the policy carries. `None`
/// means that built-in fallback; `Some` overrides it with an explicit
/// policy. `on_undefined_template_error` is also `Option`, but its `None`
/// default is `Raise` (spec §8 scenario 4; confirmed by the original's
/// `pytest.raises(UndefinedVarError)` around a nested undefined reference)
/// — `Some` overrides that default the same way. `on_undefined_error` has no
/// such special case (its default really is `Raise` with nothing to
/// override), so it stays a bare `ErrorPolicy`.
#[derive(Clone)]
pub struct Settings {
    /// Action when the expander reports a parse error. `None` (default):
    /// return the original, unexpanded value unchanged.
    pub on_templating_error: Option<ErrorPolicy>,
    /// Action when the top-level key being rendered has no value anywhere
    /// in scope. Defaults to [`ErrorPolicy::Raise`].
    pub on_undefined_error: ErrorPolicy,
    /// Action when the expander, while resolving a reference, asks for a key
    /// the renderer cannot produce. `None` (default): raise the underlying
    /// `UndefinedVar`, the same as [`ErrorPolicy::Raise`] would.
    pub on_undefined_template_error: Option<ErrorPolicy>,
    /// If false, skip expansion entirely and return the raw stored value.
    pub template: bool,
    /// If true, [`crate::Renderer::render_debug`] also returns a
    /// [`crate::context::DebugReport`].
    pub debug: bool,
    /// If true, memoize the expanded value per scope.
    pub cache: bool,
}

impl Settings {
    /// Default settings: raise on an undefined top-level key or a nested
    /// undefined reference, return the raw value on a templating (parse)
    /// error, expand templates, no debug report, cache on.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_templating_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_templating_error = Some(policy);
        self
    }

    pub fn with_on_undefined_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_undefined_error = policy;
        self
    }

    pub fn with_on_undefined_template_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_undefined_template_error = Some(policy);
        self
    }

    pub fn with_template(mut self, template: bool) -> Self {
        self.template = template;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("on_templating_error", &self.on_templating_error)
            .field("on_undefined_error", &self.on_undefined_error)
            .field("on_undefined_template_error", &self.on_undefined_template_error)
            .field("template", &self.template)
            .field("debug", &self.debug)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            on_templating_error: None,
            on_undefined_error: ErrorPolicy::Raise,
            on_undefined_template_error: None,
            template: true,
            debug: false,
            cache: true,
        }
    }
}
