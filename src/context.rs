//! Per-top-level-call state: the parent-chain used for cycle detection and
//! the mutable debug report a render call accumulates as it unwinds.
use crate::error::RenderError;
use crate::settings::Settings;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Hard ceiling on recursion depth through a render call: ample headroom
/// over any realistic path length through a store's keys. Reaching it is
/// itself evidence of a cycle the parent-chain walk didn't catch (e.g.
/// through an expander indirection), so it is reported the same way:
/// [`RenderError::Circular`].
pub const MAX_RENDER_DEPTH: usize = 64;

/// One frame of the parent chain: the key currently resolving, and a link
/// to whichever key asked for it. Frames are never stored back into the
/// store or cache — the chain lives only for the duration of one top-level
/// [`crate::Renderer::render`] call.
struct Frame {
    key: String,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    fn contains(&self, key: &str) -> bool {
        self.key == key || self.parent.as_deref().is_some_and(|p| p.contains(key))
    }

    /// The full chain from the root key down to and including this frame.
    fn chain(&self) -> Vec<String> {
        let mut out = match &self.parent {
            Some(parent) => parent.chain(),
            None => Vec::new(),
        };
        out.push(self.key.clone());
        out
    }
}

/// One entry of a [`DebugReport`]: what happened while resolving one key
/// during a top-level render call.
///
/// Shape modeled on `store_base.py::inspect_var` and
/// `test_store_template.py::test_debug_output`.
#[derive(Debug, Clone)]
pub struct DebugEntry {
    /// The key that was resolved.
    pub key: String,
    /// The scope it was resolved against.
    pub scope: Option<String>,
    /// The name of the winning layer's source, if the key was found.
    pub source: Option<String>,
    /// The raw (pre-expansion) value, if the key was found.
    pub raw: Option<Value>,
    /// The fully expanded string, if expansion ran.
    pub rendered: Option<String>,
    /// Whether this entry was served from the renderer's cache.
    pub cached: bool,
}

/// The accumulated debug trail for one top-level render call, one entry per
/// key resolved, in the order resolution completed (innermost/leaf keys
/// first, since nested keys finish before the value that referenced them).
#[derive(Debug, Clone, Default)]
pub struct DebugReport {
    pub entries: Vec<DebugEntry>,
}

impl DebugReport {
    fn push(&mut self, entry: DebugEntry) {
        self.entries.push(entry);
    }
}

/// Per-top-level-call context: the current parent chain, a snapshot of the
/// settings in effect, and the debug report being built.
///
/// A `QueryContext` is created fresh for the top-level key in
/// [`crate::Renderer::render`], then threaded down through every nested
/// lookup via [`QueryContext::child`], which inherits the settings and
/// shares the same report.
pub struct QueryContext {
    frame: Rc<Frame>,
    depth: usize,
    pub settings: Settings,
    report: Rc<RefCell<DebugReport>>,
}

impl QueryContext {
    /// Start a fresh context for a top-level `render(key)` call.
    pub fn root(key: impl Into<String>, settings: Settings) -> Self {
        Self {
            frame: Rc::new(Frame {
                key: key.into(),
                parent: None,
            }),
            depth: 0,
            settings,
            report: Rc::new(RefCell::new(DebugReport::default())),
        }
    }

    /// The key this frame is resolving.
    pub fn key(&self) -> &str {
        &self.frame.key
    }

    /// Build a child context for a nested lookup of `key`, inheriting the
    /// parent's settings and sharing its debug report.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Circular`] if `key` already appears in the
    /// parent chain, or if the chain would exceed [`MAX_RENDER_DEPTH`].
    pub fn child(&self, key: impl Into<String>) -> Result<Self, RenderError> {
        let key = key.into();
        if self.frame.contains(&key) || self.depth + 1 >= MAX_RENDER_DEPTH {
            let mut chain = self.frame.chain();
            chain.push(key.clone());
            return Err(RenderError::Circular { key, chain });
        }
        Ok(Self {
            frame: Rc::new(Frame {
                key,
                parent: Some(self.frame.clone()),
            }),
            depth: self.depth + 1,
            settings: self.settings.clone(),
            report: self.report.clone(),
        })
    }

    /// Record a [`DebugEntry`] if debug reporting is enabled for this call.
    pub fn record(&self, entry: impl FnOnce() -> DebugEntry) {
        if self.settings.debug {
            self.report.borrow_mut().push(entry());
        }
    }

    /// Consume the context, returning the accumulated [`DebugReport`].
    ///
    /// Only meaningful on the root context after the top-level render call
    /// completes — children share the same underlying report.
    pub fn into_report(self) -> DebugReport {
        self.report.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_of_self_is_circular() {
        let root = QueryContext::root("a", Settings::default());
        let err = root.child("a").unwrap_err();
        assert!(matches!(err, RenderError::Circular { key, .. } if key == "a"));
    }

    #[test]
    fn test_cycle_through_grandchild_is_detected() {
        let root = QueryContext::root("a", Settings::default());
        let child = root.child("b").unwrap();
        let err = child.child("a").unwrap_err();
        match err {
            RenderError::Circular { key, chain } => {
                assert_eq!(key, "a");
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("expected Circular, got {other:?}"),
        }
    }

    #[test]
    fn test_distinct_siblings_are_not_circular() {
        let root = QueryContext::root("a", Settings::default());
        assert!(root.child("b").is_ok());
        assert!(root.child("c").is_ok());
    }

    #[test]
    fn test_depth_ceiling_reports_circular() {
        let mut ctx = QueryContext::root("k0", Settings::default());
        for i in 1..MAX_RENDER_DEPTH {
            ctx = ctx.child(format!("k{i}")).unwrap();
        }
        assert!(ctx.child("k_overflow").is_err());
    }
}
