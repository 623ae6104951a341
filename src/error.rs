//! Error taxonomy for the store, the expander, and the renderer.
//!
//! Errors split by fault domain, matching the split the rest of the crate
//! enforces at each seam: [`StoreError`] covers application-fault setup
//! errors, [`ExpandError`] covers the shell-grammar parse-error family, and
//! [`RenderError`] covers the user-fault query-time errors that wrap both.
use thiserror::Error;

/// Application errors: bad configuration, the caller's fault at setup time.
///
/// These are raised synchronously from [`crate::LayerStore`] configuration
/// methods and never filtered through a render-time policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("source `{name}` already exists, use force to override")]
    AlreadyExistingSource { name: String },

    #[error("scope `{scope}` references unknown item `{reference}`")]
    ReferenceToMissingSource { scope: String, reference: String },

    #[error("scope `{scope}` is recursive: {}", .path.join(" -> "))]
    ScopeCycle { scope: String, path: Vec<String> },

    #[error("source `{name}` not found")]
    UnknownSource { name: String },

    #[error("scope `{name}` not found")]
    UnknownScope { name: String },

    #[error("variable `{name}` not found{}", .scope.as_deref().map(|s| format!(" in scope `{s}`")).unwrap_or_default())]
    UndefinedVar { name: String, scope: Option<String> },
}

/// Parse errors raised by the [`crate::Expander`] while expanding a template
/// string. Each variant carries the offending fragment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    #[error("{0}: missing '}}'")]
    MissingClosingBrace(String),

    #[error("{0}: missing escaped character")]
    MissingEscapedChar(String),

    #[error("{0}: bad substitution")]
    BadSubstitution(String),

    #[error("{var}: operand expected (error token is {operand:?})")]
    OperandExpected { var: String, operand: String },

    #[error("{var}: {expr}: substring expression < 0")]
    NegativeSubstring { var: String, expr: String },

    #[error("{0}: unbound variable")]
    UnboundVariable(String),

    #[error("{var}: {}", .message.as_deref().unwrap_or("parameter null or not set"))]
    ParameterNullOrNotSet { var: String, message: Option<String> },
}

/// User errors encountered while answering a query: undefined variables,
/// invalid names, and the template-rendering family (circular references,
/// and anything the expander or a nested lookup reports).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Expand(#[from] ExpandError),

    #[error("circular reference while rendering `{key}`: {}", .chain.join(" -> "))]
    Circular { key: String, chain: Vec<String> },

    #[error("`{0}` is not a valid variable name")]
    InvalidVarName(String),
}

/// Catch-all error type unifying every fault domain in the crate.
///
/// Component APIs return their narrowest error type directly
/// ([`StoreError`] from [`crate::LayerStore`], [`ExpandError`] from
/// [`crate::Expander`]); this type exists for callers who want one type to
/// propagate with `?` across subsystem boundaries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Expand(#[from] ExpandError),

    #[error(transparent)]
    Render(RenderError),
}

impl From<RenderError> for Error {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Store(e) => Error::Store(e),
            RenderError::Expand(e) => Error::Expand(e),
            other => Error::Render(other),
        }
    }
}
