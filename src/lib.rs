//! A layered, scoped, templated variable store.
//!
//! `scopevars` ingests named key→value datasets from several origins
//! ("sources"), composes them into hierarchical "scopes" with well-defined
//! precedence, and resolves variable values where string values may contain
//! shell-style references to other variables (`$NAME`, `${NAME}`, with
//! default/assign/alternate/error modifiers). It is meant for configuration
//! pipelines that merge CLI flags, environment, secrets, and file config at
//! multiple organizational levels, then need fully expanded values.
//!
//! # Usage
//!
//! Register [`Source`]s, attach [`Layer`] payloads, and render through a
//! [`Renderer`]:
//!
//! ```rust
//! use scopevars::{LayerStore, Renderer, Source};
//! use serde_json::json;
//!
//! let mut store = LayerStore::new();
//! store
//!     .add_sources(
//!         [Source::new("cli", Some(100), None), Source::new("env", Some(200), None)],
//!         false,
//!     )
//!     .unwrap();
//!
//! let mut env = serde_json::Map::new();
//! env.insert("user".to_string(), json!("taylor"));
//! env.insert("greeting".to_string(), json!("hello, $user!"));
//! store.set_layer("env", env, serde_json::Map::new()).unwrap();
//!
//! let renderer = Renderer::new(&store, None);
//! assert_eq!(renderer.render("greeting").unwrap(), json!("hello, taylor!"));
//! ```
//!
//! # Components
//!
//! - [`LayerStore`] owns sources, scopes, and layers, and answers ordered
//!   layer/value queries. It has no awareness of templating.
//! - [`Expander`] is a pure function from `(template, lookup, options)` to an
//!   expanded string, implementing the shell-style grammar: `$VAR`,
//!   `${VAR}`, `${!VAR}` indirection, `-`/`=`/`+`/`?` modifiers, substring
//!   offsets, and `$$` process-id expansion.
//! - [`Renderer`] orchestrates resolution of one key against a
//!   [`LayerStore`]: it fetches the raw value, detects circular references
//!   across the recursion chain, invokes a pluggable [`engine::TemplateEngine`]
//!   with a lazy lookup that recurses back into itself, and caches results
//!   per scope.
//!
//! # Settings
//!
//! Each [`Renderer::render_with`] call accepts a [`Settings`] value
//! controlling undefined-variable and parse-error policy, whether expansion
//! runs at all, debug reporting, and caching. See [`ErrorPolicy`] for the
//! `Raise | callable | literal` trichotomy shared by every policy field.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod engine;
pub mod error;
pub mod expand;
pub mod settings;
pub mod store;

mod render;

pub use context::{DebugEntry, DebugReport, QueryContext};
pub use engine::{EngineKind, ExpandVars, StringTemplate, TemplateEngine};
pub use error::{Error, ExpandError, RenderError, StoreError};
pub use expand::{recover_null_from_env, Expander, Lookup, LookupResult, MapLookup, PidValue};
pub use render::Renderer;
pub use settings::{ErrorPolicy, Settings};
pub use store::{Layer, LayerStore, Source, DEFAULT_LEVEL};
