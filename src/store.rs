//! The layered, scoped variable store.
//!
//! [`LayerStore`] owns [`Source`] registrations, named [`Scope`] compositions
//! resolved into flat source orderings, and the [`Layer`] payloads attached
//! to each source. It has no awareness of templating; that lives in
//! [`crate::render`].
use crate::error::StoreError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Default precedence level for a [`Source`] that doesn't specify one.
///
/// Lower levels win within the default (no-scope) ordering.
pub const DEFAULT_LEVEL: i64 = 500;

/// A named origin of variables, such as a CLI, an environment, or a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    name: String,
    level: Option<i64>,
    help: Option<String>,
}

impl Source {
    /// Create a new Source.
    pub fn new(name: impl Into<String>, level: Option<i64>, help: Option<String>) -> Self {
        Self {
            name: name.into(),
            level,
            help,
        }
    }

    /// The source's unique name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source's precedence level, or [`DEFAULT_LEVEL`] if unset.
    #[inline]
    pub fn level(&self) -> i64 {
        self.level.unwrap_or(DEFAULT_LEVEL)
    }

    /// Help text describing the source, or a generated default.
    pub fn help(&self) -> String {
        match &self.help {
            Some(help) => help.clone(),
            None => format!("Source {}", self.name),
        }
    }
}

/// A binding of one registered [`Source`] to a payload and free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    source: Source,
    payload: Map<String, Value>,
    meta: Map<String, Value>,
}

impl Layer {
    /// The source this layer is bound to.
    #[inline]
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// The layer's payload: a mapping from key to arbitrary value.
    #[inline]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Free-form metadata attached when the layer was set.
    #[inline]
    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }
}

/// Owns sources, scopes, and layers; answers layered lookups.
///
/// No template awareness lives here — see [`crate::Renderer`] for that.
#[derive(Debug, Default)]
pub struct LayerStore {
    sources: HashMap<String, Source>,
    /// Insertion order of sources, used to break ties when sorting by level.
    source_order: Vec<String>,
    /// Raw (pre-resolution) scope definitions, as last merged by `set_scopes`.
    scopes_raw: HashMap<String, Vec<String>>,
    /// Scopes resolved into a flat, ordered list of sources.
    scopes_resolved: HashMap<String, Vec<Source>>,
    layers: HashMap<String, Layer>,
}

impl LayerStore {
    /// Create a new, empty LayerStore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single source.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExistingSource`] if a source with the
    /// same name is already registered and `force` is false.
    pub fn add_source(&mut self, source: Source, force: bool) -> Result<(), StoreError> {
        if self.sources.contains_key(&source.name) && !force {
            return Err(StoreError::AlreadyExistingSource { name: source.name });
        }
        if !self.sources.contains_key(&source.name) {
            self.source_order.push(source.name.clone());
        }
        self.sources.insert(source.name.clone(), source);
        Ok(())
    }

    /// Register one or more sources.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExistingSource`] for the first name that
    /// is already registered and `force` is false. Sources registered before
    /// the failing one remain registered — callers that need all-or-nothing
    /// semantics across a batch should call [`LayerStore::add_source`]
    /// individually and roll back on error.
    pub fn add_sources<I>(&mut self, sources: I, force: bool) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = Source>,
    {
        for source in sources {
            self.add_source(source, force)?;
        }
        Ok(())
    }

    /// Merge `scopes` into the existing scope definitions, then re-resolve
    /// every scope.
    ///
    /// Transactional: on [`StoreError::ScopeCycle`] or
    /// [`StoreError::ReferenceToMissingSource`], the store's scopes revert
    /// to their pre-call state.
    pub fn set_scopes<I, S, V>(&mut self, scopes: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: IntoIterator<Item = String>,
    {
        let mut merged = self.scopes_raw.clone();
        for (name, refs) in scopes {
            merged.insert(name.into(), refs.into_iter().collect());
        }

        let resolved = resolve_all(&merged, &self.sources)?;

        self.scopes_raw = merged;
        self.scopes_resolved = resolved;
        Ok(())
    }

    /// Attach (or replace) the layer bound to `source_name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownSource`] if the source isn't registered.
    pub fn set_layer(
        &mut self,
        source_name: &str,
        payload: Map<String, Value>,
        meta: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let source = self
            .sources
            .get(source_name)
            .ok_or_else(|| StoreError::UnknownSource {
                name: source_name.to_string(),
            })?
            .clone();

        self.layers.insert(
            source_name.to_string(),
            Layer {
                source,
                payload,
                meta,
            },
        );
        Ok(())
    }

    /// Return sources in priority order, optionally filtered by scope.
    ///
    /// With no scope, returns every registered source stably sorted by
    /// `(level, insertion order)`. With a scope, returns that scope's
    /// resolved order, ignoring `level` entirely.
    pub fn get_ordered_sources(&self, scope: Option<&str>) -> Result<Vec<Source>, StoreError> {
        match scope {
            None => {
                let mut sources: Vec<Source> = self
                    .source_order
                    .iter()
                    .filter_map(|name| self.sources.get(name).cloned())
                    .collect();
                sources.sort_by_key(|source| source.level());
                Ok(sources)
            }
            Some(scope) => self
                .scopes_resolved
                .get(scope)
                .cloned()
                .ok_or_else(|| StoreError::UnknownScope {
                    name: scope.to_string(),
                }),
        }
    }

    /// Return layers in priority order, optionally filtered by scope.
    ///
    /// Sources with no attached layer are skipped.
    pub fn get_ordered_layers(&self, scope: Option<&str>) -> Result<Vec<&Layer>, StoreError> {
        let sources = self.get_ordered_sources(scope)?;
        Ok(sources
            .into_iter()
            .filter_map(|source| self.layers.get(&source.name))
            .collect())
    }

    /// Return the union of variable names across the ordered layers of `scope`.
    pub fn get_var_names(&self, scope: Option<&str>) -> Result<HashSet<String>, StoreError> {
        let mut names = HashSet::new();
        for layer in self.get_ordered_layers(scope)? {
            names.extend(layer.payload.keys().cloned());
        }
        Ok(names)
    }

    /// Return every layer containing `key`, in priority order — a debug aid
    /// for understanding which layers shadow which.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UndefinedVar`] if no layer has `key`.
    pub fn inspect_var(&self, key: &str, scope: Option<&str>) -> Result<Vec<&Layer>, StoreError> {
        let found: Vec<&Layer> = self
            .get_ordered_layers(scope)?
            .into_iter()
            .filter(|layer| layer.payload.contains_key(key))
            .collect();

        if found.is_empty() {
            return Err(StoreError::UndefinedVar {
                name: key.to_string(),
                scope: scope.map(str::to_string),
            });
        }
        Ok(found)
    }

    /// Return the value of `key` from the first (highest-priority) layer
    /// that contains it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UndefinedVar`] if no layer has `key`.
    pub fn get_value(&self, key: &str, scope: Option<&str>) -> Result<Value, StoreError> {
        let layer = self.inspect_var(key, scope)?[0];
        Ok(layer.payload[key].clone())
    }

    /// Return every variable visible in `scope`, each resolved to its
    /// highest-priority layer's raw value (first layer wins).
    ///
    /// Supplements [`LayerStore::get_var_names`] (names only) for callers
    /// that want the full merged mapping without a `get_value` call per key.
    pub fn get_values(&self, scope: Option<&str>) -> Result<Map<String, Value>, StoreError> {
        let mut out = Map::new();
        for layer in self.get_ordered_layers(scope)? {
            for (key, value) in layer.payload.iter() {
                out.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        Ok(out)
    }

    /// Return `(index, help text)` pairs for the sources in `scope`, in
    /// priority order, for a caller to print however it likes.
    pub fn show_sources_help(
        &self,
        scope: Option<&str>,
    ) -> Result<Vec<(usize, String)>, StoreError> {
        Ok(self
            .get_ordered_sources(scope)?
            .into_iter()
            .enumerate()
            .map(|(index, source)| (index, source.help()))
            .collect())
    }
}

/// Resolve every scope in `raw` into a flat, ordered list of sources.
///
/// Revalidates the whole set so that `set_scopes` can stay transactional:
/// callers build a candidate merged map, call this, and only commit on `Ok`.
fn resolve_all(
    raw: &HashMap<String, Vec<String>>,
    sources: &HashMap<String, Source>,
) -> Result<HashMap<String, Vec<Source>>, StoreError> {
    let mut resolved = HashMap::new();
    for name in raw.keys() {
        let mut path = vec![name.clone()];
        resolved.insert(name.clone(), resolve_scope(name, raw, sources, &mut path)?);
    }
    Ok(resolved)
}

/// Depth-first resolution of a single scope's references, with an explicit
/// path stack for cycle detection (a self-reference is a cycle of length one).
fn resolve_scope(
    name: &str,
    raw: &HashMap<String, Vec<String>>,
    sources: &HashMap<String, Source>,
    path: &mut Vec<String>,
) -> Result<Vec<Source>, StoreError> {
    let items = &raw[name];
    let mut out = Vec::new();

    for item in items {
        if let Some(source) = sources.get(item) {
            out.push(source.clone());
        } else if raw.contains_key(item) {
            if path.contains(item) {
                let mut chain = path.clone();
                chain.push(item.clone());
                return Err(StoreError::ScopeCycle {
                    scope: name.to_string(),
                    path: chain,
                });
            }
            path.push(item.clone());
            let nested = resolve_scope(item, raw, sources, path)?;
            path.pop();
            out.extend(nested);
        } else {
            return Err(StoreError::ReferenceToMissingSource {
                scope: name.to_string(),
                reference: item.clone(),
            });
        }
    }

    Ok(out)
}
