extern crate self as entity_resolver;

#[macro_use]
mod macros;
mod api;
mod config;
mod diagnostics;
mod directory;
mod engine;
mod error;
mod service;
mod source;
mod value;

pub use api::{ResolutionReport, Resolver, resolve_templates};
pub use config::{EngineOptions, FetchOptions};
pub use diagnostics::{Diagnostic, Diagnostics};
pub use directory::{Directory, MemoryDirectory};
pub use engine::{
    BusEvent, ChangeFeed, CompiledTemplate, CompiledTemplates, LoopMetrics, MatchResult, ProbeStatement, ProbeToken,
    RecordKey, RoundMetrics, StatementFeatures, Substituter, SystemConfiguration, TriggerInfo, evaluate_expression,
    evaluate_probe, inventory_path, matches,
};
pub use error::{
    DirectoryUnavailable, EngineError, EngineResult, FetchError, LookupError, PatternError, SourceError,
    SubstitutionError,
};
pub use service::{ResolutionService, ServiceHandle, ServiceUpdate};
pub use source::{ConfigSource, JsonFileSource, StaticSource};
pub use value::{PatternValue, TypedValue};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

// --- Core data model --------------------------------------------------------

/// Property name -> live value, for one interface on one object.
pub type PropertyMap = BTreeMap<String, TypedValue>;

/// Interface name -> properties, for one object path.
pub type InterfaceMap = BTreeMap<String, PropertyMap>;

/// Cached live bus state: object path -> interface -> properties.
///
/// Built incrementally across the rounds of one resolution loop. Paths and
/// interfaces are kept in sorted order so probe evaluation is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusSnapshot {
    objects: BTreeMap<String, InterfaceMap>,
}

impl BusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the properties of `interface` on `path`, replacing earlier data.
    pub fn insert(&mut self, path: impl Into<String>, interface: impl Into<String>, properties: PropertyMap) {
        self.objects.entry(path.into()).or_default().insert(interface.into(), properties);
    }

    /// Every interface held for `path`.
    pub fn object(&self, path: &str) -> Option<&InterfaceMap> {
        self.objects.get(path)
    }

    /// Iterate `(path, interfaces)` in path order.
    pub fn objects(&self) -> impl Iterator<Item = (&str, &InterfaceMap)> {
        self.objects.iter().map(|(path, ifaces)| (path.as_str(), ifaces))
    }

    /// True when any path already carries `interface`.
    pub fn has_interface(&self, interface: &str) -> bool {
        self.objects.values().any(|ifaces| ifaces.contains_key(interface))
    }

    /// Interfaces present on at least one path.
    pub fn interfaces(&self) -> BTreeSet<&str> {
        self.objects.values().flat_map(|ifaces| ifaces.keys().map(String::as_str)).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// One live object that satisfied a bus-probe token.
///
/// A synthetic device (statement passed without bus probes) has an empty
/// property map and an empty path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FoundDevice {
    pub properties: PropertyMap,
    pub path: String,
}

impl FoundDevice {
    pub fn new(properties: PropertyMap, path: impl Into<String>) -> Self {
        Self { properties, path: path.into() }
    }

    pub fn synthetic() -> Self {
        Self::default()
    }

    pub fn is_synthetic(&self) -> bool {
        self.path.is_empty() && self.properties.is_empty()
    }
}

/// Names of templates that have matched in the current resolution loop.
///
/// Append-only; insertion order is preserved for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassHistory {
    order: Vec<String>,
    #[serde(skip)]
    names: BTreeSet<String>,
}

impl PassHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name`. Returns `false` if it had already passed.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.names.contains(&name) {
            return false;
        }
        self.names.insert(name.clone());
        self.order.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Names in the order they passed.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PassHistory {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut history = PassHistory::new();
        for name in iter {
            history.insert(name);
        }
        history
    }
}
