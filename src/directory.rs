//! The inventory directory the engine reads live state from.
//!
//! [`Directory`] is the narrow boundary to the bus: which paths expose which
//! interfaces, and the properties of one (path, interface) pair.
//! [`MemoryDirectory`] is an in-process implementation used by tests and the
//! offline CLI. It can inject transient and permanent failures.

use crate::error::{FetchError, LookupError};
use crate::value::TypedValue;
use crate::{InterfaceMap, PropertyMap};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Live inventory lookups.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Every `(path, interface)` pair on each path exposing at least one of
    /// `interfaces`. [`LookupError::NotFound`] when no path does.
    async fn list_paths_exposing(&self, interfaces: &BTreeSet<String>)
    -> Result<BTreeSet<(String, String)>, LookupError>;

    async fn get_all_properties(&self, path: &str, interface: &str) -> Result<PropertyMap, FetchError>;

    /// Host power state; records tied to a powered host are not pruned while off.
    async fn host_power_on(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum LookupFailure {
    #[default]
    None,
    Transient(usize),
    Permanent,
}

/// In-memory [`Directory`].
#[derive(Debug)]
pub struct MemoryDirectory {
    objects: Mutex<BTreeMap<String, InterfaceMap>>,
    property_failures: Mutex<BTreeMap<(String, String), usize>>,
    lookup_failure: Mutex<LookupFailure>,
    power_on: AtomicBool,
    lookup_calls: AtomicUsize,
    property_calls: AtomicUsize,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self {
            objects: Mutex::default(),
            property_failures: Mutex::default(),
            lookup_failure: Mutex::default(),
            power_on: AtomicBool::new(true),
            lookup_calls: AtomicUsize::new(0),
            property_calls: AtomicUsize::new(0),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a fixture: `{ path: { interface: { property: value } } }`.
    ///
    /// Integers load as `I64` (`U64` when too large), arrays of bytes as byte
    /// sequences. Properties with no live form (objects, nulls) are skipped.
    pub fn from_json(fixture: &Value) -> Result<Self, String> {
        let Value::Object(paths) = fixture else {
            return Err("bus fixture must be an object of object paths".to_string());
        };

        let directory = MemoryDirectory::new();
        for (path, interfaces) in paths {
            let Value::Object(interfaces) = interfaces else {
                return Err(format!("{path}: expected an object of interfaces"));
            };
            for (interface, properties) in interfaces {
                let Value::Object(properties) = properties else {
                    return Err(format!("{path} {interface}: expected an object of properties"));
                };
                let mut map = PropertyMap::new();
                for (name, value) in properties {
                    match TypedValue::from_json(value) {
                        Some(live) => {
                            map.insert(name.clone(), live);
                        }
                        None => {
                            tracing::warn!(%path, %interface, property = %name, "skipping property with no live form")
                        }
                    }
                }
                directory.insert(path.clone(), interface.clone(), map);
            }
        }
        Ok(directory)
    }

    /// Add or replace the properties of `interface` on `path`.
    pub fn insert(&self, path: impl Into<String>, interface: impl Into<String>, properties: PropertyMap) {
        lock(&self.objects).entry(path.into()).or_default().insert(interface.into(), properties);
    }

    /// Remove `path` and everything on it.
    pub fn remove(&self, path: &str) -> Option<InterfaceMap> {
        lock(&self.objects).remove(path)
    }

    /// Fail the next `times` property reads of `(path, interface)`.
    pub fn fail_properties(&self, path: &str, interface: &str, times: usize) {
        lock(&self.property_failures).insert((path.to_string(), interface.to_string()), times);
    }

    /// Fail the next `times` lookups.
    pub fn fail_lookups(&self, times: usize) {
        *lock(&self.lookup_failure) = LookupFailure::Transient(times);
    }

    /// Make every lookup fail (or stop doing so).
    pub fn set_unreachable(&self, unreachable: bool) {
        *lock(&self.lookup_failure) = if unreachable { LookupFailure::Permanent } else { LookupFailure::None };
    }

    pub fn set_host_power(&self, on: bool) {
        self.power_on.store(on, Ordering::SeqCst);
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn property_calls(&self) -> usize {
        self.property_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn list_paths_exposing(
        &self,
        interfaces: &BTreeSet<String>,
    ) -> Result<BTreeSet<(String, String)>, LookupError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failure = lock(&self.lookup_failure);
            match *failure {
                LookupFailure::None => {}
                LookupFailure::Permanent => return Err(LookupError::Unreachable("directory is unreachable".into())),
                LookupFailure::Transient(remaining) => {
                    *failure = match remaining {
                        0 | 1 => LookupFailure::None,
                        n => LookupFailure::Transient(n - 1),
                    };
                    if remaining > 0 {
                        return Err(LookupError::Unreachable("transient lookup failure".into()));
                    }
                }
            }
        }

        let objects = lock(&self.objects);
        let found: BTreeSet<(String, String)> = objects
            .iter()
            .filter(|(_, object)| object.keys().any(|interface| interfaces.contains(interface)))
            .flat_map(|(path, object)| object.keys().map(move |interface| (path.clone(), interface.clone())))
            .collect();

        if found.is_empty() { Err(LookupError::NotFound) } else { Ok(found) }
    }

    async fn get_all_properties(&self, path: &str, interface: &str) -> Result<PropertyMap, FetchError> {
        self.property_calls.fetch_add(1, Ordering::SeqCst);
        let fail = |reason: &str| FetchError {
            path: path.to_string(),
            interface: interface.to_string(),
            reason: reason.to_string(),
        };

        {
            let mut failures = lock(&self.property_failures);
            if let Some(remaining) = failures.get_mut(&(path.to_string(), interface.to_string())) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(fail("transient read failure"));
                }
            }
        }

        lock(&self.objects)
            .get(path)
            .and_then(|object| object.get(interface))
            .cloned()
            .ok_or_else(|| fail("no such object"))
    }

    async fn host_power_on(&self) -> bool {
        self.power_on.load(Ordering::SeqCst)
    }
}
