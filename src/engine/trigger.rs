//! Bus event classification.
//!
//! Decides whether a change on the bus warrants a new resolution loop. The
//! service feeds every event through [`TriggerInfo::scan`] and only arms its
//! debounce timer for events that can change a probe outcome.
//!
//! - Interfaces added or removed count only when they intersect the probe
//!   interfaces of the loaded templates.
//! - Property changes always count: the changed object may carry properties a
//!   substitution reads even when no probe names its interface.
//! - An explicit rescan always counts.
//!
//! ## Design notes
//!
//! - The scan is cheap and conservative. A false positive costs one loop that
//!   converges to the same configuration.

use serde::Serialize;
use std::collections::BTreeSet;

/// A change reported by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusEvent {
    InterfacesAdded { path: String, interfaces: BTreeSet<String> },
    InterfacesRemoved { path: String, interfaces: BTreeSet<String> },
    PropertiesChanged { path: String, interface: String },
    Rescan,
}

impl BusEvent {
    pub fn path(&self) -> Option<&str> {
        match self {
            BusEvent::InterfacesAdded { path, .. }
            | BusEvent::InterfacesRemoved { path, .. }
            | BusEvent::PropertiesChanged { path, .. } => Some(path),
            BusEvent::Rescan => None,
        }
    }
}

/// What an event (or a burst of them) means for resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerInfo {
    /// Probe interfaces the events touched.
    pub interfaces: BTreeSet<String>,
    /// Set by events that always warrant a loop.
    pub forced: bool,
}

impl TriggerInfo {
    /// Classify `event` against the probe interfaces of the loaded templates.
    pub fn scan(event: &BusEvent, probe_interfaces: &BTreeSet<String>) -> Self {
        match event {
            BusEvent::InterfacesAdded { interfaces, .. } | BusEvent::InterfacesRemoved { interfaces, .. } => Self {
                interfaces: interfaces.intersection(probe_interfaces).cloned().collect(),
                forced: false,
            },
            BusEvent::PropertiesChanged { .. } | BusEvent::Rescan => Self { interfaces: BTreeSet::new(), forced: true },
        }
    }

    pub fn warrants_resolution(&self) -> bool {
        self.forced || !self.interfaces.is_empty()
    }

    /// Fold a later trigger into this one.
    pub fn merge(&mut self, other: TriggerInfo) {
        self.forced |= other.forced;
        self.interfaces.extend(other.interfaces);
    }
}
