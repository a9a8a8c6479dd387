//! The resolved System Configuration and what changed in it.
//!
//! Records are keyed by a stable record id (see `dedup.rs`) and kept in id
//! order. A resolution loop works on a copy; [`ChangeFeed::between`] compares
//! the copy with the committed map once the loop finishes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const INVENTORY_ROOT: &str = "/xyz/openbmc_project/inventory/system";
const ASSET_INTERFACE: &str = "xyz.openbmc_project.Inventory.Decorator.Asset";

/// Record id -> synthesized record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemConfiguration {
    records: BTreeMap<String, Value>,
}

impl SystemConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object of `id -> record`. Anything else yields `None`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self { records: map.into_iter().collect() }),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.records.iter().map(|(id, record)| (id.clone(), record.clone())).collect::<Map<_, _>>())
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Value> {
        self.records.get_mut(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, record: Value) -> Option<Value> {
        self.records.insert(id.into(), record)
    }

    pub fn remove(&mut self, id: &str) -> Option<Value> {
        self.records.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Value)> {
        self.records.iter_mut().map(|(id, record)| (id.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records whose id is not present in `older`.
    pub fn added_since(&self, older: &SystemConfiguration) -> SystemConfiguration {
        let records = self
            .records
            .iter()
            .filter(|(id, _)| !older.contains(id))
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        SystemConfiguration { records }
    }

    /// Remove every id in `missing`, keeping records that cannot be judged
    /// while the host is off. Returns the removed records.
    pub fn prune(&mut self, missing: &BTreeSet<String>, host_power_on: bool) -> SystemConfiguration {
        let mut removed = SystemConfiguration::new();
        for id in missing {
            let Some(record) = self.records.get(id) else {
                continue;
            };
            if !host_power_on && requires_power_on(record) {
                tracing::debug!(record = %id, "host powered off, keeping record");
                continue;
            }
            if let Some(record) = self.records.remove(id) {
                removed.insert(id.clone(), record);
            }
        }
        removed
    }
}

impl FromIterator<(String, Value)> for SystemConfiguration {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self { records: iter.into_iter().collect() }
    }
}

/// A record that is only visible with the host powered on.
pub fn requires_power_on(record: &Value) -> bool {
    matches!(record.get("PowerState").and_then(Value::as_str), Some("On" | "BiosPost"))
}

/// Inventory object path for a record.
///
/// `Type` defaults to `Chassis`; characters outside `[A-Za-z0-9_]` become `_`.
pub fn inventory_path(name: &str, record_type: Option<&str>) -> String {
    let record_type = record_type.unwrap_or("Chassis");
    let sanitize = |text: &str| regex!(r"[^A-Za-z0-9_]").replace_all(text, "_").into_owned();
    format!("{INVENTORY_ROOT}/{}/{}", sanitize(record_type).to_ascii_lowercase(), sanitize(name))
}

/// Added / updated / removed record ids of one completed loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeFeed {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeFeed {
    pub fn between(before: &SystemConfiguration, after: &SystemConfiguration) -> Self {
        let mut feed = ChangeFeed::default();
        for (id, record) in after.iter() {
            match before.get(id) {
                None => feed.added.push(id.to_string()),
                Some(previous) if previous != record => feed.updated.push(id.to_string()),
                Some(_) => {}
            }
        }
        feed.removed = before.ids().filter(|id| !after.contains(id)).map(str::to_string).collect();
        feed
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Log an `Inventory Added` / `Inventory Removed` event for each record.
pub(crate) fn log_inventory(event: InventoryEvent, records: &SystemConfiguration) {
    for (_, record) in records.iter() {
        if record.get("Logging").and_then(Value::as_str) == Some("Off") {
            continue;
        }
        let text = |value: Option<&Value>| match value {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "Unknown".to_string(),
        };
        let asset = record.get(ASSET_INTERFACE);
        let name = text(record.get("Name"));
        let record_type = text(record.get("Type"));
        let model = text(asset.and_then(|a| a.get("Model")));
        let serial_number = text(asset.and_then(|a| a.get("SerialNumber")));
        let path = inventory_path(&name, record.get("Type").and_then(Value::as_str));

        match event {
            InventoryEvent::Added => {
                tracing::info!(%name, %record_type, %model, %serial_number, %path, "Inventory Added")
            }
            InventoryEvent::Removed => {
                tracing::info!(%name, %record_type, %model, %serial_number, %path, "Inventory Removed")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InventoryEvent {
    Added,
    Removed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> SystemConfiguration {
        SystemConfiguration::from_json(value).unwrap()
    }

    #[test]
    fn change_feed_reports_added_updated_removed() {
        let before = config(json!({"a": {"Name": "a"}, "b": {"Name": "b"}, "c": {"Name": "c"}}));
        let after = config(json!({"a": {"Name": "a"}, "b": {"Name": "b2"}, "d": {"Name": "d"}}));

        let feed = ChangeFeed::between(&before, &after);
        assert_eq!(feed.added, vec!["d"]);
        assert_eq!(feed.updated, vec!["b"]);
        assert_eq!(feed.removed, vec!["c"]);
        assert!(ChangeFeed::between(&after, &after).is_empty());

        assert_eq!(after.added_since(&before).ids().collect::<Vec<_>>(), vec!["d"]);
    }

    #[test]
    fn prune_respects_power_state() {
        let mut configuration = config(json!({
            "cpu": {"Name": "cpu", "PowerState": "On"},
            "dimm": {"Name": "dimm", "PowerState": "BiosPost"},
            "psu": {"Name": "psu", "PowerState": "Always"},
            "fan": {"Name": "fan"},
            "kept": {"Name": "kept"},
        }));
        let missing: BTreeSet<String> = ["cpu", "dimm", "psu", "fan", "gone"].into_iter().map(String::from).collect();

        let removed = configuration.clone().prune(&missing, true);
        assert_eq!(removed.ids().collect::<Vec<_>>(), vec!["cpu", "dimm", "fan", "psu"]);

        let removed = configuration.prune(&missing, false);
        assert_eq!(removed.ids().collect::<Vec<_>>(), vec!["fan", "psu"]);
        assert_eq!(configuration.ids().collect::<Vec<_>>(), vec!["cpu", "dimm", "kept"]);
    }

    #[test]
    fn inventory_paths() {
        let cases: &[(&str, Option<&str>, &str)] = &[
            ("Wailua Falls", Some("Board"), "/xyz/openbmc_project/inventory/system/board/Wailua_Falls"),
            ("PSU-1", None, "/xyz/openbmc_project/inventory/system/chassis/PSU_1"),
            ("fan_0", Some("Fan"), "/xyz/openbmc_project/inventory/system/fan/fan_0"),
        ];
        for (name, record_type, expected) in cases {
            assert_eq!(inventory_path(name, *record_type), *expected);
        }
    }

    #[test]
    fn round_trips_through_json() {
        let value = json!({"1": {"Name": "x"}, "2": {"Name": "y"}});
        assert_eq!(config(value.clone()).to_json(), value);
        assert_eq!(serde_json::to_value(config(value.clone())).unwrap(), value);
        assert!(SystemConfiguration::from_json(json!([])).is_none());
    }
}
