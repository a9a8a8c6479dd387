//! Stable record identifiers.
//!
//! Scan rounds must recognise a device they synthesized before, in this loop,
//! an earlier loop, or an earlier process (the "last configuration"). Without
//! a *stable* key the engine would:
//!
//! - Duplicate records every time the bus changes
//! - Lose user edits made to persisted records
//! - Renumber device ordinals between restarts
//!
//! This module defines [`RecordKey`], derived only from the template name and
//! the matched property map.
//!
//! ## What counts as "the same device"
//!
//! ```text
//! no properties (synthetic device)  ->  key = template name
//! otherwise                         ->  key = blake3(name ++ ["P1",v1,"P2",v2,...])
//!                                          first 8 bytes, little-endian u64, decimal
//! ```
//!
//! Properties are serialized as a compact JSON array in name order so the
//! digest does not depend on map iteration order.
//!
//! ## Tradeoffs
//!
//! - Any property change (a serial number rewritten, a bus renumbered) yields
//!   a new key; the old record is then pruned and a new one added.

use crate::PropertyMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Identifier of one synthesized record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(template: &str, properties: &PropertyMap) -> Self {
        if properties.is_empty() {
            return RecordKey(template.to_string());
        }

        let device: Vec<Value> = properties
            .iter()
            .flat_map(|(name, value)| [Value::String(name.clone()), value.to_json()])
            .collect();
        let mut input = String::from(template);
        input.push_str(&Value::Array(device).to_string());

        let digest = blake3::hash(input.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        RecordKey(u64::from_le_bytes(head).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_devices_use_the_template_name() {
        assert_eq!(RecordKey::new("Chassis", &PropertyMap::new()).as_str(), "Chassis");
    }

    #[test]
    fn keys_are_stable_and_property_sensitive() {
        let a = RecordKey::new("psu", &properties! { "BUS" => 3u32, "ADDRESS" => 80u32 });
        let b = RecordKey::new("psu", &properties! { "ADDRESS" => 80u32, "BUS" => 3u32 });
        let c = RecordKey::new("psu", &properties! { "BUS" => 4u32, "ADDRESS" => 80u32 });
        let d = RecordKey::new("fan", &properties! { "BUS" => 3u32, "ADDRESS" => 80u32 });

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.as_str().chars().all(|c| c.is_ascii_digit()));
        assert!(a.as_str().parse::<u64>().is_ok());
    }
}
