//! Record synthesis for a template that passed.
//!
//! ```text
//! found devices ──► adopt known ids ──► ordinal pool ──► name ──► fields ──► exposes ──► record
//!                  (working copy,       1..=n minus       (dedup    (leftovers   (substitute,
//!                   then last config)   adopted ones)      marker)   deleted)     Bind*/DisableNode)
//! ```
//!
//! Adopted records are kept as they are so edits to persisted records
//! survive; only devices without a known id are synthesized.

use super::compiled_templates::CompiledTemplate;
use super::dedup::RecordKey;
use super::scan::ResolutionContext;
use super::system::SystemConfiguration;
use super::template::{Substituter, generate_device_name, name_text};
use crate::FoundDevice;
use crate::diagnostics::Diagnostic;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, VecDeque};

/// What one template contributed to the configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synthesis {
    /// Newly synthesized records.
    pub written: usize,
    /// Devices whose record already existed.
    pub adopted: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolutionContext {
    /// Materialize one record per found device of `template`.
    pub(crate) fn synthesize(&mut self, template: &CompiledTemplate, devices: Vec<FoundDevice>) -> Synthesis {
        let mut out = Synthesis::default();
        let mut ordinals: VecDeque<usize> = (1..=devices.len()).collect();
        let mut used_names = BTreeSet::new();
        let ordinal_offset = template.name.find('$');

        let mut pending = Vec::new();
        for device in devices {
            let id = RecordKey::new(&template.name, &device.properties).into_string();
            let adopted = match self.configuration.get(&id) {
                Some(record) => Some(record.clone()),
                None => self.previous.get(&id).cloned().map(|mut record| {
                    prune_null_exposes(&mut record);
                    self.configuration.insert(id.clone(), record.clone());
                    record
                }),
            };
            match adopted {
                Some(record) => {
                    tracing::debug!(template = %template.name, record = %id, "adopting existing record");
                    self.missing.remove(&id);
                    reserve_identifiers(&record, ordinal_offset, &mut used_names, &mut ordinals);
                    out.adopted += 1;
                }
                None => pending.push((id, device)),
            }
        }

        let mut marker: Option<String> = None;
        for (id, device) in pending {
            let Some(index) = ordinals.pop_front() else {
                break;
            };
            let object = if device.is_synthetic() { None } else { self.snapshot.object(&device.path) };
            let substituter = Substituter::new(&template.name, object, index);

            let mut record = template.record.clone();
            let Value::Object(fields) = &mut record else {
                continue;
            };

            let named = generate_device_name(substituter, template.name_template(), &used_names, &mut marker);
            out.diagnostics.extend(named.diagnostics);
            used_names.insert(name_text(&named.name));
            fields.insert("Name".to_string(), named.name);

            let substituter = substituter.with_marker(marker.as_deref());
            for (key, value) in fields.iter_mut() {
                if key == "Name" {
                    continue;
                }
                // Probe text has no placeholders; expose leftovers go per key below.
                let delete_leftovers = key != "Probe" && key != "Exposes";
                out.diagnostics.extend(substituter.apply(key, value, delete_leftovers).diagnostics);
            }

            // Visible to expose actions, including our own Bind targets.
            self.configuration.insert(id.clone(), record.clone());

            if let Some(Value::Array(exposes)) = record.get_mut("Exposes") {
                for expose in exposes.iter_mut() {
                    let Value::Object(expose) = expose else {
                        continue;
                    };
                    let keys: Vec<String> = expose.keys().cloned().collect();
                    for key in keys {
                        if let Some(value) = expose.get_mut(&key) {
                            out.diagnostics.extend(substituter.apply(&key, value, true).diagnostics);
                        }
                        apply_expose_action(
                            &mut self.configuration,
                            &template.name,
                            &id,
                            expose,
                            &key,
                            &mut out.diagnostics,
                        );
                    }
                }
            }

            tracing::debug!(template = %template.name, record = %id, index, "synthesized record");
            self.configuration.insert(id.clone(), record);
            self.missing.remove(&id);
            out.written += 1;
        }

        out
    }
}

/// Apply a `Bind<Suffix>` or `DisableNode` key of `expose`.
fn apply_expose_action(
    configuration: &mut SystemConfiguration,
    template: &str,
    own_id: &str,
    expose: &mut Map<String, Value>,
    action: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let bind = action.strip_prefix("Bind");
    let disable = action == "DisableNode";
    if bind.is_none() && !disable {
        return;
    }

    let mut names: Vec<String> = match expose.get(action) {
        Some(Value::String(name)) => vec![name.clone()],
        Some(Value::Array(items)) => items.iter().map_while(Value::as_str).map(str::to_string).collect(),
        other => {
            tracing::warn!(template, action, value = ?other, "expose action value is not a string or array");
            return;
        }
    };

    for (id, record) in configuration.iter_mut() {
        if disable && id == own_id {
            continue;
        }
        let Some(Value::Array(targets)) = record.get_mut("Exposes") else {
            continue;
        };
        for target in targets.iter_mut() {
            let Some(target) = target.as_object_mut() else {
                continue;
            };
            let Some(name) = target.get("Name").and_then(Value::as_str) else {
                continue;
            };
            let Some(position) = names.iter().position(|wanted| wanted == name) else {
                continue;
            };
            names.remove(position);

            if let Some(suffix) = bind {
                target.insert("Status".to_string(), Value::from("okay"));
                expose.insert(suffix.to_string(), Value::Object(target.clone()));
            }
            if disable {
                target.insert("Status".to_string(), Value::from("disabled"));
            }
        }
    }

    if !names.is_empty() {
        diagnostics.push(Diagnostic::MissingExposeTarget {
            template: template.to_string(),
            action: action.to_string(),
            names,
        });
    }
}

/// Drop `null` entries a persisted record may carry in `Exposes`.
fn prune_null_exposes(record: &mut Value) {
    if let Some(Value::Array(exposes)) = record.get_mut("Exposes") {
        exposes.retain(|expose| !expose.is_null());
    }
}

/// Keep an adopted record's name and ordinal from being handed out again.
///
/// The ordinal is read at the byte offset of the first `$` in the template
/// name, so `"Fan $index"` adopted as `"Fan 3"` reserves ordinal 3.
fn reserve_identifiers(
    record: &Value,
    offset: Option<usize>,
    used_names: &mut BTreeSet<String>,
    ordinals: &mut VecDeque<usize>,
) {
    let Some(offset) = offset else {
        return;
    };
    let Some(name) = record.get("Name").and_then(Value::as_str) else {
        tracing::warn!(record = %record, "adopted record has no Name");
        return;
    };
    let digits: String =
        name.get(offset..).unwrap_or_default().chars().take_while(char::is_ascii_digit).collect();
    let Ok(ordinal) = digits.parse::<usize>() else {
        return;
    };

    used_names.insert(name.to_string());
    if let Some(position) = ordinals.iter().position(|&free| free == ordinal) {
        ordinals.remove(position);
    }
}
