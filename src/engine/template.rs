//! Template substitution.
//!
//! Rewrites the string leaves of a template field using the properties of a
//! matched device:
//!
//! ```text
//! "$index"                 -> device ordinal
//! "$bus"          (BUS=3)  -> 3            whole field keeps the typed value
//! "i2c $bus"      (BUS=3)  -> "i2c 3"      textual, case-insensitive
//! "$bus + 1 !"    (BUS=3)  -> "4 !"        arithmetic, trailing text kept
//! "$MISSING x"             -> " x"         leftovers deleted (when asked)
//! "0x54"                   -> 84           numeric literals become numbers
//! ```
//!
//! Properties are visited in name order, interfaces in interface-name order.
//! When an arithmetic placeholder is expanded, the consumed text
//! (`"$bus + 1"`) is returned as a *collision marker*: if the generated device
//! name turns out to be a duplicate, substitution reruns with that marker
//! replaced by the device ordinal.
//!
//! ## Design notes
//!
//! - Substitution never fails as a whole. A failing field (division by zero,
//!   arithmetic on a string) keeps the text produced so far and reports a
//!   `SubstitutionAborted` diagnostic.
//! - The operator is looked up exactly one character past the placeholder, so
//!   `"$bus+1"` is plain text and `"$bus + 1"` is arithmetic.

use super::expression::evaluate;
use crate::diagnostics::Diagnostic;
use crate::error::SubstitutionError;
use crate::{InterfaceMap, PropertyMap};
use serde_json::Value;
use std::collections::BTreeSet;

const TEMPLATE_CHAR: char = '$';
const INDEX_PLACEHOLDER: &str = "$index";
const MATH_CHARS: &[u8] = b"+-%*/";

/// Result of one substitution pass over a field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitution {
    /// Text of the last arithmetic placeholder expanded, if any.
    pub marker: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Substitutes placeholders for one found device.
#[derive(Debug, Clone, Copy)]
pub struct Substituter<'a> {
    template: &'a str,
    object: Option<&'a InterfaceMap>,
    index: usize,
    marker: Option<&'a str>,
}

impl<'a> Substituter<'a> {
    /// `template` names the owning template in diagnostics; `object` holds every
    /// interface of the matched path (`None` for synthetic devices).
    pub fn new(template: &'a str, object: Option<&'a InterfaceMap>, index: usize) -> Self {
        Self { template, object, index, marker: None }
    }

    /// Replace `marker` text with the ordinal before property substitution.
    pub fn with_marker(mut self, marker: Option<&'a str>) -> Self {
        self.marker = marker;
        self
    }

    /// Substitute every string leaf of `value` in place.
    ///
    /// `field` is the key `value` lives under (for diagnostics). With
    /// `delete_leftovers`, unresolved `$NAME` tokens are removed afterwards.
    pub fn apply(&self, field: &str, value: &mut Value, delete_leftovers: bool) -> Substitution {
        let mut out = Substitution::default();
        let empty = PropertyMap::new();

        let interfaces: Vec<&PropertyMap> = match self.object {
            Some(object) if !object.is_empty() => object.values().collect(),
            _ => vec![&empty],
        };

        for properties in interfaces {
            if let Some(marker) = self.apply_properties(field, value, properties, &mut out.diagnostics) {
                out.marker = Some(marker);
                break;
            }
        }

        if delete_leftovers {
            remove_leftover_placeholders(value);
        }
        out
    }

    fn apply_properties(
        &self,
        field: &str,
        value: &mut Value,
        properties: &PropertyMap,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<String> {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    self.apply_properties(key, child, properties, diagnostics);
                }
                None
            }
            Value::Array(items) => {
                for child in items.iter_mut() {
                    self.apply_properties(field, child, properties, diagnostics);
                }
                None
            }
            Value::String(_) => match self.replace_in_string(value, properties, diagnostics) {
                Ok(marker) => marker,
                Err(err) => {
                    diagnostics.push(Diagnostic::SubstitutionAborted {
                        template: self.template.to_string(),
                        field: field.to_string(),
                        error: err.to_string(),
                    });
                    None
                }
            },
            _ => None,
        }
    }

    fn replace_in_string(
        &self,
        value: &mut Value,
        properties: &PropertyMap,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<String>, SubstitutionError> {
        let Value::String(original) = value else {
            return Ok(None);
        };

        let ordinal = self.index.to_string();
        let mut text = original.replace(INDEX_PLACEHOLDER, &ordinal);
        if let Some(marker) = self.marker.filter(|m| !m.is_empty()) {
            text = text.replace(marker, &ordinal);
        }

        let mut marker = None;
        for (name, property) in properties {
            if name.is_empty() {
                continue;
            }
            let placeholder = format!("{TEMPLATE_CHAR}{name}");
            let Some(start) = find_ignore_case(&text, &placeholder) else {
                continue;
            };
            let end = start + placeholder.len();

            if start == 0 && end == text.len() {
                *value = property.to_json();
                return Ok(marker);
            }

            let operator_at = end + 1;
            let is_expression = text.as_bytes().get(operator_at).is_some_and(|b| MATH_CHARS.contains(b));
            if !is_expression {
                let Some(rendered) = property.as_template_text() else {
                    *value = Value::String(text);
                    return Err(SubstitutionError::Unrenderable { property: name.clone() });
                };
                text = replace_all_ignore_case(&text, &placeholder, &rendered);
                continue;
            }

            let tokens: Vec<&str> = text[operator_at..].split(' ').collect();
            if tokens.len() < 2 {
                diagnostics.push(Diagnostic::ExpressionSyntax { template: self.template.to_string(), text: text.clone() });
                continue;
            }

            let Some(seed) = property.as_i64() else {
                *value = Value::String(text);
                return Err(SubstitutionError::NonNumericSeed { property: name.clone() });
            };
            let evaluation = match evaluate(seed, &tokens) {
                Ok(evaluation) => evaluation,
                Err(err) => {
                    *value = Value::String(text);
                    return Err(err);
                }
            };
            for operand in evaluation.skipped {
                diagnostics.push(Diagnostic::UnparsableOperand { template: self.template.to_string(), operand });
            }

            let mut replaced = text[start..end].to_string();
            for token in &tokens[..evaluation.consumed] {
                replaced.push(' ');
                replaced.push_str(token);
            }
            marker = Some(replaced);

            let mut rewritten = format!("{}{}", &text[..start], evaluation.value);
            for token in &tokens[evaluation.consumed..] {
                rewritten.push(' ');
                rewritten.push_str(token);
            }
            text = rewritten;
        }

        *value = match parse_numeric_literal(&text) {
            Some(number) => Value::from(number),
            None => Value::String(text),
        };
        Ok(marker)
    }
}

/// Delete every `$NAME` token left in the string leaves of `value`.
pub fn remove_leftover_placeholders(value: &mut Value) {
    match value {
        Value::String(text) => {
            let re = regex!(r"\$[A-Za-z0-9_]+");
            if re.is_match(text) {
                *text = re.replace_all(text, "").into_owned();
            }
        }
        Value::Array(items) => items.iter_mut().for_each(remove_leftover_placeholders),
        Value::Object(map) => map.values_mut().for_each(remove_leftover_placeholders),
        _ => {}
    }
}

/// Parse a bare `0x` hex or decimal literal.
pub(crate) fn parse_numeric_literal(text: &str) -> Option<u64> {
    let (digits, radix) = match text.strip_prefix("0x") {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
}

fn replace_all_ignore_case(haystack: &str, needle: &str, with: &str) -> String {
    let lower = haystack.to_ascii_lowercase();
    let needle_lower = needle.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    for (idx, _) in lower.match_indices(&needle_lower) {
        out.push_str(&haystack[last..idx]);
        out.push_str(with);
        last = idx + needle_lower.len();
    }
    out.push_str(&haystack[last..]);
    out
}

/// Text used to compare names for collisions.
pub(crate) fn name_text(name: &Value) -> String {
    match name {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A substituted device name plus what happened while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceName {
    pub name: Value,
    pub diagnostics: Vec<Diagnostic>,
}

/// Substitute a template `Name`, disambiguating against `used_names`.
///
/// `marker` carries the collision marker across the devices of one template:
/// once set, every later device replaces it with its ordinal as well.
pub fn generate_device_name(
    substituter: Substituter<'_>,
    name_template: &Value,
    used_names: &BTreeSet<String>,
    marker: &mut Option<String>,
) -> DeviceName {
    fn render(substituter: Substituter<'_>, template: &Value, marker: Option<&str>) -> (Value, Substitution) {
        let mut name = template.clone();
        let substitution = substituter.with_marker(marker).apply("Name", &mut name, true);
        (name, substitution)
    }

    let (mut name, substitution) = render(substituter, name_template, marker.as_deref());
    let mut diagnostics = substitution.diagnostics;

    if marker.is_none() && used_names.contains(&name_text(&name)) {
        let collided = name_text(&name);
        match substitution.marker {
            Some(found) => {
                *marker = Some(found);
                let (renamed, rerun) = render(substituter, name_template, marker.as_deref());
                name = renamed;
                diagnostics.extend(rerun.diagnostics);
            }
            None => {
                name = Value::String(format!("{collided} {}", substituter.index));
            }
        }
        diagnostics.push(Diagnostic::NameCollision {
            template: substituter.template.to_string(),
            name: collided,
            marker: marker.clone(),
        });
    }

    DeviceName { name, diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(properties: PropertyMap) -> InterfaceMap {
        let mut object = InterfaceMap::new();
        object.insert("xyz.Test".to_string(), properties);
        object
    }

    fn substitute(field: Value, properties: PropertyMap) -> Value {
        let object = object(properties);
        let mut field = field;
        Substituter::new("test", Some(&object), 0).apply("foo", &mut field, true);
        field
    }

    #[test]
    fn replaces_placeholders() {
        let cases: &[(Value, PropertyMap, Value)] = &[
            (json!("$bus"), properties! { "BUS" => 23u32 }, json!(23)),
            (json!("$TEST"), properties! { "TEST" => "Test" }, json!("Test")),
            (json!("the $TEST"), properties! { "TEST" => "Test" }, json!("the Test")),
            (json!("the $TEST worked"), properties! { "TEST" => "Test" }, json!("the Test worked")),
            (json!("the Test $TEST"), properties! { "TEST" => 23i32 }, json!("the Test 23")),
            (json!("twelve is $TEST"), properties! { "test" => 12i32 }, json!("twelve is 12")),
            (json!("$FOO $BAR"), properties! { "FOO" => "foo", "BAR" => "bar" }, json!("foo bar")),
            (json!("$flag"), properties! { "FLAG" => true }, json!(true)),
            (json!("0x54"), properties! {}, json!(84)),
            (json!("42"), properties! {}, json!(42)),
            (json!("plain text"), properties! { "X" => 1u8 }, json!("plain text")),
        ];
        for (field, props, expected) in cases {
            assert_eq!(&substitute(field.clone(), props.clone()), expected, "{field}");
        }
    }

    #[test]
    fn evaluates_arithmetic() {
        let cases: &[(&str, i32, &str)] = &[
            ("3 plus 1 equals $TEST + 1", 3, "3 plus 1 equals 4"),
            ("3 minus 1 equals $TEST - 1 !", 3, "3 minus 1 equals 2 !"),
            ("3 mod 2 equals $TEST % 2", 3, "3 mod 2 equals 1"),
            ("3 * 2 equals $TEST * 2", 3, "3 * 2 equals 6"),
            ("4 / 2 equals $TEST / 2", 4, "4 / 2 equals 2"),
            ("4 * 2 % 6 equals $TEST * 2 % 6", 4, "4 * 2 % 6 equals 2"),
        ];
        for (field, seed, expected) in cases {
            assert_eq!(substitute(json!(field), properties! { "TEST" => *seed }), json!(expected), "{field}");
        }
    }

    #[test]
    fn arithmetic_then_text_replacement() {
        let props = properties! { "TEST" => 4i32, "BAR" => "bar" };
        assert_eq!(substitute(json!("4 / 2 equals $TEST / 2 $BAR"), props), json!("4 / 2 equals 2 bar"));
        let props = properties! { "ADDRESS" => 4i32, "BAR" => "bar" };
        assert_eq!(substitute(json!("4 / 2 equals $ADDRESS / 2 $BAR"), props), json!("4 / 2 equals 2 bar"));
    }

    #[test]
    fn whole_expression_becomes_a_number() {
        assert_eq!(substitute(json!("$ADDRESS + 1"), properties! { "ADDRESS" => 80u8 }), json!(81));
    }

    #[test]
    fn hex_and_wrong_case() {
        let object = object(properties! { "BUS" => 15u32 });
        let mut record = json!({"Address": "0x54", "Bus": 15, "Name": "$bus sensor 0", "Type": "SomeType"});
        let map = record.as_object_mut().unwrap();
        for (key, value) in map.iter_mut() {
            Substituter::new("test", Some(&object), 0).apply(key, value, true);
        }
        assert_eq!(record, json!({"Address": 84, "Bus": 15, "Name": "15 sensor 0", "Type": "SomeType"}));
    }

    #[test]
    fn index_and_marker() {
        let mut field = json!("Board $index");
        Substituter::new("t", None, 3).apply("Name", &mut field, true);
        assert_eq!(field, json!("Board 3"));

        let mut field = json!("cpu $index");
        Substituter::new("t", None, 7).apply("Name", &mut field, true);
        assert_eq!(field, json!("cpu 7"));

        let mut field = json!("$bus + 1 sensor");
        let object = object(properties! { "BUS" => 2u8 });
        Substituter::new("t", Some(&object), 5).with_marker(Some("$bus + 1")).apply("Name", &mut field, true);
        assert_eq!(field, json!("5 sensor"));
    }

    #[test]
    fn leftovers_are_deleted_only_when_asked() {
        let object = object(properties! { "EXISTENT_VAR" => "Replaced" });
        let mut field = json!("$EXISTENT_VAR and $NON_EXISTENT_VAR");
        Substituter::new("t", Some(&object), 0).apply("foo", &mut field, true);
        assert_eq!(field, json!("Replaced and "));

        let mut field = json!("$EXISTENT_VAR and $NON_EXISTENT_VAR");
        Substituter::new("t", Some(&object), 0).apply("foo", &mut field, false);
        assert_eq!(field, json!("Replaced and $NON_EXISTENT_VAR"));

        let mut field = json!("the Test $TEST is $TESTED");
        remove_leftover_placeholders(&mut field);
        assert_eq!(field, json!("the Test  is "));
    }

    #[test]
    fn fields_without_placeholders_are_unchanged() {
        let object = object(properties! { "BUS" => 1u8, "NAME" => "x" });
        for field in [json!("no tokens here"), json!({"a": ["b", 1, null]}), json!(3.5), json!(true), json!("0x")] {
            let mut copy = field.clone();
            let substitution = Substituter::new("t", Some(&object), 9).apply("f", &mut copy, true);
            assert_eq!(copy, field);
            assert!(substitution.marker.is_none());
            assert!(substitution.diagnostics.is_empty());
        }
    }

    #[test]
    fn nested_values_are_substituted() {
        let object = object(properties! { "BUS" => 4u8 });
        let mut field = json!({"Thresholds": [{"Bus": "$bus", "Label": "bus $bus"}]});
        Substituter::new("t", Some(&object), 1).apply("Exposes", &mut field, true);
        assert_eq!(field, json!({"Thresholds": [{"Bus": 4, "Label": "bus 4"}]}));
    }

    #[test]
    fn all_interfaces_of_the_object_are_used() {
        let mut object = InterfaceMap::new();
        object.insert("a.Iface".to_string(), properties! { "BUS" => 2u8 });
        object.insert("b.Iface".to_string(), properties! { "ADDRESS" => 80u8 });
        let mut field = json!("i2c $bus at $address");
        Substituter::new("t", Some(&object), 1).apply("Name", &mut field, true);
        assert_eq!(field, json!("i2c 2 at 80"));
    }

    #[test]
    fn division_by_zero_keeps_partial_text() {
        let object = object(properties! { "BUS" => 4u8, "NAME" => "psu" });
        let mut field = json!("$name $bus / 0");
        let substitution = Substituter::new("t", Some(&object), 1).apply("Label", &mut field, false);
        assert_eq!(field, json!("$name $bus / 0"));
        assert!(matches!(
            substitution.diagnostics.as_slice(),
            [Diagnostic::SubstitutionAborted { field, .. }] if field == "Label"
        ));
    }

    #[test]
    fn arithmetic_on_strings_is_rejected() {
        let object = object(properties! { "NAME" => "psu" });
        let mut field = json!("x $name + 1");
        let substitution = Substituter::new("t", Some(&object), 1).apply("Label", &mut field, false);
        assert_eq!(field, json!("x $name + 1"));
        assert_eq!(substitution.diagnostics.len(), 1);
    }

    #[test]
    fn expression_syntax_error_is_reported() {
        let object = object(properties! { "BUS" => 4u8 });
        let mut field = json!("x $bus +");
        let substitution = Substituter::new("t", Some(&object), 1).apply("Label", &mut field, false);
        assert_eq!(field, json!("x $bus +"));
        assert!(matches!(substitution.diagnostics.as_slice(), [Diagnostic::ExpressionSyntax { .. }]));
    }

    #[test]
    fn marker_is_reported_for_arithmetic() {
        let object = object(properties! { "BUS" => 4u8 });
        let mut field = json!("sensor $bus + 1 !");
        let substitution = Substituter::new("t", Some(&object), 1).apply("Name", &mut field, true);
        assert_eq!(field, json!("sensor 5 !"));
        assert_eq!(substitution.marker.as_deref(), Some("$bus + 1"));
    }

    #[test]
    fn numeric_literal_parsing() {
        let cases: &[(&str, Option<u64>)] =
            &[("0x54", Some(84)), ("84", Some(84)), ("0", Some(0)), ("0x", None), ("+1", None), ("1a", None), ("", None)];
        for (text, expected) in cases {
            assert_eq!(parse_numeric_literal(text), *expected, "{text}");
        }
    }

    #[test]
    fn colliding_names_use_the_marker() {
        let object = object(properties! { "BUS" => 1u8 });
        let mut used = BTreeSet::new();
        used.insert("sensor 2".to_string());
        let mut marker = None;

        let named =
            generate_device_name(Substituter::new("t", Some(&object), 3), &json!("sensor $bus + 1"), &used, &mut marker);
        assert_eq!(named.name, json!("sensor 3"));
        assert_eq!(marker.as_deref(), Some("$bus + 1"));
        assert!(matches!(named.diagnostics.as_slice(), [Diagnostic::NameCollision { .. }]));
    }

    #[test]
    fn colliding_names_without_marker_get_a_suffix() {
        let object = object(properties! { "BUS" => 1u8 });
        let mut used = BTreeSet::new();
        used.insert("sensor 1".to_string());
        let mut marker = None;

        let named =
            generate_device_name(Substituter::new("t", Some(&object), 2), &json!("sensor $bus"), &used, &mut marker);
        assert_eq!(named.name, json!("sensor 1 2"));
        assert!(marker.is_none());
        assert_eq!(named.diagnostics.len(), 1);
    }

    #[test]
    fn unique_names_are_left_alone() {
        let object = object(properties! { "BUS" => 1u8 });
        let mut marker = None;
        let named = generate_device_name(
            Substituter::new("t", Some(&object), 1),
            &json!("sensor $bus + 1"),
            &BTreeSet::new(),
            &mut marker,
        );
        assert_eq!(named.name, json!("sensor 2"));
        assert!(marker.is_none());
        assert!(named.diagnostics.is_empty());
    }
}
