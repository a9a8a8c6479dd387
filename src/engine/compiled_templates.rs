//! Template compilation and indexing.
//!
//! This module holds the *static* side of a resolution: what can be derived
//! from the template list once, before any bus data is read.
//!
//! 1. **Compile** (this module): validate each template, parse its `Probe`
//!    into a [`ProbeStatement`], note coarse [`StatementFeatures`] and the
//!    interfaces it needs.
//! 2. **Run** (see `scan.rs`): extend the snapshot with the interfaces of the
//!    templates still pending, evaluate, synthesize, repeat.
//!
//! ## Invariants
//!
//! - Templates keep their source order; scan rounds evaluate them in it, which
//!   is what lets `FOUND(x)` see `x` within the same round when `x` comes first.
//! - A template whose probe fails to parse stays in the list (it is reported
//!   unmatched at loop end) but is never evaluated.
//!
//! ## Extension points
//!
//! - Adding a feature bit: add it to `StatementFeatures` and set it in
//!   `features_of`.

use super::probe::{ProbeStatement, ProbeToken};
use crate::diagnostics::Diagnostic;
use crate::error::PatternError;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

// --- Template compilation and indexing ---------------------------------------

bitflags::bitflags! {
    /// Coarse facts about a probe statement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatementFeatures: u8 {
        const BUS_PROBE = 1 << 0;
        const FOUND     = 1 << 1;
        const MATCH_ONE = 1 << 2;
        /// Neither bus probes nor `FOUND`: the outcome never changes.
        const CONSTANT  = 1 << 3;
    }
}

/// One validated template.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub name: String,
    /// The template object as loaded.
    pub record: Value,
    pub statement: Result<ProbeStatement, PatternError>,
    pub features: StatementFeatures,
    /// Interfaces named by the statement's non-control tokens.
    pub interfaces: BTreeSet<String>,
}

impl CompiledTemplate {
    /// Validate one template. `Err` carries the reason it is skipped.
    pub fn new(record: Value) -> Result<Self, String> {
        let Value::Object(fields) = &record else {
            return Err(format!("template is not an object: {record}"));
        };
        let Some(name) = fields.get("Name") else {
            return Err("template missing Name".to_string());
        };
        let Value::String(name) = name else {
            return Err(format!("template Name is not a string: {name}"));
        };
        let Some(probe) = fields.get("Probe") else {
            return Err(format!("{name}: template missing Probe"));
        };

        let interfaces = interfaces_of(probe);
        let statement = ProbeStatement::parse(probe);
        let features = statement.as_ref().map(features_of).unwrap_or(StatementFeatures::empty());

        Ok(Self { name: name.clone(), interfaces, statement, features, record })
    }

    /// The `Name` field before substitution.
    pub fn name_template(&self) -> &Value {
        &self.record["Name"]
    }
}

fn features_of(statement: &ProbeStatement) -> StatementFeatures {
    let mut features = StatementFeatures::empty();
    for token in statement.tokens() {
        match token {
            ProbeToken::Bus(_) => features |= StatementFeatures::BUS_PROBE,
            ProbeToken::Found(_) => features |= StatementFeatures::FOUND,
            ProbeToken::MatchOne => features |= StatementFeatures::MATCH_ONE,
            _ => {}
        }
    }
    if !features.intersects(StatementFeatures::BUS_PROBE | StatementFeatures::FOUND) {
        features |= StatementFeatures::CONSTANT;
    }
    features
}

/// Interface names read straight from the raw probe text, so that a statement
/// that fails to parse still contributes what it can.
fn interfaces_of(probe: &Value) -> BTreeSet<String> {
    let tokens: Vec<&str> = match probe {
        Value::String(token) => vec![token.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    tokens
        .into_iter()
        .filter(|token| !is_control_token(token))
        .filter_map(|token| token.find('(').map(|open| &token[..open]))
        .filter(|interface| !interface.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_control_token(token: &str) -> bool {
    matches!(token, "TRUE" | "FALSE" | "AND" | "OR" | "MATCH_ONE") || token.starts_with("FOUND(")
}

/// Pre-compiled template set with an interface index.
#[derive(Debug, Clone, Default)]
pub struct CompiledTemplates {
    templates: Vec<CompiledTemplate>,
    by_interface: BTreeMap<String, Vec<usize>>,
    diagnostics: Vec<Diagnostic>,
}

impl CompiledTemplates {
    /// Compile templates in order. Skipped templates and probe problems are
    /// collected as diagnostics.
    pub fn new(records: Vec<Value>) -> Self {
        let mut compiled = CompiledTemplates::default();

        for record in records {
            let template = match CompiledTemplate::new(record) {
                Ok(template) => template,
                Err(reason) => {
                    compiled.diagnostics.push(Diagnostic::InvalidTemplate { reason });
                    continue;
                }
            };

            match &template.statement {
                Ok(statement) => compiled.diagnostics.extend(statement.regex_diagnostics(&template.name)),
                Err(err) => compiled
                    .diagnostics
                    .push(Diagnostic::MalformedProbe { template: template.name.clone(), error: err.to_string() }),
            }

            let id = compiled.templates.len();
            for interface in &template.interfaces {
                compiled.by_interface.entry(interface.clone()).or_default().push(id);
            }
            compiled.templates.push(template);
        }

        compiled
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&CompiledTemplate> {
        self.templates.iter().find(|template| template.name == name)
    }

    /// Every interface any template probes.
    pub fn probe_interfaces(&self) -> BTreeSet<String> {
        self.by_interface.keys().cloned().collect()
    }

    /// Names of templates probing `interface`, in source order.
    pub fn probing(&self, interface: &str) -> impl Iterator<Item = &str> {
        self.by_interface
            .get(interface)
            .into_iter()
            .flatten()
            .map(|&id| self.templates[id].name.as_str())
    }

    /// Diagnostics produced while compiling.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}
