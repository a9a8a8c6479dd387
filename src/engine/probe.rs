//! Probe statements: parsing and evaluation against a [`BusSnapshot`].
//!
//! A statement is an ordered token list. Control tokens are matched exactly;
//! everything else is a bus-probe token of the form
//! `Interface.Name({'PROPERTY': pattern, ...})`.
//!
//! Evaluation keeps three pieces of state and applies `AND` / `OR` one token
//! late, which is what turns `[a, "AND", b]` into `a && b`:
//!
//! ```text
//! token     current        pending (from previous token)   result
//! -----     -------        -----------------------------   ------
//! a         a              -            (first token)      a
//! AND       a (kept)       -                               a
//! b         b              AND                             b && a
//! ```
//!
//! ## Invariants
//!
//! - A passing statement always yields at least one [`FoundDevice`]; without
//!   bus probes that device is synthetic (no path, no properties).
//! - `MATCH_ONE` keeps only the last found device of a passing statement.

use super::matcher::{compile_anchored, matches};
use crate::diagnostics::Diagnostic;
use crate::error::{PatternError, PatternResult};
use crate::value::PatternValue;
use crate::{BusSnapshot, FoundDevice, PassHistory};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

const FOUND_PREFIX: &str = "FOUND(";

/// One property-constrained lookup on a bus interface.
#[derive(Debug, Clone, PartialEq)]
pub struct BusProbe {
    pub interface: String,
    pub constraints: BTreeMap<String, PatternValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeToken {
    True,
    False,
    And,
    Or,
    MatchOne,
    /// `FOUND(name)`: passes once template `name` has matched in this loop.
    Found(String),
    Bus(BusProbe),
}

/// Operator carried over to the next token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

impl ProbeToken {
    /// Parse one statement token.
    pub fn parse(token: &str) -> PatternResult<Self> {
        match token {
            "TRUE" => return Ok(ProbeToken::True),
            "FALSE" => return Ok(ProbeToken::False),
            "AND" => return Ok(ProbeToken::And),
            "OR" => return Ok(ProbeToken::Or),
            "MATCH_ONE" => return Ok(ProbeToken::MatchOne),
            _ => {}
        }

        if token.starts_with(FOUND_PREFIX) {
            let argument = arguments(token)?;
            return Ok(ProbeToken::Found(argument.replace('\'', "")));
        }

        let Some(open) = token.find('(') else {
            return Err(PatternError::MissingArguments(token.to_string()));
        };
        let interface = &token[..open];
        if interface.is_empty() {
            return Err(PatternError::MissingInterface(token.to_string()));
        }

        // Templates write pattern maps with single quotes.
        let json = arguments(token)?.replace('\'', "\"").replace('\\', "\\\\");
        let map: Value = serde_json::from_str(&json)
            .map_err(|err| PatternError::InvalidPatternMap { token: token.to_string(), reason: err.to_string() })?;
        let Value::Object(map) = map else {
            return Err(PatternError::InvalidPatternMap {
                token: token.to_string(),
                reason: "expected an object".to_string(),
            });
        };

        let constraints = map.into_iter().map(|(key, value)| (key, PatternValue::from(value))).collect();
        Ok(ProbeToken::Bus(BusProbe { interface: interface.to_string(), constraints }))
    }

    fn connective(&self) -> Option<Connective> {
        match self {
            ProbeToken::And => Some(Connective::And),
            ProbeToken::Or => Some(Connective::Or),
            _ => None,
        }
    }
}

/// Text between the first `(` and the last `)`.
fn arguments(token: &str) -> PatternResult<&str> {
    match (token.find('('), token.rfind(')')) {
        (Some(open), Some(close)) if close > open => Ok(&token[open + 1..close]),
        _ => Err(PatternError::MissingArguments(token.to_string())),
    }
}

/// A parsed `Probe` field.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeStatement {
    tokens: Vec<ProbeToken>,
}

impl ProbeStatement {
    /// Parse a `Probe` value: one string or an array of strings.
    pub fn parse(probe: &Value) -> PatternResult<Self> {
        let tokens = match probe {
            Value::String(token) => vec![ProbeToken::parse(token)?],
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(token) => ProbeToken::parse(token),
                    other => Err(PatternError::NotAString(other.to_string())),
                })
                .collect::<PatternResult<Vec<_>>>()?,
            other => return Err(PatternError::InvalidStatement(other.to_string())),
        };
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[ProbeToken] {
        &self.tokens
    }

    /// Interfaces named by bus-probe tokens.
    pub fn interfaces(&self) -> BTreeSet<String> {
        self.bus_probes().map(|probe| probe.interface.clone()).collect()
    }

    fn bus_probes(&self) -> impl Iterator<Item = &BusProbe> {
        self.tokens.iter().filter_map(|token| match token {
            ProbeToken::Bus(probe) => Some(probe),
            _ => None,
        })
    }

    /// One diagnostic per string pattern that is not a valid regex.
    pub fn regex_diagnostics(&self, template: &str) -> Vec<Diagnostic> {
        self.bus_probes()
            .flat_map(|probe| probe.constraints.values())
            .filter_map(|pattern| match pattern {
                PatternValue::Str(p) => compile_anchored(p).err().map(|err| Diagnostic::RegexCompile {
                    template: template.to_string(),
                    pattern: p.clone(),
                    error: err.to_string(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Outcome of evaluating one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub passed: bool,
    pub devices: Vec<FoundDevice>,
}

/// Evaluate `statement` against the snapshot and the templates matched so far.
pub fn evaluate(statement: &ProbeStatement, snapshot: &BusSnapshot, history: &PassHistory) -> MatchResult {
    let mut result = false;
    let mut current = false;
    let mut pending: Option<Connective> = None;
    let mut match_one = false;
    let mut devices = Vec::new();

    for (position, token) in statement.tokens.iter().enumerate() {
        match token {
            ProbeToken::True => current = true,
            ProbeToken::False => current = false,
            ProbeToken::MatchOne => {
                current = result;
                match_one = true;
            }
            ProbeToken::Found(name) => current = history.contains(name),
            ProbeToken::Bus(probe) => current = probe_bus(probe, snapshot, &mut devices),
            ProbeToken::And | ProbeToken::Or => {}
        }

        match pending {
            Some(Connective::And) => result = current && result,
            Some(Connective::Or) => result = current || result,
            None if position == 0 => result = current,
            None => {}
        }
        pending = token.connective();
    }

    if result && devices.is_empty() {
        devices.push(FoundDevice::synthetic());
    }
    if match_one && result {
        let last = devices.len() - 1;
        devices.drain(..last);
    }

    MatchResult { passed: result, devices }
}

/// Append every path whose `probe.interface` satisfies all constraints.
fn probe_bus(probe: &BusProbe, snapshot: &BusSnapshot, devices: &mut Vec<FoundDevice>) -> bool {
    let mut found = false;
    for (path, interfaces) in snapshot.objects() {
        let Some(properties) = interfaces.get(&probe.interface) else {
            continue;
        };
        let satisfied = probe
            .constraints
            .iter()
            .all(|(name, pattern)| properties.get(name).is_some_and(|live| matches(pattern, live)));
        if satisfied {
            devices.push(FoundDevice::new(properties.clone(), path));
            found = true;
        }
    }
    found
}
