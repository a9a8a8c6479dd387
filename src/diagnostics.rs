//! Non-fatal events produced while resolving.

use serde::Serialize;
use std::fmt;

/// One non-fatal event. Recorded by [`Diagnostics`] and returned with every report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Template skipped before evaluation (missing `Name` / `Probe`, not an object).
    InvalidTemplate { reason: String },
    /// Probe statement could not be parsed; the template fails this loop.
    MalformedProbe { template: String, error: String },
    /// A string pattern is not a valid regular expression; it never matches.
    RegexCompile { template: String, pattern: String, error: String },
    /// An expression operand was not an integer literal and was skipped.
    UnparsableOperand { template: String, operand: String },
    /// An arithmetic placeholder lacked an operator/operand pair.
    ExpressionSyntax { template: String, text: String },
    /// Substitution of one field stopped early; the field keeps its partial text.
    SubstitutionAborted { template: String, field: String, error: String },
    /// Generated name collided and was disambiguated with the device ordinal.
    NameCollision { template: String, name: String, marker: Option<String> },
    /// A property fetch exhausted its retries; the object is absent this round.
    FetchDropped { path: String, interface: String, attempts: usize },
    /// A `Bind*` / `DisableNode` expose action named records that do not exist.
    MissingExposeTarget { template: String, action: String, names: Vec<String> },
    /// Template never matched before the loop reached its fixed point.
    UnmatchedTemplate { name: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::InvalidTemplate { reason } => write!(f, "invalid template: {reason}"),
            Diagnostic::MalformedProbe { template, error } => write!(f, "{template}: malformed probe: {error}"),
            Diagnostic::RegexCompile { template, pattern, error } => {
                write!(f, "{template}: pattern '{pattern}' is not a valid regex: {error}")
            }
            Diagnostic::UnparsableOperand { template, operand } => {
                write!(f, "{template}: parameter '{operand}' not supported in template expressions")
            }
            Diagnostic::ExpressionSyntax { template, text } => {
                write!(f, "{template}: syntax error in template expression '{text}'")
            }
            Diagnostic::SubstitutionAborted { template, field, error } => {
                write!(f, "{template}: substitution of '{field}' aborted: {error}")
            }
            Diagnostic::NameCollision { template, name, marker: Some(marker) } => write!(
                f,
                "{template}: duplicate name '{name}', replacing '{marker}' with the device index; consider fixing the template"
            ),
            Diagnostic::NameCollision { template, name, marker: None } => write!(
                f,
                "{template}: duplicate name '{name}', appending the device index; consider fixing the template"
            ),
            Diagnostic::FetchDropped { path, interface, attempts } => {
                write!(f, "retries exhausted on {path} {interface} after {attempts} attempts")
            }
            Diagnostic::MissingExposeTarget { template, action, names } => {
                write!(f, "{template}: dependency error, could not find {action} {names:?}")
            }
            Diagnostic::UnmatchedTemplate { name } => write!(f, "{name}: never matched"),
        }
    }
}

/// Ordered collector; every recorded diagnostic is also emitted as a warning.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        match &diagnostic {
            // Expected at the end of most loops; keep it out of the warning stream.
            Diagnostic::UnmatchedTemplate { name } => tracing::debug!(template = %name, "template never matched"),
            other => tracing::warn!(diagnostic = %other),
        }
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.record(diagnostic);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}
