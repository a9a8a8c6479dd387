//! Error types for the resolution engine.
//!
//! Only [`DirectoryUnavailable`] (wrapped in [`EngineError`]) ever escapes a
//! resolution loop. Everything else is recovered at the smallest scope (one
//! field, one object, one template) and surfaces as a `Diagnostic`.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed probe statement or pattern map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// A statement element was not a string.
    #[error("probe token is not a string: {0}")]
    NotAString(String),

    /// `Probe` was neither a string nor an array.
    #[error("probe must be a string or an array of strings, got {0}")]
    InvalidStatement(String),

    /// Token lacks the `(...)` argument section.
    #[error("probe syntax error in '{0}': expected '<Name>(...)'")]
    MissingArguments(String),

    /// A bus-probe token names no interface.
    #[error("probe syntax error in '{0}': missing interface name")]
    MissingInterface(String),

    /// The pattern map is not a JSON object.
    #[error("probe pattern map in '{token}' is not valid: {reason}")]
    InvalidPatternMap { token: String, reason: String },
}

/// Failure while evaluating a template expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstitutionError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("modulo by zero")]
    ModuloByZero,

    #[error("arithmetic overflow evaluating {lhs} {op} {rhs}")]
    Overflow { lhs: i64, op: char, rhs: i64 },

    /// Arithmetic was requested on a property with no integer form.
    #[error("property '{property}' is not numeric, cannot apply arithmetic")]
    NonNumericSeed { property: String },

    /// A property without a textual form was spliced into a larger string.
    #[error("property '{property}' cannot be rendered as text")]
    Unrenderable { property: String },
}

/// Per-object property fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to read {interface} on {path}: {reason}")]
pub struct FetchError {
    pub path: String,
    pub interface: String,
    pub reason: String,
}

/// Failure asking the directory which paths expose a set of interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// Nothing exposes the requested interfaces. Not a failure.
    #[error("no objects expose the requested interfaces")]
    NotFound,

    #[error("directory unreachable: {0}")]
    Unreachable(String),
}

/// The directory service could not be reached after exhausting retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("directory unavailable after {attempts} attempts: {last_error}")]
pub struct DirectoryUnavailable {
    pub attempts: usize,
    pub last_error: String,
}

/// Template loading failure.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} does not contain a template object or array")]
    NotATemplate { path: PathBuf },
}

/// Top-level failure of a resolution loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    DirectoryUnavailable(#[from] DirectoryUnavailable),

    #[error("could not load templates: {0}")]
    Source(#[from] SourceError),

    /// The service task panicked or was aborted.
    #[error("resolution service task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type PatternResult<T> = Result<T, PatternError>;
pub type EngineResult<T> = Result<T, EngineError>;
