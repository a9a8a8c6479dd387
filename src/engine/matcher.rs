//! Value matcher: one declarative pattern against one live value.
//!
//! The rule table is an exhaustive match over `(PatternValue, TypedValue)`:
//!
//! ```text
//! pattern \ live | string      | bool  | int/double   | bytes         | empty
//! ---------------+-------------+-------+--------------+---------------+------
//! string         | full regex  |   -   |      -       |       -       |   -
//! bool           |      -      |  ==   |      -       |       -       |   -
//! number         |      -      |   -   | exact ==     |       -       |   -
//! array          |      -      |   -   |      -       | len + elem == |   -
//! object / null  |      -      |   -   |      -       |       -       |   -
//! ```
//!
//! String patterns are anchored (`^(?:p)$`) so `"Wailua"` never matches
//! `"Wailua Falls"`. Compiled regexes are cached process-wide; a pattern that
//! fails to compile is cached as a failure and simply never matches.

use crate::value::{PatternValue, TypedValue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Option<Regex>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Compile `pattern` so that it must match an entire string.
pub(crate) fn compile_anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

fn full_match(pattern: &str, live: &str) -> bool {
    let Ok(mut cache) = REGEX_CACHE.lock() else {
        // Poisoned only if a previous holder panicked; fall back to an uncached compile.
        return compile_anchored(pattern).is_ok_and(|re| re.is_match(live));
    };
    let compiled = cache.entry(pattern.to_string()).or_insert_with(|| match compile_anchored(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::warn!(pattern, error = %err, "probe pattern is not a valid regex, treating as non-match");
            None
        }
    });
    compiled.as_ref().is_some_and(|re| re.is_match(live))
}

/// Compare one pattern value to one live value.
///
/// Total and side-effect free apart from regex caching and the one-time
/// warning for an invalid regex.
pub fn matches(pattern: &PatternValue, live: &TypedValue) -> bool {
    match (pattern, live) {
        (_, TypedValue::Empty) => false,
        (PatternValue::Object | PatternValue::Null, _) => false,

        (PatternValue::Str(p), TypedValue::Str(s)) => full_match(p, s),
        (PatternValue::Str(_), _) => false,

        (PatternValue::Bool(p), TypedValue::Bool(b)) => p == b,
        (PatternValue::Bool(_), _) => false,

        (PatternValue::Int(_) | PatternValue::UInt(_) | PatternValue::Float(_), _) => {
            match (pattern.numeric(), live.numeric()) {
                (Some(p), Some(l)) => p.exactly_equals(l),
                _ => false,
            }
        }

        (PatternValue::Array(items), TypedValue::Bytes(bytes)) => {
            items.len() == bytes.len()
                && items.iter().zip(bytes).all(|(item, byte)| {
                    item.numeric().is_some_and(|n| n.exactly_equals(crate::value::Numeric::Int(*byte as i128)))
                })
        }
        (PatternValue::Array(_), _) => false,
    }
}
