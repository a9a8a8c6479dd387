//! Resolution loop metrics.
//!
//! Collected on every loop and returned with the report:
//!
//! - `LoopMetrics` for the whole loop (wall time, time spent waiting on the
//!   directory, and one entry per round).
//! - `RoundMetrics` for one scan round.
//!
//! ## Design notes
//!
//! - Durations are measured with `tokio::time::Instant`, so paused-clock tests
//!   observe backoff as elapsed time.
//! - `names_passed` keeps template order so reports show the dependency
//!   order the fixed point discovered.

use serde::Serialize;
use std::time::Duration;

// --- Metrics -----------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct LoopMetrics {
    /// Total elapsed time of the loop.
    pub total: Duration,
    /// Cumulative time spent extending the bus snapshot.
    pub snapshot: Duration,
    /// One entry per scan round, in order.
    pub rounds: Vec<RoundMetrics>,
}

impl LoopMetrics {
    /// Records written across all rounds.
    pub fn records_written(&self) -> usize {
        self.rounds.iter().map(|round| round.records_written).sum()
    }

    /// Templates that passed, in the order they passed.
    pub fn passed(&self) -> impl Iterator<Item = &str> {
        self.rounds.iter().flat_map(|round| round.names_passed.iter().map(String::as_str))
    }
}

/// Timing and counters for a single scan round.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RoundMetrics {
    /// Elapsed time for the round, snapshot extension included.
    pub duration: Duration,
    /// Interfaces asked of the directory this round.
    pub interfaces_requested: usize,
    /// (path, interface) pairs added to the snapshot.
    pub objects_fetched: usize,
    /// Pairs dropped after exhausting retries.
    pub objects_dropped: usize,
    /// Templates whose probe was evaluated.
    pub templates_evaluated: usize,
    /// Templates that passed this round.
    pub names_passed: Vec<String>,
    /// Records synthesized (adopted records excluded).
    pub records_written: usize,
}
