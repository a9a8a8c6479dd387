//! Resolution engine.
//!
//! This module is the *public entry point* for the engine. The work is split
//! into focused submodules under `src/engine/` while public paths stay stable
//! (for example `crate::engine::CompiledTemplates` and
//! `crate::engine::SystemConfiguration`).
//!
//! ## How the parts work together
//!
//! Resolving a set of templates against the bus is a fixed-point loop:
//!
//! ```text
//! templates (all) ──┐
//!                   │  CompiledTemplates::new       (compiled_templates.rs)
//!                   │    - pre-checks, probe parse, interface pre-collection
//!                   └──────────────┬───────────────
//!                                  │
//!            ResolutionLoop::run   │                (scan.rs)
//!              ┌───────────────────v────────────────────┐
//!              │ SnapshotBuilder::extend  (snapshot.rs) │
//!              │ probe::evaluate          (probe.rs)    │◄─┐
//!              │   └─ matches             (matcher.rs)  │  │ something
//!              │ synthesize               (synthesize.rs)  │ passed
//!              │   ├─ Substituter         (template.rs) │  │
//!              │   │    └─ expression     (expression.rs)  │
//!              │   └─ RecordKey           (dedup.rs)    │──┘
//!              └───────────────────┬────────────────────┘
//!                                  │ fixed point
//!                                  v
//!                unmatched report, prune (system.rs), LoopMetrics
//! ```
//!
//! There is no dependency graph between templates. A `FOUND(x)` token simply
//! fails until `x` has passed, and the loop repeats while anything passes. The
//! pending set strictly shrinks each round, so the loop terminates.
//!
//! ## Responsibilities by module
//!
//! - `compiled_templates.rs`: validates templates, parses their probe
//!   statements once and indexes them by the interfaces they probe.
//! - `probe.rs`: probe tokens and the statement evaluator.
//! - `matcher.rs`: pattern versus live value comparison.
//! - `expression.rs`: left-to-right integer arithmetic in placeholders.
//! - `template.rs`: `$NAME` substitution and device name generation.
//! - `dedup.rs`: stable record identifiers.
//! - `synthesize.rs`: record materialization, adoption and expose actions.
//! - `snapshot.rs`: incremental, retried bus snapshot extension.
//! - `scan.rs`: scan rounds and the resolution loop.
//! - `system.rs`: the System Configuration, pruning and change feeds.
//! - `trigger.rs`: bus event classification for the service.
//! - `metrics.rs`: timing and counters for loops and rounds.
//!
//! ## Public surface
//!
//! Most code interacts with the engine via:
//!
//! - [`CompiledTemplates`] (compile once, resolve many times)
//! - [`SystemConfiguration`] and [`ChangeFeed`] (the output)
//! - [`TriggerInfo`] (deciding when to resolve again)
//!
//! ## Debugging
//!
//! Set `RUST_LOG=entity_resolver=debug` to trace rounds, passes and fetches.

#[path = "engine/compiled_templates.rs"]
mod compiled_templates;
#[path = "engine/dedup.rs"]
mod dedup;
#[path = "engine/expression.rs"]
mod expression;
#[path = "engine/matcher.rs"]
mod matcher;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/probe.rs"]
mod probe;
#[path = "engine/scan.rs"]
mod scan;
#[path = "engine/snapshot.rs"]
mod snapshot;
#[path = "engine/synthesize.rs"]
mod synthesize;
#[path = "engine/system.rs"]
mod system;
#[path = "engine/template.rs"]
mod template;
#[path = "engine/trigger.rs"]
mod trigger;

pub use compiled_templates::{CompiledTemplate, CompiledTemplates, StatementFeatures};
pub use dedup::RecordKey;
pub use expression::evaluate as evaluate_expression;
pub use matcher::matches;
pub use metrics::{LoopMetrics, RoundMetrics};
pub use probe::{MatchResult, ProbeStatement, ProbeToken, evaluate as evaluate_probe};
pub(crate) use scan::{LoopOutcome, ResolutionContext, ResolutionLoop};
pub use system::{ChangeFeed, SystemConfiguration, inventory_path};
pub(crate) use system::{InventoryEvent, log_inventory};
pub use template::Substituter;
pub use trigger::{BusEvent, TriggerInfo};
