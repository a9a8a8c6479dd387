//! Scan rounds and the resolution loop.
//!
//! This module is the operational core of the engine:
//!
//! - Extend the bus snapshot with what the pending templates need (see
//!   `snapshot.rs`).
//! - Evaluate every pending template's probe (see `probe.rs`).
//! - Synthesize records for those that pass (see `synthesize.rs`).
//! - Repeat until a round passes nothing (a fixpoint), then report what never
//!   matched and prune what disappeared.
//!
//! ## Round structure
//!
//! ```text
//! Idle ─► BuildingSnapshot ─► EvaluatingProbes ─► Synthesizing ─► Deciding
//!               ▲                                                    │
//!               └──────────── something passed ──────────────────────┤
//!                                                  nothing passed ─► Idle
//! ```
//!
//! There is no dependency graph: a template using `FOUND(x)` simply fails
//! until `x` is in the pass history. Templates are evaluated in source order
//! and the history is updated as soon as one passes, so `FOUND(x)` succeeds in
//! the same round when `x` comes first.
//!
//! ## Invariants
//!
//! - A template is evaluated only while absent from the pass history, so each
//!   round either shrinks the pending set or ends the loop.
//! - The [`ResolutionContext`] is owned by the loop; nothing else touches the
//!   snapshot or pending set while it runs.

use super::compiled_templates::{CompiledTemplate, CompiledTemplates, StatementFeatures};
use super::metrics::{LoopMetrics, RoundMetrics};
use super::probe;
use super::snapshot::SnapshotBuilder;
use super::system::SystemConfiguration;
use crate::config::EngineOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::directory::Directory;
use crate::error::DirectoryUnavailable;
use crate::{BusSnapshot, PassHistory};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

/// Mutable state of one resolution loop.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// Templates matched so far in this loop.
    pub pass_history: PassHistory,
    /// Bus state accumulated across rounds.
    pub snapshot: BusSnapshot,
    /// Working copy of the System Configuration.
    pub configuration: SystemConfiguration,
    /// Last persisted configuration, consulted for record adoption.
    pub previous: SystemConfiguration,
    /// Ids present before the loop and not (yet) matched again.
    pub missing: BTreeSet<String>,
    pub diagnostics: Diagnostics,
}

impl ResolutionContext {
    pub fn new(configuration: SystemConfiguration, previous: SystemConfiguration) -> Self {
        let missing = configuration.ids().map(str::to_string).collect();
        Self { configuration, previous, missing, ..Self::default() }
    }
}

/// One pass over the pending templates.
pub struct ScanRound<'a> {
    templates: &'a CompiledTemplates,
    builder: SnapshotBuilder<'a>,
}

impl<'a> ScanRound<'a> {
    pub fn new(templates: &'a CompiledTemplates, directory: &'a dyn Directory, options: &'a EngineOptions) -> Self {
        Self { templates, builder: SnapshotBuilder::new(directory, &options.fetch) }
    }

    /// Run one round. Also returns the time spent extending the snapshot.
    #[tracing::instrument(level = "debug", skip(self, context))]
    pub async fn run(
        &self,
        context: &mut ResolutionContext,
        round: usize,
    ) -> Result<(RoundMetrics, Duration), DirectoryUnavailable> {
        let start = Instant::now();
        let mut metrics = RoundMetrics::default();

        let pending: Vec<&CompiledTemplate> =
            self.templates.iter().filter(|template| !context.pass_history.contains(&template.name)).collect();

        // BuildingSnapshot
        let interfaces: BTreeSet<String> =
            pending.iter().flat_map(|template| template.interfaces.iter().cloned()).collect();
        let stats = self.builder.extend(&mut context.snapshot, &interfaces, &mut context.diagnostics).await?;
        let snapshot_time = start.elapsed();
        metrics.interfaces_requested = stats.requested;
        metrics.objects_fetched = stats.fetched;
        metrics.objects_dropped = stats.dropped;

        // EvaluatingProbes + Synthesizing
        for template in pending {
            // An earlier template of the same name passed this round.
            if context.pass_history.contains(&template.name) {
                continue;
            }
            let Ok(statement) = &template.statement else {
                continue;
            };
            // Failed in round one and reads neither the bus nor the history.
            if round > 1 && template.features.contains(StatementFeatures::CONSTANT) {
                continue;
            }

            metrics.templates_evaluated += 1;
            let result = probe::evaluate(statement, &context.snapshot, &context.pass_history);
            if !result.passed {
                continue;
            }

            tracing::debug!(template = %template.name, devices = result.devices.len(), "probe passed");
            context.pass_history.insert(template.name.clone());
            let synthesis = context.synthesize(template, result.devices);
            context.diagnostics.extend(synthesis.diagnostics);
            metrics.records_written += synthesis.written;
            metrics.names_passed.push(template.name.clone());
        }

        metrics.duration = start.elapsed();
        tracing::debug!(
            passed = metrics.names_passed.len(),
            written = metrics.records_written,
            elapsed_ms = metrics.duration.as_millis() as u64,
            "round finished"
        );
        Ok((metrics, snapshot_time))
    }
}

/// Result of a completed loop.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub context: ResolutionContext,
    /// Templates that never passed, in source order.
    pub unmatched: Vec<String>,
    /// Records pruned at the end of the loop.
    pub removed: SystemConfiguration,
    pub metrics: LoopMetrics,
}

/// Drives scan rounds to the fixed point.
pub struct ResolutionLoop<'a> {
    templates: &'a CompiledTemplates,
    directory: &'a dyn Directory,
    options: &'a EngineOptions,
}

impl<'a> ResolutionLoop<'a> {
    pub fn new(templates: &'a CompiledTemplates, directory: &'a dyn Directory, options: &'a EngineOptions) -> Self {
        Self { templates, directory, options }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(templates = self.templates.len()))]
    pub async fn run(&self, mut context: ResolutionContext) -> Result<LoopOutcome, DirectoryUnavailable> {
        let start = Instant::now();
        let mut metrics = LoopMetrics::default();
        context.diagnostics.extend(self.templates.diagnostics().iter().cloned());

        let round = ScanRound::new(self.templates, self.directory, self.options);
        loop {
            let (round_metrics, snapshot_time) = round.run(&mut context, metrics.rounds.len() + 1).await?;
            metrics.snapshot += snapshot_time;
            let progressed = !round_metrics.names_passed.is_empty();
            metrics.rounds.push(round_metrics);

            if !progressed {
                break;
            }
            if self.options.max_rounds.is_some_and(|max| metrics.rounds.len() >= max) {
                tracing::warn!(rounds = metrics.rounds.len(), "round limit reached before the fixed point");
                break;
            }
        }

        let mut unmatched = Vec::new();
        for template in self.templates.iter() {
            if !context.pass_history.contains(&template.name) && !unmatched.contains(&template.name) {
                unmatched.push(template.name.clone());
            }
        }
        for name in &unmatched {
            context.diagnostics.record(Diagnostic::UnmatchedTemplate { name: name.clone() });
        }

        let power_on = self.directory.host_power_on().await;
        let removed = context.configuration.prune(&context.missing, power_on);

        metrics.total = start.elapsed();
        tracing::debug!(
            rounds = metrics.rounds.len(),
            passed = context.pass_history.len(),
            unmatched = unmatched.len(),
            removed = removed.len(),
            "resolution loop finished"
        );
        Ok(LoopOutcome { context, unmatched, removed, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::engine::dedup::RecordKey;
    use serde_json::{Value, json};

    const FRU: &str = "xyz.openbmc_project.FruDevice";

    fn compile(records: Value) -> CompiledTemplates {
        let Value::Array(records) = records else { panic!("expected array") };
        CompiledTemplates::new(records)
    }

    async fn run(
        templates: &CompiledTemplates,
        directory: &MemoryDirectory,
        context: ResolutionContext,
    ) -> LoopOutcome {
        let options = EngineOptions::default();
        ResolutionLoop::new(templates, directory, &options).run(context).await.unwrap()
    }

    fn wailua() -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        directory.insert(
            "/example",
            FRU,
            properties! { "BOARD_PRODUCT_NAME" => "Wailua Falls", "BUS" => 3u32, "ADDRESS" => 80u32 },
        );
        directory
    }

    #[tokio::test]
    async fn wailua_falls_end_to_end() {
        let templates = compile(json!([{
            "Name": "Wailua Falls Baseboard",
            "Type": "Board",
            "Probe": "xyz.openbmc_project.FruDevice({'BOARD_PRODUCT_NAME': 'Wailua Falls'})",
            "Exposes": [{"Name": "bmc temp", "Type": "TMP75", "Bus": "$bus", "Address": "$address"}],
        }]));
        let directory = wailua();

        let outcome = run(&templates, &directory, ResolutionContext::default()).await;
        assert!(outcome.unmatched.is_empty());
        assert_eq!(outcome.metrics.rounds.len(), 2);

        let props = properties! { "BOARD_PRODUCT_NAME" => "Wailua Falls", "BUS" => 3u32, "ADDRESS" => 80u32 };
        let id = RecordKey::new("Wailua Falls Baseboard", &props);
        let record = outcome.context.configuration.get(id.as_str()).unwrap();
        assert_eq!(record["Exposes"][0]["Bus"], json!(3));
        assert_eq!(record["Exposes"][0]["Address"], json!(80));
    }

    #[tokio::test]
    async fn found_waits_for_its_dependency() {
        let templates = compile(json!([
            {"Name": "dependent", "Probe": ["FOUND('second')"]},
            {"Name": "first", "Probe": "TRUE"},
            {"Name": "second", "Probe": "TRUE"},
        ]));
        let directory = MemoryDirectory::new();

        let outcome = run(&templates, &directory, ResolutionContext::default()).await;
        let rounds: Vec<Vec<&str>> =
            outcome.metrics.rounds.iter().map(|r| r.names_passed.iter().map(String::as_str).collect()).collect();
        assert_eq!(rounds, vec![vec!["first", "second"], vec!["dependent"], vec![]]);
        assert_eq!(outcome.context.pass_history.iter().collect::<Vec<_>>(), vec!["first", "second", "dependent"]);
    }

    #[tokio::test]
    async fn found_sees_earlier_templates_in_the_same_round() {
        let templates = compile(json!([
            {"Name": "first", "Probe": "TRUE"},
            {"Name": "dependent", "Probe": ["FOUND('first')"]},
        ]));
        let directory = MemoryDirectory::new();

        let outcome = run(&templates, &directory, ResolutionContext::default()).await;
        assert_eq!(outcome.metrics.rounds[0].names_passed, vec!["first", "dependent"]);
        assert_eq!(outcome.metrics.rounds.len(), 2);
    }

    #[tokio::test]
    async fn unmatched_and_malformed_templates_are_reported() {
        let templates = compile(json!([
            {"Name": "never", "Probe": "FALSE"},
            {"Name": "broken", "Probe": "xyz.Fru({'A': })"},
            {"Name": "missing dep", "Probe": "FOUND('nobody')"},
        ]));
        let directory = MemoryDirectory::new();

        let outcome = run(&templates, &directory, ResolutionContext::default()).await;
        assert_eq!(outcome.unmatched, vec!["never", "broken", "missing dep"]);
        assert_eq!(outcome.metrics.rounds.len(), 1);
        assert_eq!(outcome.metrics.rounds[0].templates_evaluated, 2);

        let diagnostics = outcome.context.diagnostics.into_vec();
        assert!(matches!(diagnostics[0], Diagnostic::MalformedProbe { .. }));
        assert_eq!(diagnostics.iter().filter(|d| matches!(d, Diagnostic::UnmatchedTemplate { .. })).count(), 3);
    }

    #[tokio::test]
    async fn snapshot_is_reused_across_rounds() {
        let templates = compile(json!([
            {"Name": "board", "Probe": "xyz.openbmc_project.FruDevice({'BUS': 3})"},
            {"Name": "other", "Probe": ["xyz.openbmc_project.FruDevice({'BUS': 9})", "OR", "FOUND('x')"]},
        ]));
        let directory = wailua();

        let outcome = run(&templates, &directory, ResolutionContext::default()).await;
        assert_eq!(directory.lookup_calls(), 1);
        assert_eq!(outcome.metrics.rounds[1].templates_evaluated, 1);
        assert_eq!(outcome.metrics.rounds[1].interfaces_requested, 0);
        assert_eq!(outcome.unmatched, vec!["other"]);
    }

    #[tokio::test]
    async fn constant_statements_are_evaluated_once() {
        let templates = compile(json!([
            {"Name": "never", "Probe": ["FALSE", "OR", "FALSE"]},
            {"Name": "always", "Probe": "TRUE"},
        ]));
        let directory = MemoryDirectory::new();

        let outcome = run(&templates, &directory, ResolutionContext::default()).await;
        assert_eq!(outcome.metrics.rounds[0].templates_evaluated, 2);
        assert_eq!(outcome.metrics.rounds[1].templates_evaluated, 0);
        assert_eq!(outcome.unmatched, vec!["never"]);
    }

    #[tokio::test]
    async fn vanished_records_are_pruned_unless_power_is_off() {
        let templates = compile(json!([{"Name": "chassis", "Probe": "TRUE"}]));
        let directory = MemoryDirectory::new();
        let before: SystemConfiguration = [
            ("chassis".to_string(), json!({"Name": "chassis"})),
            ("gone".to_string(), json!({"Name": "gone"})),
            ("cpu".to_string(), json!({"Name": "cpu", "PowerState": "On"})),
        ]
        .into_iter()
        .collect();

        let context = ResolutionContext::new(before.clone(), SystemConfiguration::new());
        let outcome = run(&templates, &directory, context).await;
        assert_eq!(outcome.removed.ids().collect::<Vec<_>>(), vec!["cpu", "gone"]);
        assert_eq!(outcome.context.configuration.ids().collect::<Vec<_>>(), vec!["chassis"]);

        directory.set_host_power(false);
        let outcome = run(&templates, &directory, ResolutionContext::new(before, SystemConfiguration::new())).await;
        assert_eq!(outcome.removed.ids().collect::<Vec<_>>(), vec!["gone"]);
        assert_eq!(outcome.context.configuration.ids().collect::<Vec<_>>(), vec!["chassis", "cpu"]);
    }

    #[tokio::test]
    async fn round_limit_stops_the_loop() {
        let templates = compile(json!([
            {"Name": "c", "Probe": "FOUND('b')"},
            {"Name": "b", "Probe": "FOUND('a')"},
            {"Name": "a", "Probe": "TRUE"},
        ]));
        let directory = MemoryDirectory::new();
        let options = EngineOptions { max_rounds: Some(2), ..EngineOptions::default() };

        let outcome =
            ResolutionLoop::new(&templates, &directory, &options).run(ResolutionContext::default()).await.unwrap();
        assert_eq!(outcome.metrics.rounds.len(), 2);
        assert_eq!(outcome.unmatched, vec!["c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_directory_aborts_the_loop() {
        let templates = compile(json!([{"Name": "board", "Probe": "xyz.openbmc_project.FruDevice({})"}]));
        let directory = wailua();
        directory.set_unreachable(true);
        let options = EngineOptions::default();

        let err =
            ResolutionLoop::new(&templates, &directory, &options).run(ResolutionContext::default()).await.unwrap_err();
        assert_eq!(err.attempts, options.fetch.lookup_retries + 1);
    }
}
