use crate::config::EngineOptions;
use crate::diagnostics::Diagnostic;
use crate::directory::Directory;
use crate::engine::{
    ChangeFeed, CompiledTemplates, InventoryEvent, LoopMetrics, ResolutionContext, ResolutionLoop,
    SystemConfiguration, log_inventory,
};
use crate::error::{DirectoryUnavailable, EngineResult};
use crate::source::ConfigSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of one completed resolution loop.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    /// The committed System Configuration.
    pub configuration: SystemConfiguration,
    /// Record ids added, updated and removed by this loop.
    pub changes: ChangeFeed,
    /// Records whose id was not present before the loop.
    pub new_records: SystemConfiguration,
    /// Records pruned because nothing matched them again.
    pub removed: SystemConfiguration,
    /// Templates that never matched, in source order.
    pub unmatched: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub metrics: LoopMetrics,
    pub finished_at: DateTime<Utc>,
}

impl ResolutionReport {
    /// Templates that matched, in the order they passed.
    pub fn passed(&self) -> impl Iterator<Item = &str> {
        self.metrics.passed()
    }
}

/// Owns the committed System Configuration and resolves it against a
/// directory.
///
/// Each [`resolve`](Self::resolve) reloads the templates, runs a loop on a
/// working copy and commits the copy only when the loop completes. Dropping
/// an in-flight `resolve` future leaves the committed configuration as it was.
///
/// # Example
/// ```
/// use entity_resolver::{EngineOptions, MemoryDirectory, Resolver, StaticSource};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let source = StaticSource::new(vec![json!({"Name": "Chassis", "Probe": "TRUE"})]);
/// let mut resolver = Resolver::new(Arc::new(MemoryDirectory::new()), Arc::new(source), EngineOptions::default());
///
/// let report = resolver.resolve().await.unwrap();
/// assert_eq!(report.changes.added, vec!["Chassis"]);
/// # }
/// ```
pub struct Resolver {
    directory: Arc<dyn Directory>,
    source: Arc<dyn ConfigSource>,
    options: EngineOptions,
    configuration: SystemConfiguration,
    previous: SystemConfiguration,
    probe_interfaces: BTreeSet<String>,
}

impl Resolver {
    pub fn new(directory: Arc<dyn Directory>, source: Arc<dyn ConfigSource>, options: EngineOptions) -> Self {
        Self {
            directory,
            source,
            options,
            configuration: SystemConfiguration::new(),
            previous: SystemConfiguration::new(),
            probe_interfaces: BTreeSet::new(),
        }
    }

    /// Records persisted by an earlier run, eligible for adoption.
    pub fn with_previous(mut self, previous: SystemConfiguration) -> Self {
        self.previous = previous;
        self
    }

    /// The committed System Configuration.
    pub fn configuration(&self) -> &SystemConfiguration {
        &self.configuration
    }

    /// Interfaces probed by the templates of the last load.
    pub fn probe_interfaces(&self) -> &BTreeSet<String> {
        &self.probe_interfaces
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Reload templates and run one resolution loop to its fixed point.
    #[tracing::instrument(level = "info", skip(self), fields(records = self.configuration.len()))]
    pub async fn resolve(&mut self) -> EngineResult<ResolutionReport> {
        let templates = CompiledTemplates::new(self.source.load().await?);
        self.probe_interfaces = templates.probe_interfaces();

        let report =
            run_loop(&templates, self.directory.as_ref(), &self.options, &self.configuration, &self.previous).await?;
        self.configuration = report.configuration.clone();
        Ok(report)
    }
}

/// Resolve `templates` once against `directory`, starting from an empty
/// configuration.
pub async fn resolve_templates(
    templates: Vec<Value>,
    directory: &dyn Directory,
    options: &EngineOptions,
) -> EngineResult<ResolutionReport> {
    let templates = CompiledTemplates::new(templates);
    let empty = SystemConfiguration::new();
    Ok(run_loop(&templates, directory, options, &empty, &empty).await?)
}

async fn run_loop(
    templates: &CompiledTemplates,
    directory: &dyn Directory,
    options: &EngineOptions,
    committed: &SystemConfiguration,
    previous: &SystemConfiguration,
) -> Result<ResolutionReport, DirectoryUnavailable> {
    let context = ResolutionContext::new(committed.clone(), previous.clone());
    let outcome = ResolutionLoop::new(templates, directory, options).run(context).await?;

    let configuration = outcome.context.configuration;
    let changes = ChangeFeed::between(committed, &configuration);
    let new_records = configuration.added_since(committed);
    log_inventory(InventoryEvent::Removed, &outcome.removed);
    log_inventory(InventoryEvent::Added, &new_records);

    tracing::info!(
        added = changes.added.len(),
        updated = changes.updated.len(),
        removed = changes.removed.len(),
        unmatched = outcome.unmatched.len(),
        rounds = outcome.metrics.rounds.len(),
        "resolution complete"
    );

    Ok(ResolutionReport {
        configuration,
        changes,
        new_records,
        removed: outcome.removed,
        unmatched: outcome.unmatched,
        diagnostics: outcome.context.diagnostics.into_vec(),
        metrics: outcome.metrics,
        finished_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::engine::RecordKey;
    use crate::error::{EngineError, SourceError};
    use crate::source::{JsonFileSource, StaticSource};
    use serde_json::json;

    const FRU: &str = "xyz.openbmc_project.FruDevice";

    fn templates() -> Vec<Value> {
        vec![
            json!({
                "Name": "PSU $bus",
                "Type": "PowerSupply",
                "Probe": "xyz.openbmc_project.FruDevice({'PRODUCT_PRODUCT_NAME': 'PSU.*'})",
                "Exposes": [{"Name": "psu$bus", "Type": "pmbus", "Bus": "$bus", "Address": "$address"}],
            }),
            json!({"Name": "Chassis", "Probe": ["FOUND('PSU $bus')"]}),
            json!({"Name": "Unused", "Probe": "FALSE"}),
        ]
    }

    fn psu(directory: &MemoryDirectory, path: &str, bus: u32) {
        let properties = properties! { "PRODUCT_PRODUCT_NAME" => "PSU A", "BUS" => bus, "ADDRESS" => 88u32 };
        directory.insert(path, FRU, properties);
    }

    fn resolver(directory: Arc<MemoryDirectory>) -> Resolver {
        Resolver::new(directory, Arc::new(StaticSource::new(templates())), EngineOptions::default())
    }

    #[tokio::test]
    async fn resolve_commits_and_reports_changes() {
        let directory = Arc::new(MemoryDirectory::new());
        psu(&directory, "/fru/1", 1);
        psu(&directory, "/fru/2", 2);
        let mut resolver = resolver(directory.clone());

        let report = resolver.resolve().await.unwrap();
        assert_eq!(report.changes.added.len(), 3);
        assert_eq!(report.unmatched, vec!["Unused"]);
        assert_eq!(report.passed().collect::<Vec<_>>(), vec!["PSU $bus", "Chassis"]);
        assert_eq!(resolver.configuration(), &report.configuration);
        assert_eq!(resolver.probe_interfaces().iter().collect::<Vec<_>>(), vec![FRU]);

        let mut names: Vec<String> =
            report.configuration.iter().filter_map(|(_, r)| r["Name"].as_str().map(str::to_string)).collect();
        names.sort();
        assert_eq!(names, vec!["Chassis", "PSU 1", "PSU 2"]);
        assert!(report.diagnostics.iter().any(|d| matches!(d, Diagnostic::UnmatchedTemplate { .. })));
    }

    #[tokio::test]
    async fn second_resolve_is_stable_and_prunes_removed_devices() {
        let directory = Arc::new(MemoryDirectory::new());
        psu(&directory, "/fru/1", 1);
        psu(&directory, "/fru/2", 2);
        let mut resolver = resolver(directory.clone());
        resolver.resolve().await.unwrap();

        let report = resolver.resolve().await.unwrap();
        assert!(report.changes.is_empty());
        assert!(report.new_records.is_empty());

        directory.remove("/fru/2");
        let report = resolver.resolve().await.unwrap();
        let gone = RecordKey::new(
            "PSU $bus",
            &properties! { "ADDRESS" => 88u32, "BUS" => 2u32, "PRODUCT_PRODUCT_NAME" => "PSU A" },
        );
        assert_eq!(report.changes.removed, vec![gone.to_string()]);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(resolver.configuration().len(), 2);
    }

    #[tokio::test]
    async fn previous_records_are_adopted_unchanged() {
        let directory = Arc::new(MemoryDirectory::new());
        psu(&directory, "/fru/1", 1);
        let id = RecordKey::new(
            "PSU $bus",
            &properties! { "ADDRESS" => 88u32, "BUS" => 1u32, "PRODUCT_PRODUCT_NAME" => "PSU A" },
        );
        let previous: SystemConfiguration =
            [(id.to_string(), json!({"Name": "PSU 1", "Edited": true, "Exposes": [null, {"Name": "psu1"}]}))]
                .into_iter()
                .collect();

        let mut resolver = resolver(directory).with_previous(previous);
        let report = resolver.resolve().await.unwrap();
        let record = report.configuration.get(id.as_str()).unwrap();
        assert_eq!(record["Edited"], json!(true));
        assert_eq!(record["Exposes"], json!([{"Name": "psu1"}]));
    }

    #[tokio::test]
    async fn source_errors_surface() {
        let source = JsonFileSource::new("/nonexistent/entity-resolver/templates");
        let mut resolver = Resolver::new(Arc::new(MemoryDirectory::new()), Arc::new(source), EngineOptions::default());
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, EngineError::Source(SourceError::Io { .. })));
        assert!(resolver.configuration().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_directory_keeps_the_committed_configuration() {
        let directory = Arc::new(MemoryDirectory::new());
        psu(&directory, "/fru/1", 1);
        let mut resolver = resolver(directory.clone());
        let committed = resolver.resolve().await.unwrap().configuration;

        directory.set_unreachable(true);
        // The snapshot is rebuilt each loop, so the lookup runs again.
        let err = resolver.resolve().await.unwrap_err();
        assert!(matches!(err, EngineError::DirectoryUnavailable(_)));
        assert_eq!(resolver.configuration(), &committed);
    }

    #[tokio::test]
    async fn one_shot_resolution() {
        let directory = MemoryDirectory::new();
        psu(&directory, "/fru/7", 7);
        let report = resolve_templates(templates(), &directory, &EngineOptions::default()).await.unwrap();

        let psu = report.configuration.iter().find(|(_, r)| r["Name"] == json!("PSU 7")).unwrap().1;
        assert_eq!(psu["Exposes"][0]["Name"], json!("psu7"));
        assert_eq!(psu["Exposes"][0]["Bus"], json!(7));
        assert_eq!(psu["Exposes"][0]["Address"], json!(88));
        assert_eq!(report.metrics.rounds.len(), 2);
    }
}
