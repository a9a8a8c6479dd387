//! Bus Snapshot Builder.
//!
//! Extends a [`BusSnapshot`] with the objects exposing interfaces that pending
//! probes need and no snapshot path carries yet.
//!
//! ```text
//! interfaces ─► filter (present / skipped) ─► lookup (retry, backoff) ─► (path, iface) pairs
//!                                                                           │
//!        snapshot ◄─ merge ◄─ join_all( get_all_properties (retry, backoff) per pair )
//! ```
//!
//! ## Design notes
//!
//! - Suspension points are the lookup backoff, the batched fetch join and the
//!   per-object backoff. Dropping the future abandons all of them.
//! - A lookup answering "not found" is an empty result. Only a lookup that is
//!   still failing after `lookup_retries` retries is an error.

use crate::config::FetchOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::directory::Directory;
use crate::error::{DirectoryUnavailable, FetchError, LookupError};
use crate::{BusSnapshot, PropertyMap};
use futures::future::join_all;
use std::collections::BTreeSet;

/// Counters for one [`SnapshotBuilder::extend`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Interfaces asked of the directory.
    pub requested: usize,
    /// (path, interface) pairs merged into the snapshot.
    pub fetched: usize,
    /// Pairs dropped after exhausting their retries.
    pub dropped: usize,
}

pub struct SnapshotBuilder<'a> {
    directory: &'a dyn Directory,
    options: &'a FetchOptions,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(directory: &'a dyn Directory, options: &'a FetchOptions) -> Self {
        Self { directory, options }
    }

    /// Fetch every object exposing one of `interfaces` into `snapshot`.
    #[tracing::instrument(level = "debug", skip_all, fields(wanted = interfaces.len()))]
    pub async fn extend(
        &self,
        snapshot: &mut BusSnapshot,
        interfaces: &BTreeSet<String>,
        diagnostics: &mut Diagnostics,
    ) -> Result<FetchStats, DirectoryUnavailable> {
        let wanted: BTreeSet<String> = interfaces
            .iter()
            .filter(|interface| !self.options.skips(interface) && !snapshot.has_interface(interface))
            .cloned()
            .collect();

        let mut stats = FetchStats { requested: wanted.len(), ..FetchStats::default() };
        if wanted.is_empty() {
            return Ok(stats);
        }

        let pairs: Vec<(String, String)> = self
            .lookup(&wanted)
            .await?
            .into_iter()
            .filter(|(path, interface)| {
                !self.options.skips(interface) && !snapshot.object(path).is_some_and(|o| o.contains_key(interface))
            })
            .collect();
        tracing::debug!(pairs = pairs.len(), "fetching properties");

        let results = join_all(pairs.iter().map(|(path, interface)| self.fetch(path, interface))).await;

        for ((path, interface), result) in pairs.into_iter().zip(results) {
            match result {
                Ok(properties) => {
                    snapshot.insert(path, interface, properties);
                    stats.fetched += 1;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "dropping object from snapshot");
                    let attempts = self.property_attempts();
                    diagnostics.record(Diagnostic::FetchDropped { path, interface, attempts });
                    stats.dropped += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn lookup(&self, interfaces: &BTreeSet<String>) -> Result<BTreeSet<(String, String)>, DirectoryUnavailable> {
        let attempts = self.options.lookup_retries + 1;
        let mut attempt = 1;
        loop {
            match self.directory.list_paths_exposing(interfaces).await {
                Ok(pairs) => return Ok(pairs),
                Err(LookupError::NotFound) => return Ok(BTreeSet::new()),
                Err(LookupError::Unreachable(reason)) if attempt >= attempts => {
                    tracing::error!(attempts, %reason, "directory unavailable");
                    return Err(DirectoryUnavailable { attempts, last_error: reason });
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "directory lookup failed, retrying");
                    tokio::time::sleep(self.options.lookup_backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    fn property_attempts(&self) -> usize {
        self.options.property_retries.max(1)
    }

    async fn fetch(&self, path: &str, interface: &str) -> Result<PropertyMap, FetchError> {
        let attempts = self.property_attempts();
        let mut attempt = 1;
        loop {
            match self.directory.get_all_properties(path, interface).await {
                Ok(properties) => return Ok(properties),
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    tracing::debug!(path, interface, attempt, error = %err, "property read failed, retrying");
                    tokio::time::sleep(self.options.property_backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use std::time::Duration;
    use tokio::time::Instant;

    const FRU: &str = "xyz.openbmc_project.FruDevice";

    fn wanted(interfaces: &[&str]) -> BTreeSet<String> {
        interfaces.iter().map(|s| s.to_string()).collect()
    }

    fn directory() -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        directory.insert("/a", FRU, properties! { "BUS" => 1u32 });
        directory.insert("/a", "org.freedesktop.DBus.Properties", PropertyMap::new());
        directory.insert("/a", "xyz.Asset", properties! { "Model" => "m" });
        directory.insert("/b", FRU, properties! { "BUS" => 2u32 });
        directory
    }

    #[tokio::test]
    async fn fetches_all_interfaces_on_matching_paths() {
        let directory = directory();
        let options = FetchOptions::default();
        let mut snapshot = BusSnapshot::new();
        let mut diagnostics = Diagnostics::new();

        let stats = SnapshotBuilder::new(&directory, &options)
            .extend(&mut snapshot, &wanted(&[FRU]), &mut diagnostics)
            .await
            .unwrap();

        assert_eq!(stats, FetchStats { requested: 1, fetched: 3, dropped: 0 });
        assert_eq!(snapshot.object("/a").unwrap().keys().collect::<Vec<_>>(), vec![FRU, "xyz.Asset"]);
        assert!(!snapshot.has_interface("org.freedesktop.DBus.Properties"));
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn present_and_skipped_interfaces_are_not_requested() {
        let directory = directory();
        let options = FetchOptions::default();
        let mut snapshot = BusSnapshot::new();
        snapshot.insert("/z", FRU, PropertyMap::new());
        let mut diagnostics = Diagnostics::new();

        let stats = SnapshotBuilder::new(&directory, &options)
            .extend(&mut snapshot, &wanted(&[FRU, "org.freedesktop.DBus.Properties"]), &mut diagnostics)
            .await
            .unwrap();

        assert_eq!(stats.requested, 0);
        assert_eq!(directory.lookup_calls(), 0);
    }

    #[tokio::test]
    async fn not_found_is_an_empty_result() {
        let directory = directory();
        let options = FetchOptions::default();
        let mut snapshot = BusSnapshot::new();
        let mut diagnostics = Diagnostics::new();

        let stats = SnapshotBuilder::new(&directory, &options)
            .extend(&mut snapshot, &wanted(&["xyz.Nothing"]), &mut diagnostics)
            .await
            .unwrap();
        assert_eq!(stats, FetchStats { requested: 1, fetched: 0, dropped: 0 });
        assert!(snapshot.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_property_failures_are_retried() {
        let directory = directory();
        directory.fail_properties("/b", FRU, 2);
        let options = FetchOptions::default();
        let mut snapshot = BusSnapshot::new();
        let mut diagnostics = Diagnostics::new();

        let start = Instant::now();
        let stats = SnapshotBuilder::new(&directory, &options)
            .extend(&mut snapshot, &wanted(&[FRU]), &mut diagnostics)
            .await
            .unwrap();

        assert_eq!(stats.dropped, 0);
        assert!(snapshot.object("/b").is_some());
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_property_reads_drop_the_object() {
        let directory = directory();
        directory.fail_properties("/b", FRU, 10);
        let options = FetchOptions::default();
        let mut snapshot = BusSnapshot::new();
        let mut diagnostics = Diagnostics::new();

        let stats = SnapshotBuilder::new(&directory, &options)
            .extend(&mut snapshot, &wanted(&[FRU]), &mut diagnostics)
            .await
            .unwrap();

        assert_eq!(stats.dropped, 1);
        assert!(snapshot.object("/b").is_none());
        assert!(snapshot.object("/a").is_some());
        assert_eq!(
            diagnostics.into_vec(),
            vec![Diagnostic::FetchDropped { path: "/b".into(), interface: FRU.into(), attempts: 5 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_failures_are_retried_with_backoff() {
        let directory = directory();
        directory.fail_lookups(2);
        let options = FetchOptions::default();
        let mut snapshot = BusSnapshot::new();
        let mut diagnostics = Diagnostics::new();

        let start = Instant::now();
        SnapshotBuilder::new(&directory, &options)
            .extend(&mut snapshot, &wanted(&[FRU]), &mut diagnostics)
            .await
            .unwrap();

        assert_eq!(directory.lookup_calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_directory_is_fatal() {
        let directory = directory();
        directory.set_unreachable(true);
        let options = FetchOptions::default();
        let mut snapshot = BusSnapshot::new();
        let mut diagnostics = Diagnostics::new();

        let err = SnapshotBuilder::new(&directory, &options)
            .extend(&mut snapshot, &wanted(&[FRU]), &mut diagnostics)
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 6);
        assert_eq!(directory.lookup_calls(), 6);
        assert!(snapshot.is_empty());
    }
}
