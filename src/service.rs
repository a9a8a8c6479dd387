//! Event-driven resolution service.
//!
//! Runs a [`Resolver`] on a tokio task and re-resolves when the bus changes:
//!
//! ```text
//! notify(event) ─► TriggerInfo::scan ─► debounce (quiet period) ─► resolve ─► broadcast report
//!                        │ irrelevant                                  │
//!                        └─► dropped             events queue here ◄───┘ (one follow-up loop)
//! ```
//!
//! ## Invariants
//!
//! - Loops never overlap. Events that arrive while a loop runs stay queued and
//!   arm a single debounce once it finishes.
//! - Shutdown drops the in-flight loop. The loop works on a copy, so the
//!   committed configuration is the one from the last completed loop.
//! - A [`DirectoryUnavailable`](crate::DirectoryUnavailable) failure stops the
//!   service. Template load failures are reported and the service keeps the
//!   committed configuration.

use crate::api::{ResolutionReport, Resolver};
use crate::engine::{BusEvent, SystemConfiguration, TriggerInfo};
use crate::error::{EngineError, EngineResult};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

const UPDATE_CAPACITY: usize = 16;

/// Published after every resolution attempt.
#[derive(Debug, Clone)]
pub enum ServiceUpdate {
    Resolved(Arc<ResolutionReport>),
    /// A loop failed. `fatal` failures stop the service.
    Failed { error: String, fatal: bool },
}

/// Control surface of a running [`ResolutionService`].
///
/// Dropping the handle stops the service.
pub struct ServiceHandle {
    events: mpsc::UnboundedSender<BusEvent>,
    updates: broadcast::Sender<ServiceUpdate>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<EngineResult<SystemConfiguration>>,
}

impl ServiceHandle {
    /// Submit a bus event. Returns `false` once the service has stopped.
    pub fn notify(&self, event: BusEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceUpdate> {
        self.updates.subscribe()
    }

    /// Stop the service and return the last committed configuration, or the
    /// fatal error that stopped it.
    pub async fn shutdown(self) -> EngineResult<SystemConfiguration> {
        let _ = self.stop.send(());
        self.task.await?
    }
}

pub struct ResolutionService {
    resolver: Resolver,
    events: mpsc::UnboundedReceiver<BusEvent>,
    updates: broadcast::Sender<ServiceUpdate>,
    stop: oneshot::Receiver<()>,
}

impl ResolutionService {
    /// Start the service. The first loop runs immediately, later ones after
    /// the resolver's debounce period.
    pub fn spawn(resolver: Resolver) -> ServiceHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let (stop_tx, stop) = oneshot::channel();

        let service = ResolutionService { resolver, events, updates: updates.clone(), stop };
        let task = tokio::spawn(service.run());
        ServiceHandle { events: events_tx, updates, stop: stop_tx, task }
    }

    async fn run(mut self) -> EngineResult<SystemConfiguration> {
        let debounce = self.resolver.options().debounce;
        let mut pending = TriggerInfo { forced: true, ..TriggerInfo::default() };
        let mut deadline = Some(Instant::now());
        tracing::info!(debounce_ms = debounce.as_millis() as u64, "resolution service started");

        loop {
            tokio::select! {
                biased;
                _ = &mut self.stop => break,
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    let trigger = TriggerInfo::scan(&event, self.resolver.probe_interfaces());
                    if !trigger.warrants_resolution() {
                        tracing::trace!(?event, "ignoring bus event");
                        continue;
                    }
                    tracing::debug!(path = event.path().unwrap_or("-"), "bus change, debouncing");
                    pending.merge(trigger);
                    deadline = Some(Instant::now() + debounce);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    let trigger = std::mem::take(&mut pending);
                    tracing::debug!(forced = trigger.forced, interfaces = ?trigger.interfaces, "starting resolution");

                    let result = tokio::select! {
                        biased;
                        _ = &mut self.stop => None,
                        result = self.resolver.resolve() => Some(result),
                    };
                    let Some(result) = result else {
                        tracing::info!("shutdown during resolution, abandoning loop");
                        break;
                    };
                    self.publish(result)?;
                }
            }
        }

        tracing::info!("resolution service stopped");
        Ok(self.resolver.configuration().clone())
    }

    /// Broadcast the outcome of a loop. Fatal errors are returned.
    fn publish(&self, result: EngineResult<ResolutionReport>) -> EngineResult<()> {
        match result {
            Ok(report) => {
                let _ = self.updates.send(ServiceUpdate::Resolved(Arc::new(report)));
                Ok(())
            }
            Err(err @ EngineError::DirectoryUnavailable(_)) => {
                tracing::error!(error = %err, "resolution service stopping");
                let _ = self.updates.send(ServiceUpdate::Failed { error: err.to_string(), fatal: true });
                Err(err)
            }
            Err(err) => {
                tracing::error!(error = %err, "resolution failed, keeping the committed configuration");
                let _ = self.updates.send(ServiceUpdate::Failed { error: err.to_string(), fatal: false });
                Ok(())
            }
        }
    }
}
