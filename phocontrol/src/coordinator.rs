//! Sleep coordinator.
//!
//! One task owns the power transitions: `Sleep` and `Wakeup` are processed
//! strictly one after the other, each one awaited until the controller has
//! applied it. `Refresh` and `Update` run as detached jobs on the playlist
//! store, whose own lock coalesces overlapping syncs. A sync never touches
//! the playing state; only an explicit wakeup does.

use crate::command::{CommandSource, ControlCommand};
use crate::controller::{ControllerHandle, PlayerStatus};
use crate::errors::{ControlError, Result};
use chrono::Utc;
use phoplaylist::{PlaylistStore, SyncOutcome, SyncReport};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorAction {
    Refresh,
    Update,
    Sleep,
    Wakeup,
}

impl CoordinatorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorAction::Refresh => "refresh",
            CoordinatorAction::Update => "update",
            CoordinatorAction::Sleep => "sleep",
            CoordinatorAction::Wakeup => "wakeup",
        }
    }

    /// The power action carried by a player command, if any.
    pub fn for_command(command: ControlCommand) -> Option<Self> {
        match command {
            ControlCommand::Sleep => Some(CoordinatorAction::Sleep),
            ControlCommand::Wakeup => Some(CoordinatorAction::Wakeup),
            _ => None,
        }
    }

    fn is_sync(&self) -> bool {
        matches!(self, CoordinatorAction::Refresh | CoordinatorAction::Update)
    }
}

impl fmt::Display for CoordinatorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Age of the last refresh beyond which a wakeup refreshes first.
    pub wake_refresh_after: Duration,
    /// First retry delay after a failed sync, doubled on each failure.
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            wake_refresh_after: Duration::from_secs(6 * 3600),
            retry_backoff: Duration::from_secs(30),
            retry_backoff_max: Duration::from_secs(1800),
        }
    }
}

impl CoordinatorSettings {
    /// Delay before the retry following the `failures`-th consecutive failure.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        self.retry_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.retry_backoff_max)
    }
}

/// Result of an awaited action.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionReport {
    Sync(SyncReport),
    Power(PlayerStatus),
}

struct Job {
    action: CoordinatorAction,
    source: CommandSource,
    ack: Option<oneshot::Sender<Result<ActionReport>>>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl CoordinatorHandle {
    /// Fire and forget.
    pub fn submit(&self, action: CoordinatorAction, source: CommandSource) -> Result<()> {
        self.tx
            .send(Job {
                action,
                source,
                ack: None,
            })
            .map_err(|_| ControlError::CoordinatorUnavailable)
    }

    /// Submits the action and waits for its completion.
    pub async fn run(&self, action: CoordinatorAction, source: CommandSource) -> Result<ActionReport> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Job {
                action,
                source,
                ack: Some(ack),
            })
            .map_err(|_| ControlError::CoordinatorUnavailable)?;
        done.await.map_err(|_| ControlError::CoordinatorUnavailable)?
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RetryState {
    failures: u32,
    pending: bool,
}

/// Failure accounting and retry scheduling for syncs.
struct Retrier {
    settings: CoordinatorSettings,
    tx: mpsc::WeakUnboundedSender<Job>,
    states: Mutex<HashMap<CoordinatorAction, RetryState>>,
}

impl Retrier {
    fn new(settings: CoordinatorSettings, tx: mpsc::WeakUnboundedSender<Job>) -> Self {
        Self {
            settings,
            tx,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// A scheduled retry is being processed.
    fn clear_pending(&self, action: CoordinatorAction) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states.entry(action).or_default().pending = false;
    }

    fn record(&self, action: CoordinatorAction, result: &phoplaylist::Result<SyncReport>) {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        let state = states.entry(action).or_default();
        match result {
            Ok(report) if report.outcome == SyncOutcome::Coalesced => {
                debug!(action = %action, "Sync already running, request coalesced");
            }
            Ok(report) => {
                if state.failures > 0 {
                    info!(action = %action, "Sync recovered after {} failure(s)", state.failures);
                }
                state.failures = 0;
                if report.album_empty {
                    warn!(action = %action, "Album listing is empty, keeping the current playlist");
                }
                if let Some(degraded) = report.degraded {
                    info!(
                        fresh = degraded.fresh,
                        total = degraded.total,
                        min_size = degraded.min_size,
                        "Playlist filled with stale items"
                    );
                }
                debug!(
                    action = %action,
                    outcome = ?report.outcome,
                    len = report.playlist_len,
                    generation = report.generation,
                    "Sync finished"
                );
            }
            Err(e) if e.is_retryable() => {
                state.failures += 1;
                let delay = self.settings.backoff(state.failures);
                warn!(
                    action = %action,
                    failures = state.failures,
                    retry_in = ?delay,
                    "Sync failed: {}", e
                );
                if !state.pending {
                    state.pending = true;
                    self.schedule(action, delay);
                }
            }
            Err(e) => {
                state.failures += 1;
                error!(action = %action, "Sync failed, not retrying: {}", e);
            }
        }
    }

    fn schedule(&self, action: CoordinatorAction, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Job {
                    action,
                    source: CommandSource::Timer,
                    ack: None,
                });
            }
        });
    }
}

struct Worker {
    store: Arc<PlaylistStore>,
    controller: ControllerHandle,
    settings: CoordinatorSettings,
    retrier: Arc<Retrier>,
}

pub struct Coordinator;

impl Coordinator {
    /// Starts the coordinator on the current runtime.
    pub fn spawn(
        store: Arc<PlaylistStore>,
        controller: ControllerHandle,
        settings: CoordinatorSettings,
    ) -> CoordinatorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store,
            controller,
            settings,
            retrier: Arc::new(Retrier::new(settings, tx.downgrade())),
        };
        tokio::spawn(worker.run(rx));
        CoordinatorHandle { tx }
    }
}

async fn sync(store: &PlaylistStore, action: CoordinatorAction) -> phoplaylist::Result<SyncReport> {
    match action {
        CoordinatorAction::Update => store.update().await,
        _ => store.refresh().await,
    }
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Job>) {
        info!("Sleep coordinator started");
        while let Some(job) = rx.recv().await {
            debug!(action = %job.action, source = %job.source, "Coordinator action");
            if job.action.is_sync() {
                self.spawn_sync(job);
            } else {
                let result = self.power(job.action, job.source).await;
                if let Err(e) = &result {
                    warn!(action = %job.action, "Power transition failed: {}", e);
                }
                if let Some(ack) = job.ack {
                    let _ = ack.send(result);
                }
            }
        }
        info!("Sleep coordinator stopped");
    }

    fn spawn_sync(&self, job: Job) {
        let store = self.store.clone();
        let retrier = self.retrier.clone();
        tokio::spawn(async move {
            if job.source == CommandSource::Timer {
                retrier.clear_pending(job.action);
            }
            let result = sync(&store, job.action).await;
            retrier.record(job.action, &result);
            if let Some(ack) = job.ack {
                let _ = ack.send(
                    result
                        .map(ActionReport::Sync)
                        .map_err(|e| ControlError::Sync(e.to_string())),
                );
            }
        });
    }

    /// Whether a wakeup must refresh the playlist before resuming.
    fn needs_refresh(&self) -> bool {
        if self.store.snapshot().is_empty() {
            return true;
        }
        match self.store.last_refresh() {
            None => true,
            Some(at) => {
                let age = (Utc::now() - at).to_std().unwrap_or_default();
                age >= self.settings.wake_refresh_after
            }
        }
    }

    async fn power(&self, action: CoordinatorAction, source: CommandSource) -> Result<ActionReport> {
        let command = match action {
            CoordinatorAction::Sleep => ControlCommand::Sleep,
            _ => ControlCommand::Wakeup,
        };

        if command == ControlCommand::Wakeup && self.needs_refresh() {
            info!("Refreshing the playlist before waking up");
            let result = self.store.refresh().await;
            self.retrier.record(CoordinatorAction::Refresh, &result);
        }

        let status = self.controller.submit_with_ack(command, source).await?;
        info!(
            action = %action,
            playing = status.state.playing,
            asleep = status.state.asleep,
            "Power transition applied"
        );
        Ok(ActionReport::Power(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoplaylist::SyncKind;
    use phosource::FetchError;

    impl Retrier {
        fn failures(&self, action: CoordinatorAction) -> u32 {
            let states = self.states.lock().unwrap_or_else(|p| p.into_inner());
            states.get(&action).map(|s| s.failures).unwrap_or(0)
        }
    }

    fn report(outcome: SyncOutcome) -> phoplaylist::Result<SyncReport> {
        Ok(SyncReport {
            kind: SyncKind::Refresh,
            outcome,
            added: 0,
            removed: 0,
            refetched: 0,
            skipped: Vec::new(),
            evicted: Vec::new(),
            degraded: None,
            playlist_len: 0,
            generation: 0,
            album_empty: false,
            finished_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn coalesced_sync_keeps_the_failure_count() {
        let (tx, _rx) = mpsc::unbounded_channel::<Job>();
        let retrier = Retrier::new(CoordinatorSettings::default(), tx.downgrade());
        let failure: phoplaylist::Result<SyncReport> = Err(phoplaylist::Error::Fetch(
            FetchError::Unreachable("offline".to_string()),
        ));

        retrier.record(CoordinatorAction::Refresh, &failure);
        retrier.record(CoordinatorAction::Refresh, &failure);
        assert_eq!(retrier.failures(CoordinatorAction::Refresh), 2);

        retrier.record(CoordinatorAction::Refresh, &report(SyncOutcome::Coalesced));
        assert_eq!(retrier.failures(CoordinatorAction::Refresh), 2);

        retrier.record(CoordinatorAction::Refresh, &report(SyncOutcome::Unchanged));
        assert_eq!(retrier.failures(CoordinatorAction::Refresh), 0);
    }
}
