//! Player controller: the single writer of the player state.
//!
//! Every command, whatever its source, goes through one unbounded queue
//! drained by one worker task. Commands received within the same batching
//! tick are applied in receipt order, ties broken by source priority.

use crate::command::{CommandEnvelope, CommandSource, ControlCommand};
use crate::display::Display;
use crate::errors::{ControlError, Result};
use crate::machine::{Effect, Outcome, PlayerMachine, PlayerState};
use phoplaylist::{Playlist, PlaylistEntry};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Time each item stays on screen.
    pub show_duration: Duration,
    /// Batching window for commands racing each other.
    pub tick: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            show_duration: Duration::from_secs(10),
            tick: Duration::from_millis(20),
        }
    }
}

/// Player state as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerStatus {
    #[serde(flatten)]
    pub state: PlayerState,
    pub playlist_len: usize,
    pub generation: u64,
    /// Identifier of the item on screen.
    pub current: Option<String>,
    pub last_command: Option<ControlCommand>,
    pub last_outcome: Option<Outcome>,
    pub commands_applied: u64,
}

enum Request {
    Command {
        envelope: CommandEnvelope,
        ack: Option<oneshot::Sender<PlayerStatus>>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable access to a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Request>,
    status_rx: watch::Receiver<PlayerStatus>,
}

impl ControllerHandle {
    /// Queues a command stamped now.
    pub fn submit(&self, command: ControlCommand, source: CommandSource) -> Result<()> {
        self.submit_envelope(CommandEnvelope::new(command, source))
    }

    pub fn submit_envelope(&self, envelope: CommandEnvelope) -> Result<()> {
        self.tx
            .send(Request::Command {
                envelope,
                ack: None,
            })
            .map_err(|_| ControlError::ControllerUnavailable)
    }

    /// Queues a command and waits until it has been applied.
    pub async fn submit_with_ack(
        &self,
        command: ControlCommand,
        source: CommandSource,
    ) -> Result<PlayerStatus> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Request::Command {
                envelope: CommandEnvelope::new(command, source),
                ack: Some(ack),
            })
            .map_err(|_| ControlError::ControllerUnavailable)?;
        done.await.map_err(|_| ControlError::ControllerUnavailable)
    }

    pub fn status(&self) -> PlayerStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerStatus> {
        self.status_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Stops the worker and the display.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Request::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

pub struct PlayerController;

impl PlayerController {
    /// Starts the worker on the current runtime.
    pub fn spawn(
        display: Arc<dyn Display>,
        playlist_rx: watch::Receiver<Arc<Playlist>>,
        settings: ControllerSettings,
    ) -> ControllerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = PlayerMachine::default();
        let playlist = playlist_rx.borrow().clone();
        let initial = PlayerStatus {
            state: machine.state(),
            playlist_len: 0,
            generation: playlist.generation(),
            current: None,
            last_command: None,
            last_outcome: None,
            commands_applied: 0,
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let worker = Worker {
            display,
            playlist_rx,
            playlist,
            machine,
            settings,
            status_tx,
            shown: None,
            next_advance: Instant::now() + settings.show_duration,
            last_command: None,
            last_outcome: None,
            applied: 0,
        };
        tokio::spawn(worker.run(rx));

        ControllerHandle { tx, status_rx }
    }
}

struct Worker {
    display: Arc<dyn Display>,
    playlist_rx: watch::Receiver<Arc<Playlist>>,
    playlist: Arc<Playlist>,
    machine: PlayerMachine,
    settings: ControllerSettings,
    status_tx: watch::Sender<PlayerStatus>,
    shown: Option<PlaylistEntry>,
    next_advance: Instant,
    last_command: Option<ControlCommand>,
    last_outcome: Option<Outcome>,
    applied: u64,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>) {
        info!(display = self.display.name(), "Player controller started");
        if let Err(e) = self.display.start().await {
            error!(display = self.display.name(), "Display failed to start: {}", e);
        }
        self.adopt().await;
        let mut playlist_open = true;

        loop {
            let advance_due = self.machine.is_showing();
            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    let mut batch = vec![request];
                    if !self.settings.tick.is_zero() {
                        tokio::time::sleep(self.settings.tick).await;
                    }
                    while let Ok(more) = rx.try_recv() {
                        batch.push(more);
                    }
                    if let Some(waiters) = self.process_batch(batch).await {
                        self.stop().await;
                        for done in waiters {
                            let _ = done.send(());
                        }
                        return;
                    }
                }
                changed = self.playlist_rx.changed(), if playlist_open => {
                    if changed.is_err() {
                        debug!("Playlist publisher gone, keeping the last snapshot");
                        playlist_open = false;
                        continue;
                    }
                    self.adopt().await;
                }
                _ = tokio::time::sleep_until(self.next_advance), if advance_due => {
                    if let Some(effects) = self.machine.advance() {
                        self.perform(effects).await;
                    }
                    self.publish_status();
                }
            }
        }
        self.stop().await;
    }

    async fn stop(&self) {
        if let Err(e) = self.display.stop().await {
            warn!("Display did not stop cleanly: {}", e);
        }
        info!("Player controller stopped");
    }

    /// Applies a batch; returns the shutdown waiters if one was requested.
    async fn process_batch(&mut self, batch: Vec<Request>) -> Option<Vec<oneshot::Sender<()>>> {
        let mut commands = Vec::with_capacity(batch.len());
        let mut shutdown = Vec::new();
        for request in batch {
            match request {
                Request::Command { envelope, ack } => commands.push((envelope, ack)),
                Request::Shutdown(done) => shutdown.push(done),
            }
        }
        commands.sort_by(|a, b| a.0.cmp(&b.0));

        for (envelope, ack) in commands {
            let transition = self.machine.apply(envelope.command);
            debug!(
                command = %envelope.command,
                source = %envelope.source,
                outcome = ?transition.outcome,
                "Command applied"
            );
            self.perform(transition.effects).await;
            self.last_command = Some(envelope.command);
            self.last_outcome = Some(transition.outcome);
            self.applied += 1;
            let status = self.publish_status();
            if let Some(ack) = ack {
                let _ = ack.send(status);
            }
        }

        (!shutdown.is_empty()).then_some(shutdown)
    }

    /// Switches to the latest published playlist.
    async fn adopt(&mut self) {
        let playlist = self.playlist_rx.borrow_and_update().clone();
        let len = playlist.len();
        let cursor = self
            .shown
            .as_ref()
            .and_then(|shown| playlist.position(&shown.id))
            .unwrap_or(self.machine.state().cursor);
        let clamped = if len == 0 { 0 } else { cursor.min(len - 1) };
        let reshow = match (self.shown.as_ref(), playlist.get(clamped)) {
            (Some(shown), Some(entry)) => shown != entry,
            (None, Some(_)) => true,
            _ => false,
        };

        debug!(generation = playlist.generation(), len, cursor = clamped, reshow, "Adopting playlist");
        self.playlist = playlist;
        let effects = self.machine.adopt(len, clamped, reshow);
        self.perform(effects).await;
        self.publish_status();
    }

    fn reset_timer(&mut self) {
        self.next_advance = Instant::now() + self.settings.show_duration;
    }

    async fn perform(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            let result = match effect {
                Effect::Show(index) => {
                    let Some(entry) = self.playlist.get(index).cloned() else {
                        continue;
                    };
                    let result = self.display.show(&entry).await;
                    self.shown = Some(entry);
                    self.reset_timer();
                    result
                }
                Effect::Pause => self.display.pause().await,
                Effect::Resume => {
                    self.reset_timer();
                    self.display.resume().await
                }
                Effect::SetMuted(muted) => self.display.set_muted(muted).await,
                Effect::PowerOff => self.display.power(false).await,
                Effect::PowerOn => self.display.power(true).await,
            };
            if let Err(e) = result {
                warn!(effect = ?effect, display = self.display.name(), "Display command failed: {}", e);
            }
        }
    }

    fn publish_status(&self) -> PlayerStatus {
        let status = PlayerStatus {
            state: self.machine.state(),
            playlist_len: self.playlist.len(),
            generation: self.playlist.generation(),
            current: self.shown.as_ref().map(|e| e.id.clone()),
            last_command: self.last_command,
            last_outcome: self.last_outcome,
            commands_applied: self.applied,
        };
        self.status_tx.send_replace(status.clone());
        status
    }
}
