//! Control commands and their ordering.

use crate::errors::ControlError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Instant;

/// A player command, whatever its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    PlayNext,
    PlayBack,
    Pause,
    Resume,
    Mute,
    Unmute,
    Sleep,
    Wakeup,
}

impl ControlCommand {
    pub const ALL: [ControlCommand; 8] = [
        ControlCommand::PlayNext,
        ControlCommand::PlayBack,
        ControlCommand::Pause,
        ControlCommand::Resume,
        ControlCommand::Mute,
        ControlCommand::Unmute,
        ControlCommand::Sleep,
        ControlCommand::Wakeup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::PlayNext => "play_next",
            ControlCommand::PlayBack => "play_back",
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::Mute => "mute",
            ControlCommand::Unmute => "unmute",
            ControlCommand::Sleep => "sleep",
            ControlCommand::Wakeup => "wakeup",
        }
    }

    /// Sleep and wakeup change the power state and go through the coordinator.
    pub fn is_power(&self) -> bool {
        matches!(self, ControlCommand::Sleep | ControlCommand::Wakeup)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        ControlCommand::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .ok_or_else(|| ControlError::InvalidCommand(s.trim().to_string()))
    }
}

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    Http,
    Gpio,
    Console,
    Scheduler,
    Timer,
}

impl CommandSource {
    /// Tie-break rank for commands received at the same instant (lower wins).
    pub fn priority(&self) -> u8 {
        match self {
            CommandSource::Http => 0,
            CommandSource::Gpio => 1,
            CommandSource::Console => 2,
            CommandSource::Scheduler => 3,
            CommandSource::Timer => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandSource::Http => "http",
            CommandSource::Gpio => "gpio",
            CommandSource::Console => "console",
            CommandSource::Scheduler => "scheduler",
            CommandSource::Timer => "timer",
        }
    }
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// A command stamped with its receipt time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: ControlCommand,
    pub source: CommandSource,
    pub received_at: Instant,
    /// Process-wide arrival counter, last tie-break.
    pub seq: u64,
}

impl CommandEnvelope {
    pub fn new(command: ControlCommand, source: CommandSource) -> Self {
        Self::at(command, source, Instant::now())
    }

    pub fn at(command: ControlCommand, source: CommandSource, received_at: Instant) -> Self {
        Self {
            command,
            source,
            received_at,
            seq: NEXT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    fn order_key(&self) -> (Instant, u8, u64) {
        (self.received_at, self.source.priority(), self.seq)
    }
}

impl Ord for CommandEnvelope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

impl PartialOrd for CommandEnvelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
