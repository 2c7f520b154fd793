//! Routing of commands to the component that owns them.
//!
//! Player commands go to the controller queue. `sleep` and `wakeup` go to
//! the coordinator, which serializes power transitions with the playlist
//! refresh done on wakeup.

use crate::command::{CommandSource, ControlCommand};
use crate::controller::ControllerHandle;
use crate::coordinator::{CoordinatorAction, CoordinatorHandle};
use crate::errors::{ControlError, Result};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;

/// Anything that accepts commands from an input listener.
pub trait CommandSink: Send + Sync + 'static {
    fn dispatch(&self, command: ControlCommand, source: CommandSource) -> Result<()>;
}

impl CommandSink for ControllerHandle {
    fn dispatch(&self, command: ControlCommand, source: CommandSource) -> Result<()> {
        self.submit(command, source)
    }
}

impl CommandSink for mpsc::UnboundedSender<(ControlCommand, CommandSource)> {
    fn dispatch(&self, command: ControlCommand, source: CommandSource) -> Result<()> {
        self.send((command, source))
            .map_err(|_| ControlError::ControllerUnavailable)
    }
}

#[derive(Debug, Clone)]
pub struct ControlRouter {
    controller: ControllerHandle,
    coordinator: CoordinatorHandle,
}

impl ControlRouter {
    pub fn new(controller: ControllerHandle, coordinator: CoordinatorHandle) -> Self {
        Self {
            controller,
            coordinator,
        }
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Parses and dispatches a command name.
    pub fn dispatch_name(&self, name: &str, source: CommandSource) -> Result<ControlCommand> {
        let command: ControlCommand = name.parse()?;
        self.dispatch(command, source)?;
        Ok(command)
    }
}

impl CommandSink for ControlRouter {
    fn dispatch(&self, command: ControlCommand, source: CommandSource) -> Result<()> {
        match CoordinatorAction::for_command(command) {
            Some(action) => self.coordinator.submit(action, source),
            None => self.controller.submit(command, source),
        }
    }
}

/// Physical input driving the player besides HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerBackend {
    #[default]
    Gpio,
    Console,
    None,
}

impl PlayerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerBackend::Gpio => "gpio",
            PlayerBackend::Console => "console",
            PlayerBackend::None => "none",
        }
    }
}

impl fmt::Display for PlayerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayerBackend {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gpio" => Ok(PlayerBackend::Gpio),
            "console" | "stdin" => Ok(PlayerBackend::Console),
            "none" | "http" | "" => Ok(PlayerBackend::None),
            other => Err(ControlError::InvalidCommand(format!("player backend '{}'", other))),
        }
    }
}
