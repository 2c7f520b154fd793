//! # phocontrol - Player control for Phoseum
//!
//! This crate owns everything that changes what is on screen:
//!
//! - [`PlayerMachine`]: the pure `{playing, paused} x {muted, unmuted}` state
//!   machine with its cursor and sleep state
//! - [`PlayerController`]: the single worker applying commands in receipt
//!   order and driving a [`Display`]
//! - [`GpioListener`] and [`ConsoleListener`]: physical inputs turned into
//!   [`ControlCommand`]s
//! - [`Coordinator`]: serializes sleep and wakeup, schedules playlist syncs
//!   and retries them
//!
//! ```no_run
//! use phocontrol::{
//!     CommandSource, ControlCommand, ControllerSettings, Coordinator, CoordinatorSettings,
//!     LogDisplay, PlayerController,
//! };
//! use std::sync::Arc;
//!
//! # async fn run(store: Arc<phoplaylist::PlaylistStore>) -> phocontrol::Result<()> {
//! let display = Arc::new(LogDisplay::default());
//! let controller = PlayerController::spawn(display, store.subscribe(), ControllerSettings::default());
//! let coordinator = Coordinator::spawn(store, controller.clone(), CoordinatorSettings::default());
//!
//! let status = controller
//!     .submit_with_ack(ControlCommand::Pause, CommandSource::Http)
//!     .await?;
//! assert!(!status.state.playing);
//! # let _ = coordinator;
//! # Ok(())
//! # }
//! ```

mod command;
mod console;
mod controller;
mod coordinator;
mod display;
mod errors;
mod gpio;
mod machine;
mod router;

#[cfg(feature = "phoconfig")]
mod config_ext;

pub use command::{CommandEnvelope, CommandSource, ControlCommand};
pub use console::ConsoleListener;
pub use controller::{ControllerHandle, ControllerSettings, PlayerController, PlayerStatus};
pub use coordinator::{
    ActionReport, Coordinator, CoordinatorAction, CoordinatorHandle, CoordinatorSettings,
};
pub use display::{
    build_display, Display, DisplayKind, LogDisplay, ScreenPower, VlcDisplay, VlcSettings,
};
pub use errors::{ControlError, Result};
pub use gpio::{parse_event, EdgeTracker, GpioBinding, GpioLevel, GpioListener, GpioMap};
pub use machine::{Effect, Outcome, PlayerMachine, PlayerState, Transition};
pub use router::{CommandSink, ControlRouter, PlayerBackend};

#[cfg(feature = "phoconfig")]
pub use config_ext::ControlConfigExt;
