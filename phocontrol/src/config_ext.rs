//! phoconfig extension for the player, its inputs and the coordinator.

use crate::controller::ControllerSettings;
use crate::coordinator::CoordinatorSettings;
use crate::display::{build_display, Display, DisplayKind, ScreenPower, VlcSettings};
use crate::gpio::GpioMap;
use crate::router::PlayerBackend;
use anyhow::{anyhow, Result};
use phoconfig::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SHOW_DURATION_SECS: u64 = 10;
pub const DEFAULT_AUDIO_VOLUME: f64 = 0.5;
pub const DEFAULT_VLC_HTTP_PORT: u16 = 9010;
pub const DEFAULT_COMMAND_TICK_MS: u64 = 20;
pub const DEFAULT_WAKE_REFRESH_AFTER_SECS: u64 = 6 * 3600;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 30;
pub const DEFAULT_RETRY_BACKOFF_MAX_SECS: u64 = 1800;

/// Extension trait for phoconfig::Config
pub trait ControlConfigExt {
    fn get_show_duration(&self) -> Duration;

    /// Audio volume, rejected outside 0.0 to 1.0
    fn get_audio_volume(&self) -> Result<f64>;

    fn get_fullscreen(&self) -> bool;

    fn get_player_backend(&self) -> Result<PlayerBackend>;

    /// Device emitting `<pin> <level>` lines, if configured
    fn get_gpio_device(&self) -> Option<PathBuf>;

    fn get_gpio_map(&self) -> Result<GpioMap>;

    fn get_command_tick(&self) -> Duration;

    fn get_display_kind(&self) -> Result<DisplayKind>;

    fn get_vlc_settings(&self) -> Result<VlcSettings>;

    fn get_screen_power(&self) -> ScreenPower;

    fn get_controller_settings(&self) -> ControllerSettings;

    fn get_coordinator_settings(&self) -> CoordinatorSettings;

    /// Builds the configured display backend
    fn build_display(&self) -> Result<Arc<dyn Display>>;
}

impl ControlConfigExt for Config {
    fn get_show_duration(&self) -> Duration {
        let secs = self.get_u64_or(&["slideshow", "show_duration"], DEFAULT_SHOW_DURATION_SECS);
        Duration::from_secs(secs.max(1))
    }

    fn get_audio_volume(&self) -> Result<f64> {
        let volume = self.get_f64_or(&["slideshow", "audio_volume"], DEFAULT_AUDIO_VOLUME);
        if !(0.0..=1.0).contains(&volume) {
            return Err(anyhow!(
                "slideshow.audio_volume must lie within 0.0 and 1.0, got {}",
                volume
            ));
        }
        Ok(volume)
    }

    fn get_fullscreen(&self) -> bool {
        self.get_bool_or(&["slideshow", "fullscreen"], true)
            && !self.get_bool_or(&["slideshow", "no_fullscreen"], false)
    }

    fn get_player_backend(&self) -> Result<PlayerBackend> {
        match self.get_string(&["control", "player"]) {
            Some(name) => Ok(name.parse()?),
            None => Ok(PlayerBackend::default()),
        }
    }

    fn get_gpio_device(&self) -> Option<PathBuf> {
        self.get_string(&["control", "gpio_dev"]).map(PathBuf::from)
    }

    fn get_gpio_map(&self) -> Result<GpioMap> {
        let specs = self.get_string_list(&["control", "gpio_map"]);
        Ok(GpioMap::parse(&specs)?)
    }

    fn get_command_tick(&self) -> Duration {
        Duration::from_millis(self.get_u64_or(&["control", "command_tick_ms"], DEFAULT_COMMAND_TICK_MS))
    }

    fn get_display_kind(&self) -> Result<DisplayKind> {
        match self.get_string(&["slideshow", "display"]) {
            Some(name) => Ok(name.parse()?),
            None => Ok(DisplayKind::default()),
        }
    }

    fn get_vlc_settings(&self) -> Result<VlcSettings> {
        let port = self.get_u64_or(&["vlc", "http_port"], DEFAULT_VLC_HTTP_PORT as u64);
        let http_port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| anyhow!("vlc.http_port {} is not a valid port", port))?;
        Ok(VlcSettings {
            bin: self
                .get_string(&["vlc", "bin"])
                .unwrap_or_else(|| "vlc".to_string()),
            http_port,
            show_duration: self.get_show_duration(),
            audio_volume: self.get_audio_volume()?,
            fullscreen: self.get_fullscreen(),
        })
    }

    fn get_screen_power(&self) -> ScreenPower {
        ScreenPower {
            sleep_command: self.get_string(&["slideshow", "sleep_command"]),
            wake_command: self.get_string(&["slideshow", "wake_command"]),
        }
    }

    fn get_controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            show_duration: self.get_show_duration(),
            tick: self.get_command_tick(),
        }
    }

    fn get_coordinator_settings(&self) -> CoordinatorSettings {
        let base = self.get_u64_or(&["scheduler", "retry_backoff"], DEFAULT_RETRY_BACKOFF_SECS);
        let max = self.get_u64_or(&["scheduler", "retry_backoff_max"], DEFAULT_RETRY_BACKOFF_MAX_SECS);
        CoordinatorSettings {
            wake_refresh_after: Duration::from_secs(self.get_u64_or(
                &["scheduler", "wake_refresh_after"],
                DEFAULT_WAKE_REFRESH_AFTER_SECS,
            )),
            retry_backoff: Duration::from_secs(base.max(1)),
            retry_backoff_max: Duration::from_secs(max.max(base).max(1)),
        }
    }

    fn build_display(&self) -> Result<Arc<dyn Display>> {
        let kind = self.get_display_kind()?;
        Ok(build_display(kind, self.get_vlc_settings()?, self.get_screen_power())?)
    }
}
