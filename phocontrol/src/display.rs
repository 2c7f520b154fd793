//! Display backends.
//!
//! The controller drives a [`Display`] with the effects of each transition.
//! Errors are reported to the controller, which logs them and keeps going.

use crate::errors::{ControlError, Result};
use async_trait::async_trait;
use phoplaylist::PlaylistEntry;
use rand::distr::{Alphanumeric, SampleString};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Something able to put playlist items on screen.
#[async_trait]
pub trait Display: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Brings the backend up before the first item.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn show(&self, entry: &PlaylistEntry) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn set_muted(&self, muted: bool) -> Result<()>;

    /// Turns the screen off (sleep) or on (wakeup).
    async fn power(&self, on: bool) -> Result<()>;

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Optional shell commands switching the screen off and on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenPower {
    pub sleep_command: Option<String>,
    pub wake_command: Option<String>,
}

impl ScreenPower {
    pub async fn switch(&self, on: bool) -> Result<()> {
        let command = if on {
            self.wake_command.as_deref()
        } else {
            self.sleep_command.as_deref()
        };
        let Some(command) = command else {
            return Ok(());
        };

        info!(command, on, "Switching screen power");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(ControlError::display(format!(
                "screen power command '{}' exited with {}",
                command, status
            )));
        }
        Ok(())
    }
}

/// Headless backend: logs what would be displayed.
#[derive(Debug, Default)]
pub struct LogDisplay {
    screen: ScreenPower,
}

impl LogDisplay {
    pub fn new(screen: ScreenPower) -> Self {
        Self { screen }
    }
}

#[async_trait]
impl Display for LogDisplay {
    fn name(&self) -> &str {
        "log"
    }

    async fn show(&self, entry: &PlaylistEntry) -> Result<()> {
        info!(item_id = %entry.id, kind = %entry.kind, path = %entry.path.display(), "Showing");
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        info!("Paused");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        info!("Resumed");
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> Result<()> {
        info!(muted, "Audio");
        Ok(())
    }

    async fn power(&self, on: bool) -> Result<()> {
        info!(on, "Screen power");
        self.screen.switch(on).await
    }
}

/// Which backend puts items on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayKind {
    #[default]
    Vlc,
    Log,
}

impl std::str::FromStr for DisplayKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "vlc" => Ok(DisplayKind::Vlc),
            "log" | "none" | "headless" => Ok(DisplayKind::Log),
            other => Err(ControlError::display(format!("unknown display backend '{}'", other))),
        }
    }
}

/// Builds the configured backend.
pub fn build_display(
    kind: DisplayKind,
    vlc: VlcSettings,
    screen: ScreenPower,
) -> Result<std::sync::Arc<dyn Display>> {
    Ok(match kind {
        DisplayKind::Vlc => std::sync::Arc::new(VlcDisplay::new(vlc, screen)?),
        DisplayKind::Log => std::sync::Arc::new(LogDisplay::new(screen)),
    })
}

/// Largest volume accepted by VLC's HTTP interface.
const VLC_VOLUME_MAX: f64 = 512.0;
const VLC_HTTP_HOST: &str = "localhost";
const VLC_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const VLC_STARTUP_CHECK_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct VlcSettings {
    pub bin: String,
    pub http_port: u16,
    pub show_duration: Duration,
    /// 0.0 to 1.0
    pub audio_volume: f64,
    pub fullscreen: bool,
}

impl Default for VlcSettings {
    fn default() -> Self {
        Self {
            bin: "vlc".to_string(),
            http_port: 9010,
            show_duration: Duration::from_secs(10),
            audio_volume: 0.5,
            fullscreen: true,
        }
    }
}

/// VLC driven through its HTTP interface.
pub struct VlcDisplay {
    settings: VlcSettings,
    password: String,
    client: reqwest::Client,
    process: Mutex<Option<Child>>,
    screen: ScreenPower,
}

impl fmt::Debug for VlcDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VlcDisplay")
            .field("settings", &self.settings)
            .field("screen", &self.screen)
            .finish_non_exhaustive()
    }
}

impl VlcDisplay {
    pub fn new(settings: VlcSettings, screen: ScreenPower) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            settings,
            // Fresh password on every start, the interface only listens on localhost
            password: Alphanumeric.sample_string(&mut rand::rng(), 16),
            client,
            process: Mutex::new(None),
            screen,
        })
    }

    fn status_url(&self, command: Option<&str>, args: &[(&str, &str)]) -> Result<Url> {
        let base = format!(
            "http://{}:{}/requests/status.xml",
            VLC_HTTP_HOST, self.settings.http_port
        );
        let mut params: Vec<(&str, &str)> = Vec::with_capacity(args.len() + 1);
        if let Some(command) = command {
            params.push(("command", command));
            params.extend_from_slice(args);
        }
        Url::parse_with_params(&base, params).map_err(|e| ControlError::display(e.to_string()))
    }

    async fn send(&self, command: Option<&str>, args: &[(&str, &str)]) -> Result<()> {
        let url = self.status_url(command, args)?;
        debug!(url = %url, "Sending VLC command");
        let response = self
            .client
            .get(url)
            .basic_auth("", Some(&self.password))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "N/A".to_string());
            return Err(ControlError::display(format!(
                "VLC answered {}: {}",
                status, body
            )));
        }
        Ok(())
    }

    fn volume(&self) -> u32 {
        (VLC_VOLUME_MAX * self.settings.audio_volume.clamp(0.0, 1.0)).round() as u32
    }

    async fn wait_ready(&self) -> Result<()> {
        let started = Instant::now();
        while started.elapsed() < VLC_STARTUP_TIMEOUT {
            match self.send(None, &[]).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!("Still waiting for VLC to start: {}", e),
            }
            tokio::time::sleep(VLC_STARTUP_CHECK_BACKOFF).await;
        }
        Err(ControlError::DisplayStartTimeout(VLC_STARTUP_TIMEOUT))
    }

    fn command_line(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--loop",
            "--no-video-title-show",
            "--no-qt-privacy-ask",
            "--no-qt-video-autoresize",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend([
            "--image-duration".to_string(),
            self.settings.show_duration.as_secs().max(1).to_string(),
            "--extraintf".to_string(),
            "http".to_string(),
            "--http-password".to_string(),
            self.password.clone(),
            "--http-host".to_string(),
            VLC_HTTP_HOST.to_string(),
            "--http-port".to_string(),
            self.settings.http_port.to_string(),
        ]);
        if self.settings.fullscreen {
            args.push("--fullscreen".to_string());
        }
        args
    }
}

#[async_trait]
impl Display for VlcDisplay {
    fn name(&self) -> &str {
        "vlc"
    }

    async fn start(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Ok(());
        }
        info!(bin = %self.settings.bin, port = self.settings.http_port, "Starting VLC");
        let child = Command::new(&self.settings.bin)
            .args(self.command_line())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        *process = Some(child);
        drop(process);

        self.wait_ready().await?;
        let volume = self.volume().to_string();
        self.send(Some("volume"), &[("val", volume.as_str())]).await
    }

    async fn show(&self, entry: &PlaylistEntry) -> Result<()> {
        let path: PathBuf = std::path::absolute(&entry.path)?;
        let uri = Url::from_file_path(&path)
            .map_err(|_| ControlError::display(format!("not a file path: {}", path.display())))?;
        self.send(Some("pl_empty"), &[]).await?;
        self.send(Some("in_play"), &[("input", uri.as_str())]).await
    }

    async fn pause(&self) -> Result<()> {
        self.send(Some("pl_forcepause"), &[]).await
    }

    async fn resume(&self) -> Result<()> {
        self.send(Some("pl_forceresume"), &[]).await
    }

    async fn set_muted(&self, muted: bool) -> Result<()> {
        let volume = if muted { 0 } else { self.volume() };
        let volume = volume.to_string();
        self.send(Some("volume"), &[("val", volume.as_str())]).await
    }

    async fn power(&self, on: bool) -> Result<()> {
        self.screen.switch(on).await
    }

    async fn stop(&self) -> Result<()> {
        if let Some(mut child) = self.process.lock().await.take() {
            info!("Stopping VLC");
            if let Err(e) = child.kill().await {
                warn!("Failed to stop VLC: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_is_scaled_to_vlc_range() {
        let display = VlcDisplay::new(
            VlcSettings {
                audio_volume: 0.5,
                ..Default::default()
            },
            ScreenPower::default(),
        )
        .unwrap();
        assert_eq!(display.volume(), 256);
    }

    #[test]
    fn command_line_carries_interface_settings() {
        let display = VlcDisplay::new(
            VlcSettings {
                http_port: 9999,
                fullscreen: false,
                show_duration: Duration::from_secs(7),
                ..Default::default()
            },
            ScreenPower::default(),
        )
        .unwrap();
        let args = display.command_line();
        assert!(args.windows(2).any(|w| w[0] == "--http-port" && w[1] == "9999"));
        assert!(args.windows(2).any(|w| w[0] == "--image-duration" && w[1] == "7"));
        assert!(!args.iter().any(|a| a == "--fullscreen"));
    }

    #[test]
    fn status_url_encodes_arguments() {
        let display = VlcDisplay::new(VlcSettings::default(), ScreenPower::default()).unwrap();
        let url = display
            .status_url(Some("in_play"), &[("input", "file:///media/a b.jpg")])
            .unwrap();
        assert_eq!(url.path(), "/requests/status.xml");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("command".to_string(), "in_play".to_string()));
        assert_eq!(pairs[1].1, "file:///media/a b.jpg");
    }

    #[tokio::test]
    async fn screen_power_runs_commands() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("off");
        let screen = ScreenPower {
            sleep_command: Some(format!("touch {}", marker.display())),
            wake_command: Some("exit 3".to_string()),
        };
        screen.switch(false).await.unwrap();
        assert!(marker.exists());
        assert!(matches!(screen.switch(true).await, Err(ControlError::Display(_))));
    }
}
