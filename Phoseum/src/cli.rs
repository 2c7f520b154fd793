//! Command line flags.
//!
//! Flags use the installer's dotted names (`--storage.media-dir`,
//! `--control.gpio-map`, ...) and override the matching configuration entry
//! for this run only; nothing is written back to `config.yaml`.

use anyhow::Result;
use clap::Parser;
use phoconfig::Config;
use serde_yaml::{Number, Value};
use std::path::PathBuf;

#[derive(Debug, Default, Parser)]
#[command(name = "phoseum")]
#[command(version)]
#[command(about = "Photo and video slideshow daemon fed by a remote album")]
pub struct Cli {
    /// Configuration directory (defaults to $PHOSEUM_CONFIG, ./.phoseum or ~/.phoseum)
    #[arg(long = "config-dir")]
    pub config_dir: Option<PathBuf>,

    /// Directory holding the media cache
    #[arg(long = "storage.media-dir")]
    pub media_dir: Option<String>,

    /// Byte quota of the media cache
    #[arg(long = "storage.capacity")]
    pub capacity: Option<u64>,

    /// `googlephotos` or `directory`
    #[arg(long = "source.kind")]
    pub source_kind: Option<String>,

    /// Local directory used as album by the `directory` source
    #[arg(long = "source.directory")]
    pub source_directory: Option<String>,

    #[arg(long = "googlephotos.album-id")]
    pub album_id: Option<String>,

    #[arg(long = "googlephotos.oauth-client-id")]
    pub oauth_client_id: Option<String>,

    #[arg(long = "googlephotos.oauth-client-secret")]
    pub oauth_client_secret: Option<String>,

    #[arg(long = "playlist.min-size")]
    pub min_size: Option<u64>,

    #[arg(long = "playlist.max-size")]
    pub max_size: Option<u64>,

    /// Freshness window in seconds
    #[arg(long = "playlist.fresh-retention")]
    pub fresh_retention: Option<u64>,

    /// Seconds each item stays on screen
    #[arg(long = "slideshow.show-duration")]
    pub show_duration: Option<u64>,

    /// Audio volume between 0.0 and 1.0
    #[arg(long = "slideshow.audio-volume")]
    pub audio_volume: Option<f64>,

    #[arg(long = "slideshow.no-fullscreen")]
    pub no_fullscreen: bool,

    /// `vlc` or `log`
    #[arg(long = "slideshow.display")]
    pub display: Option<String>,

    #[arg(long = "vlc.http-port")]
    pub vlc_http_port: Option<u16>,

    #[arg(long = "vlc.bin")]
    pub vlc_bin: Option<String>,

    /// `gpio`, `console` or `none`
    #[arg(long = "control.player")]
    pub player: Option<String>,

    #[arg(long = "control.gpio-dev")]
    pub gpio_dev: Option<String>,

    /// PIN:LEVEL:COMMAND:REST_LEVEL, repeatable
    #[arg(long = "control.gpio-map")]
    pub gpio_map: Vec<String>,

    #[arg(long = "control.http-port")]
    pub http_port: Option<u16>,

    #[arg(long = "control.http-bind")]
    pub http_bind: Option<String>,
}

fn string(value: &str) -> Value {
    Value::String(value.to_string())
}

impl Cli {
    /// Dotted configuration path and value of every flag given
    pub fn overrides(&self) -> Vec<(&'static [&'static str], Value)> {
        let mut out: Vec<(&'static [&'static str], Value)> = Vec::new();
        let mut push = |path: &'static [&'static str], value: Option<Value>| {
            if let Some(value) = value {
                out.push((path, value));
            }
        };

        push(&["storage", "media_dir"], self.media_dir.as_deref().map(string));
        push(&["storage", "capacity"], self.capacity.map(|v| Value::Number(v.into())));
        push(&["source", "kind"], self.source_kind.as_deref().map(string));
        push(&["source", "directory"], self.source_directory.as_deref().map(string));
        push(&["googlephotos", "album_id"], self.album_id.as_deref().map(string));
        push(
            &["googlephotos", "oauth_client_id"],
            self.oauth_client_id.as_deref().map(string),
        );
        push(
            &["googlephotos", "oauth_client_secret"],
            self.oauth_client_secret.as_deref().map(string),
        );
        push(&["playlist", "min_size"], self.min_size.map(|v| Value::Number(v.into())));
        push(&["playlist", "max_size"], self.max_size.map(|v| Value::Number(v.into())));
        push(
            &["playlist", "fresh_retention"],
            self.fresh_retention.map(|v| Value::Number(v.into())),
        );
        push(
            &["slideshow", "show_duration"],
            self.show_duration.map(|v| Value::Number(v.into())),
        );
        push(
            &["slideshow", "audio_volume"],
            self.audio_volume.map(|v| Value::Number(Number::from(v))),
        );
        push(&["slideshow", "no_fullscreen"], self.no_fullscreen.then_some(Value::Bool(true)));
        push(&["slideshow", "display"], self.display.as_deref().map(string));
        push(&["vlc", "http_port"], self.vlc_http_port.map(|v| Value::Number(v.into())));
        push(&["vlc", "bin"], self.vlc_bin.as_deref().map(string));
        push(&["control", "player"], self.player.as_deref().map(string));
        push(&["control", "gpio_dev"], self.gpio_dev.as_deref().map(string));
        push(
            &["control", "gpio_map"],
            (!self.gpio_map.is_empty())
                .then(|| Value::Sequence(self.gpio_map.iter().map(|m| string(m)).collect())),
        );
        push(&["control", "http_port"], self.http_port.map(|v| Value::Number(v.into())));
        push(&["control", "http_bind"], self.http_bind.as_deref().map(string));
        out
    }

    /// Applies the flags to the in-memory configuration
    pub fn apply(&self, config: &Config) -> Result<()> {
        for (path, value) in self.overrides() {
            config.override_value(path, value)?;
        }
        Ok(())
    }
}
