//! GPIO bindings.
//!
//! Each binding reads `pin:level:command:restLevel`: when `pin` moves to
//! `level`, `command` is issued; `restLevel` is the level of the pin at rest.
//! Debouncing happens upstream; the listener consumes already discrete
//! `<pin> <level>` lines from the configured device.

use crate::command::{CommandSource, ControlCommand};
use crate::errors::{ControlError, Result};
use crate::router::CommandSink;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before reopening the device after an error or end of file.
const REOPEN_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum GpioLevel {
    High,
    Low,
}

impl GpioLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpioLevel::High => "H",
            GpioLevel::Low => "L",
        }
    }
}

impl fmt::Display for GpioLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GpioLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h" | "high" | "1" => Ok(GpioLevel::High),
            "l" | "low" | "0" => Ok(GpioLevel::Low),
            other => Err(format!("unknown level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GpioBinding {
    pub pin: u32,
    pub level: GpioLevel,
    pub command: ControlCommand,
    pub rest_level: GpioLevel,
}

impl fmt::Display for GpioBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.pin, self.level, self.command, self.rest_level)
    }
}

impl FromStr for GpioBinding {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let [pin, level, command, rest_level] = parts.as_slice() else {
            return Err(ControlError::invalid_binding(
                s,
                "expected pin:level:command:restLevel",
            ));
        };
        let pin = pin
            .trim()
            .parse::<u32>()
            .map_err(|_| ControlError::invalid_binding(s, format!("bad pin '{}'", pin)))?;
        let level = level
            .parse::<GpioLevel>()
            .map_err(|e| ControlError::invalid_binding(s, e))?;
        let command = command
            .parse::<ControlCommand>()
            .map_err(|_| ControlError::invalid_binding(s, format!("unknown command '{}'", command)))?;
        let rest_level = rest_level
            .parse::<GpioLevel>()
            .map_err(|e| ControlError::invalid_binding(s, e))?;
        Ok(Self {
            pin,
            level,
            command,
            rest_level,
        })
    }
}

/// Injective mapping from (pin, level) to a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpioMap {
    commands: HashMap<(u32, GpioLevel), ControlCommand>,
    rest: BTreeMap<u32, GpioLevel>,
    bindings: Vec<GpioBinding>,
}

impl GpioMap {
    pub fn new(bindings: Vec<GpioBinding>) -> Result<Self> {
        let mut map = GpioMap::default();
        for binding in bindings {
            if map.commands.contains_key(&(binding.pin, binding.level)) {
                return Err(ControlError::DuplicateBinding {
                    pin: binding.pin,
                    level: binding.level.to_string(),
                });
            }
            match map.rest.get(&binding.pin) {
                Some(rest) if *rest != binding.rest_level => {
                    return Err(ControlError::invalid_binding(
                        &binding.to_string(),
                        format!("pin {} already rests at {}", binding.pin, rest),
                    ));
                }
                _ => {}
            }
            map.commands.insert((binding.pin, binding.level), binding.command);
            map.rest.insert(binding.pin, binding.rest_level);
            map.bindings.push(binding);
        }
        Ok(map)
    }

    /// Parses the configured binding strings.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        let bindings = specs
            .iter()
            .map(|s| s.as_ref().parse::<GpioBinding>())
            .collect::<Result<Vec<_>>>()?;
        Self::new(bindings)
    }

    pub fn decode(&self, pin: u32, level: GpioLevel) -> Option<ControlCommand> {
        self.commands.get(&(pin, level)).copied()
    }

    pub fn rest_level(&self, pin: u32) -> Option<GpioLevel> {
        self.rest.get(&pin).copied()
    }

    pub fn pins(&self) -> impl Iterator<Item = u32> + '_ {
        self.rest.keys().copied()
    }

    pub fn bindings(&self) -> &[GpioBinding] {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Turns level reports into commands on transitions only.
#[derive(Debug, Clone)]
pub struct EdgeTracker {
    map: GpioMap,
    levels: HashMap<u32, GpioLevel>,
}

impl EdgeTracker {
    pub fn new(map: GpioMap) -> Self {
        let levels = map.rest.iter().map(|(pin, level)| (*pin, *level)).collect();
        Self { map, levels }
    }

    pub fn observe(&mut self, pin: u32, level: GpioLevel) -> Option<ControlCommand> {
        if self.levels.insert(pin, level) == Some(level) {
            return None;
        }
        self.map.decode(pin, level)
    }
}

/// Parses one `<pin> <level>` event line.
pub fn parse_event(line: &str) -> Option<(u32, GpioLevel)> {
    let mut fields = line.split_whitespace();
    let pin = fields.next()?.parse().ok()?;
    let level = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((pin, level))
}

/// Reads pin transitions from a device and forwards the bound commands.
#[derive(Debug)]
pub struct GpioListener {
    path: PathBuf,
    map: GpioMap,
}

impl GpioListener {
    pub fn new(path: impl Into<PathBuf>, map: GpioMap) -> Self {
        Self {
            path: path.into(),
            map,
        }
    }

    pub async fn run<S: CommandSink>(self, sink: S, shutdown: CancellationToken) {
        info!(
            device = %self.path.display(),
            pins = ?self.map.pins().collect::<Vec<_>>(),
            "Listening to GPIO events"
        );
        let mut tracker = EdgeTracker::new(self.map);

        while !shutdown.is_cancelled() {
            match tokio::fs::File::open(&self.path).await {
                Ok(file) => {
                    let mut lines = BufReader::new(file).lines();
                    loop {
                        let line = tokio::select! {
                            _ = shutdown.cancelled() => return,
                            line = lines.next_line() => line,
                        };
                        match line {
                            Ok(Some(line)) => {
                                let Some((pin, level)) = parse_event(&line) else {
                                    if !line.trim().is_empty() {
                                        warn!(line = %line, "Malformed GPIO event");
                                    }
                                    continue;
                                };
                                debug!(pin, level = %level, "GPIO event");
                                if let Some(command) = tracker.observe(pin, level) {
                                    if let Err(e) = sink.dispatch(command, CommandSource::Gpio) {
                                        warn!(command = %command, "GPIO command dropped: {}", e);
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(device = %self.path.display(), "GPIO read failed: {}", e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(device = %self.path.display(), "Cannot open GPIO device: {}", e);
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(REOPEN_DELAY) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_parses_all_level_spellings() {
        let b: GpioBinding = "17:H:pause:L".parse().unwrap();
        assert_eq!(
            b,
            GpioBinding {
                pin: 17,
                level: GpioLevel::High,
                command: ControlCommand::Pause,
                rest_level: GpioLevel::Low
            }
        );
        let b: GpioBinding = "4:low:play-next:1".parse().unwrap();
        assert_eq!(b.level, GpioLevel::Low);
        assert_eq!(b.rest_level, GpioLevel::High);
        assert_eq!(b.to_string(), "4:L:play_next:H");
    }

    #[test]
    fn malformed_bindings_are_rejected() {
        for spec in ["17:H:pause", "x:H:pause:L", "17:Z:pause:L", "17:H:dance:L", "17:H:pause:L:extra"] {
            assert!(
                matches!(spec.parse::<GpioBinding>(), Err(ControlError::InvalidBinding(..))),
                "{}",
                spec
            );
        }
    }

    #[test]
    fn map_is_injective_per_pin_and_level() {
        let map = GpioMap::parse(&["17:H:pause:L", "17:L:resume:L", "22:H:pause:L"]).unwrap();
        assert_eq!(map.decode(17, GpioLevel::High), Some(ControlCommand::Pause));
        assert_eq!(map.decode(17, GpioLevel::Low), Some(ControlCommand::Resume));
        assert_eq!(map.decode(22, GpioLevel::High), Some(ControlCommand::Pause));
        assert_eq!(map.decode(5, GpioLevel::High), None);

        let err = GpioMap::parse(&["17:H:pause:L", "17:H:mute:L"]).unwrap_err();
        assert!(matches!(err, ControlError::DuplicateBinding { pin: 17, .. }));

        let err = GpioMap::parse(&["17:H:pause:L", "17:L:resume:H"]).unwrap_err();
        assert!(matches!(err, ControlError::InvalidBinding(..)));
    }

    #[test]
    fn only_transitions_issue_commands() {
        let map = GpioMap::parse(&["17:H:pause:L", "17:L:resume:L"]).unwrap();
        let mut tracker = EdgeTracker::new(map);

        assert_eq!(tracker.observe(17, GpioLevel::Low), None);
        assert_eq!(tracker.observe(17, GpioLevel::High), Some(ControlCommand::Pause));
        assert_eq!(tracker.observe(17, GpioLevel::High), None);
        assert_eq!(tracker.observe(17, GpioLevel::Low), Some(ControlCommand::Resume));
    }

    #[test]
    fn event_lines() {
        assert_eq!(parse_event("17 H"), Some((17, GpioLevel::High)));
        assert_eq!(parse_event("  4\t0 "), Some((4, GpioLevel::Low)));
        assert_eq!(parse_event("17"), None);
        assert_eq!(parse_event("17 H extra"), None);
    }
}
