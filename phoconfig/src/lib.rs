//! # Phoseum Configuration Module
//!
//! This module provides configuration management for the Phoseum daemon, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Command line overrides that are never written back to disk
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! Domain crates add their own getters through extension traits implemented
//! for [`Config`] (`CacheConfigExt`, `PlaylistConfigExt`, ...), so this crate
//! only knows about the host-level settings.
//!
//! ## Usage
//!
//! ```no_run
//! use phoconfig::get_config;
//!
//! let config = get_config()?;
//! let port = config.get_http_port();
//! let media_dir = config.get_managed_dir(&["storage", "media_dir"], "media")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use once_cell::sync::OnceCell;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("phoseum.yaml");

static CONFIG: OnceCell<Arc<Config>> = OnceCell::new();

const ENV_CONFIG_DIR: &str = "PHOSEUM_CONFIG";
const ENV_PREFIX: &str = "PHOSEUM_CONFIG__";

const DEFAULT_HTTP_PORT: u16 = 8000;
const DEFAULT_HTTP_BIND: &str = "127.0.0.1";
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> anyhow::Result<usize> {
            Ok(self.get_u64_or($path, $default as u64) as usize)
        }

        pub fn $setter(&self, value: usize) -> anyhow::Result<()> {
            self.set_value($path, serde_yaml::Value::Number((value as u64).into()))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> anyhow::Result<bool> {
            match self.get_value($path) {
                Ok(serde_yaml::Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> anyhow::Result<()> {
            self.set_value($path, serde_yaml::Value::Bool(value))
        }
    };
}

/// Configuration manager for Phoseum
///
/// The configuration lives in a single YAML tree guarded by a mutex. Values
/// set through [`Config::set_value`] are persisted to `config.yaml`, values set
/// through [`Config::override_value`] only live in memory (command line flags).
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(".phoseum").exists() {
            return ".phoseum".to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(".phoseum");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".phoseum".to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PHOSEUM_CONFIG` environment variable
    /// 3. `.phoseum` in the current directory
    /// 4. `.phoseum` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))
            .map_err(|e| anyhow!("Invalid configuration directory {}: {}", dir_path, e))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value = Self::lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // An empty config.yaml parses as Null and leaves the defaults untouched
        let external_value = Self::lower_keys_value(serde_yaml::from_slice(&yaml_data)?);
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = default_value;

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Directory holding `config.yaml` and the relative managed directories
    pub fn dir(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["control", "http_port"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Sets a configuration value for the lifetime of the process only
    ///
    /// Used for command line flags: the installer passes its settings on every
    /// start and they must not leak into `config.yaml`.
    pub fn override_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data();
        Self::set_value_internal(&mut data, path, value)
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();

                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Reads an unsigned integer, accepting numbers and numeric strings
    pub fn get_u64_or(&self, path: &[&str], default: u64) -> u64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => match n.as_u64() {
                Some(v) => v,
                None => {
                    warn!(path = %path.join("."), "Negative or fractional value, using default {}", default);
                    default
                }
            },
            Ok(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                warn!(path = %path.join("."), value = %s, "Invalid number, using default {}", default);
                default
            }),
            _ => default,
        }
    }

    /// Reads a float, accepting integers, floats and numeric strings
    pub fn get_f64_or(&self, path: &[&str], default: f64) -> f64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Ok(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                warn!(path = %path.join("."), value = %s, "Invalid number, using default {}", default);
                default
            }),
            _ => default,
        }
    }

    /// Reads a boolean, accepting `true`/`false`, `yes`/`no`, `on`/`off` and `1`/`0`
    pub fn get_bool_or(&self, path: &[&str], default: bool) -> bool {
        match self.get_value(path) {
            Ok(Value::Bool(b)) => b,
            Ok(Value::Number(n)) => n.as_u64().map(|v| v != 0).unwrap_or(default),
            Ok(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => {
                    warn!(path = %path.join("."), value = %s, "Invalid boolean, using default {}", default);
                    default
                }
            },
            _ => default,
        }
    }

    /// Reads a string; empty strings count as unset
    pub fn get_string(&self, path: &[&str]) -> Option<String> {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(s),
            Ok(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Reads a list of strings; a single string is accepted as a one-element list
    pub fn get_string_list(&self, path: &[&str]) -> Vec<String> {
        match self.get_value(path) {
            Ok(Value::Sequence(seq)) => seq
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Ok(Value::String(s)) if !s.trim().is_empty() => vec![s],
            _ => Vec::new(),
        }
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                let key_path = key
                    .trim_start_matches(ENV_PREFIX)
                    .split("__")
                    .collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(e) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(env_var = %key, "Ignoring environment override: {}", e);
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Resolves a relative or absolute path and creates the directory if needed
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<PathBuf> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "Created managed directory");
        }

        Ok(absolute_path)
    }

    /// Returns a directory managed by the configuration
    ///
    /// The directory can be absolute or relative to the configuration
    /// directory. It is created if it doesn't exist.
    ///
    /// # Arguments
    ///
    /// * `path` - Path in the configuration tree (e.g. `&["storage", "media_dir"]`)
    /// * `default` - Directory name used when the key is not configured
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Sets a directory managed by the configuration
    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    /// Gets the HTTP port of the control API
    ///
    /// Returns the default port (8000) if not configured or invalid.
    pub fn get_http_port(&self) -> u16 {
        let port = self.get_u64_or(&["control", "http_port"], DEFAULT_HTTP_PORT as u64);
        match u16::try_from(port) {
            Ok(p) if p != 0 => p,
            _ => {
                warn!(
                    "Invalid HTTP port {}, using default {}",
                    port, DEFAULT_HTTP_PORT
                );
                DEFAULT_HTTP_PORT
            }
        }
    }

    /// Sets the HTTP port in configuration
    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["control", "http_port"], Value::Number(Number::from(port)))
    }

    /// Address the control API binds to
    ///
    /// Defaults to the loopback interface: the API has no authentication.
    pub fn get_http_bind(&self) -> String {
        self.get_string(&["control", "http_bind"])
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string())
    }

    impl_usize_config!(
        get_log_cache_size,
        set_log_cache_size,
        &["host", "logger", "buffer_capacity"],
        DEFAULT_LOG_BUFFER_CAPACITY
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Minimum log level
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"])? {
            Value::String(s) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    /// Sets the minimum log level
    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Loads the global configuration from `directory`
///
/// The first successful call wins; later calls return the already loaded
/// instance.
pub fn init_config(directory: &str) -> Result<Arc<Config>> {
    if let Some(config) = CONFIG.get() {
        return Ok(config.clone());
    }
    let config = Arc::new(Config::load_config(directory)?);
    Ok(CONFIG.get_or_init(|| config).clone())
}

/// Returns the global configuration instance
///
/// Loads it from the default location on first access if [`init_config`] was
/// not called before.
pub fn get_config() -> Result<Arc<Config>> {
    init_config("")
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings, keys from external are merged into default
/// - For scalars and sequences, external values replace default values
/// - A null external document leaves the default untouched
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (_, Value::Null) => {}
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
