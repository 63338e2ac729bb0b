//! # YTMProxy Configuration Module
//!
//! This module provides configuration management for YTMProxy, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use ytmconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let db_path = config.get_db_path()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("ytmproxy.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load YTMProxy configuration"));
}

const ENV_CONFIG_DIR: &str = "YTMPROXY_CONFIG";
const ENV_PREFIX: &str = "YTMPROXY_CONFIG__";

// Default values for configuration
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_YTDLP_BINARY: &str = "yt-dlp";
const DEFAULT_EXPIRY_HOURS: u64 = 5;
const DEFAULT_MAX_CONCURRENT_STREAMS: u64 = 10;
const DEFAULT_MAX_RETRIES: u64 = 3;
const DEFAULT_BASE_RETRY_DELAY_SECS: u64 = 1;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Macro to generate a getter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u64 {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap(),
                Ok(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap().max(0) as u64,
                _ => $default,
            }
        }
    };
}

/// Configuration manager for YTMProxy
///
/// Loads the embedded default YAML, merges the external
/// `<config_dir>/config.yaml` over it when present, then applies
/// `YTMPROXY_CONFIG__*` environment overrides.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Config {
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
        if Path::new(".ytmproxy").exists() {
            return ".ytmproxy".to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(".ytmproxy");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        // Default fallback
        ".ytmproxy".to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("config path is not a directory"));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// Searched in order: the `directory` argument, `$YTMPROXY_CONFIG`,
    /// `.ytmproxy` in the current directory, `.ytmproxy` in the home
    /// directory. Created and checked for write access.
    pub fn config_dir(directory: &str) -> String {
        let dir_path = Self::find_config_dir(directory);
        let path = Path::new(&dir_path);

        Self::validate_config_dir(path).expect("Cannot validate the configuration directory");

        dir_path
    }

    /// Loads the configuration from the specified directory
    ///
    /// Pass an empty `directory` to use the default search order.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory);
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        // Charger la configuration par défaut
        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        // Essayer de charger le fichier de configuration
        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // Merger avec la config par défaut
        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);

        // Appliquer les overrides depuis les variables d'environnement
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

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Gets a configuration value at the specified path
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["host", "http_port"]`)
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                if let Some(next) = map.get(Value::String(key.to_string())) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Sets a configuration value at the specified path and saves it
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()?;
        Ok(())
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_string());
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

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                let lowered: Vec<String> = key
                    .trim_start_matches(ENV_PREFIX)
                    .split("__")
                    .map(str::to_lowercase)
                    .collect();
                let key_path: Vec<&str> = lowered.iter().map(String::as_str).collect();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    /// Résout un chemin relatif ou absolu et crée le répertoire si nécessaire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            // Chemin relatif : le résoudre par rapport à config_dir
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "Created storage directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif au répertoire de
    /// configuration. Il sera créé s'il n'existe pas.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Gets the bind address for the HTTP server
    pub fn get_bind_address(&self) -> String {
        match self.get_value(&["host", "bind_address"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_BIND_ADDRESS.to_string(),
        }
    }

    /// Gets the HTTP port from configuration
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap() as u16,
            Ok(Value::String(s)) => match s.parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    tracing::warn!(
                        "Invalid HTTP port '{}', using default {}",
                        s,
                        DEFAULT_HTTP_PORT
                    );
                    DEFAULT_HTTP_PORT
                }
            },
            _ => DEFAULT_HTTP_PORT,
        }
    }

    /// Path of the SQLite track database, inside the managed storage dir
    pub fn get_db_path(&self) -> Result<String> {
        let dir = self.get_managed_dir(&["storage", "directory"], "data")?;
        Ok(Path::new(&dir)
            .join("tracks.db")
            .to_string_lossy()
            .to_string())
    }

    /// Name or path of the yt-dlp executable
    pub fn get_ytdlp_binary(&self) -> String {
        match self.get_value(&["resolver", "ytdlp_binary"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_YTDLP_BINARY.to_string(),
        }
    }

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> String {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_LOG_MIN_LEVEL.to_string(),
        }
    }

    impl_u64_config!(
        get_expiry_hours,
        &["proxy", "expiry_hours"],
        DEFAULT_EXPIRY_HOURS
    );

    impl_u64_config!(
        get_max_concurrent_streams,
        &["proxy", "max_concurrent_streams"],
        DEFAULT_MAX_CONCURRENT_STREAMS
    );

    impl_u64_config!(
        get_max_retries,
        &["proxy", "max_retries"],
        DEFAULT_MAX_RETRIES
    );

    impl_u64_config!(
        get_base_retry_delay_secs,
        &["proxy", "base_retry_delay_secs"],
        DEFAULT_BASE_RETRY_DELAY_SECS
    );

    impl_u64_config!(
        get_upstream_timeout_secs,
        &["proxy", "upstream_timeout_secs"],
        DEFAULT_UPSTREAM_TIMEOUT_SECS
    );
}

/// Returns the global configuration instance
///
/// Lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from the external
/// file replace the defaults.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
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
        (default, external) => {
            *default = external.clone();
        }
    }
}
