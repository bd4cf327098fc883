//! Configuration for the scope store.
//!
//! Configuration lives in a TOML file. Values can be overridden with
//! `SCOPESTORE_*` environment variables, which are applied after parsing and
//! before validation.
//!
//! # Example
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [storage]
//! state_dir = ".scopestore"
//! extension = "json"
//! durable_writes = true
//!
//! [watcher]
//! debounce_ms = 100
//! batch_interval_ms = 500
//! max_batch_size = 100
//!
//! [logging]
//! sink = "/var/log/scopestore.log"
//! json = false
//! ```
//!
//! A project root additionally carries a `scopestore.toml` manifest listing
//! its modules, see [`ProjectManifest`].

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// Overrides read by `merge_env_vars`
pub const ENV_LOG_LEVEL: &str = "SCOPESTORE_LOG_LEVEL";
pub const ENV_STATE_DIR: &str = "SCOPESTORE_STATE_DIR";
pub const ENV_DURABLE_WRITES: &str = "SCOPESTORE_DURABLE_WRITES";
pub const ENV_LOG_SINK: &str = "SCOPESTORE_LOG_SINK";

/// File name of the project manifest at a project root
pub const MANIFEST_FILENAME: &str = "scopestore.toml";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub watcher: WatcherSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[general]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// One of `VALID_LOG_LEVELS`
    pub log_level: String,
}

/// Where and how storage files are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory under each scope root holding its storage files
    pub state_dir: String,
    /// Extension of storage files
    pub extension: String,
    /// Flush file contents to the device before the rename that publishes them
    #[serde(default = "default_true")]
    pub durable_writes: bool,
}

/// Change feed tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherSettings {
    /// Wait this long after the last event for a path before emitting it
    pub debounce_ms: u64,
    /// Emit batched events at this interval
    pub batch_interval_ms: u64,
    /// Pending paths that force an emission
    pub max_batch_size: usize,
}

/// Optional extra log output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// File receiving a copy of all log output
    #[serde(default)]
    pub sink: Option<PathBuf>,
    /// Write the sink as JSON lines
    #[serde(default)]
    pub json: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: ".scopestore".to_string(),
            extension: "json".to_string(),
            durable_writes: true,
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            batch_interval_ms: 500,
            max_batch_size: 100,
        }
    }
}

impl StoreConfig {
    /// Read, override and validate the configuration at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn load_from_path(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Reading configuration");

        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| StoreError::config(format!("Failed to parse config file: {}", e)))?;

        config.merge_env_vars()?;
        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    ///
    /// Environment overrides apply in both cases.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from_path(path);
        }

        debug!("No configuration at {}, using defaults", path.display());
        let mut config = Self::default();
        config.merge_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to `path` through a temporary sibling file
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or cannot be written
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "Writing configuration");

        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| StoreError::config(format!("Failed to serialize config: {}", e)))?;

        let temp_path = path.with_extension("toml.tmp");

        std::fs::write(&temp_path, content)
            .map_err(|e| StoreError::config(format!("Failed to write config file: {}", e)))?;

        std::fs::rename(&temp_path, path)
            .map_err(|e| StoreError::config(format!("Failed to rename config file: {}", e)))?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(StoreError::config(format!(
                "Unknown log level '{}', expected one of: {}",
                self.general.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let state_dir = Path::new(&self.storage.state_dir);
        if self.storage.state_dir.trim().is_empty() || state_dir.is_absolute() {
            return Err(StoreError::config(format!(
                "Invalid state_dir '{}'. Must be a non-empty relative path",
                self.storage.state_dir
            )));
        }

        if self.storage.extension.is_empty() || self.storage.extension.contains('.') {
            return Err(StoreError::config(format!(
                "Invalid extension '{}'. Must be non-empty and contain no dots",
                self.storage.extension
            )));
        }

        if self.watcher.max_batch_size == 0 {
            return Err(StoreError::config("max_batch_size must be greater than 0"));
        }

        if self.watcher.batch_interval_ms == 0 {
            return Err(StoreError::config("batch_interval_ms must be greater than 0"));
        }

        Ok(())
    }

    /// Apply `SCOPESTORE_*` environment overrides
    ///
    /// # Errors
    ///
    /// Fails when an override cannot be parsed
    pub fn merge_env_vars(&mut self) -> Result<()> {
        if let Ok(log_level) = std::env::var(ENV_LOG_LEVEL) {
            debug!(%log_level, "log_level overridden by environment");
            self.general.log_level = log_level;
        }

        if let Ok(state_dir) = std::env::var(ENV_STATE_DIR) {
            debug!(%state_dir, "state_dir overridden by environment");
            self.storage.state_dir = state_dir;
        }

        if let Ok(durable) = std::env::var(ENV_DURABLE_WRITES) {
            let durable = durable.parse::<bool>().map_err(|e| {
                StoreError::config(format!("Invalid {} in environment: {}", ENV_DURABLE_WRITES, e))
            })?;
            debug!(durable, "durable_writes overridden by environment");
            self.storage.durable_writes = durable;
        }

        if let Ok(sink) = std::env::var(ENV_LOG_SINK) {
            debug!(%sink, "log sink overridden by environment");
            self.logging.sink = if sink.is_empty() {
                None
            } else {
                Some(PathBuf::from(sink))
            };
        }

        Ok(())
    }

    /// Directory holding the storage files of a scope rooted at `scope_root`
    pub fn state_dir_for(&self, scope_root: &Path) -> PathBuf {
        scope_root.join(&self.storage.state_dir)
    }
}

/// Module entry of a project manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    /// Module root, relative to the project root
    pub dir: PathBuf,
}

/// Describes the scope tree rooted at a project directory.
///
/// ```toml
/// name = "demo"
///
/// [[modules]]
/// name = "core"
/// dir = "core"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub name: String,
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

impl ProjectManifest {
    /// Read `scopestore.toml` from a project root
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(MANIFEST_FILENAME);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            StoreError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let manifest: Self = toml::from_str(&content).map_err(|e| {
            StoreError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::config("Project name must not be empty"));
        }

        for (i, module) in self.modules.iter().enumerate() {
            if module.name.trim().is_empty() {
                return Err(StoreError::config(format!("Module #{} has an empty name", i)));
            }
            if module.dir.is_absolute() {
                return Err(StoreError::config(format!(
                    "Module '{}' dir must be relative to the project root",
                    module.name
                )));
            }
            if self.modules[..i].iter().any(|m| m.name == module.name) {
                return Err(StoreError::config(format!(
                    "Module '{}' is declared twice",
                    module.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_config_env() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        (temp_dir, config_path)
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.storage.state_dir, ".scopestore");
        assert_eq!(config.storage.extension, "json");
        assert!(config.storage.durable_writes);
        assert!(config.logging.sink.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = StoreConfig::default();

        config.general.log_level = "loud".to_string();
        assert!(config.validate().is_err());
        config.general.log_level = "debug".to_string();

        config.storage.state_dir = "/abs".to_string();
        assert!(config.validate().is_err());
        config.storage.state_dir = ".state".to_string();

        config.storage.extension = "tar.gz".to_string();
        assert!(config.validate().is_err());
        config.storage.extension = "json".to_string();

        config.watcher.max_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_config() {
        let (_temp_dir, config_path) = create_temp_config_env();

        let mut config = StoreConfig::default();
        config.storage.state_dir = ".idea-like".to_string();
        config.watcher.debounce_ms = 20;

        config.save_to_path(&config_path).unwrap();
        assert!(config_path.exists());
        assert!(!config_path.with_extension("toml.tmp").exists());

        let loaded = StoreConfig::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.storage.state_dir, ".idea-like");
        assert_eq!(loaded.watcher.debounce_ms, 20);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let (_temp_dir, config_path) = create_temp_config_env();
        std::fs::write(&config_path, "[logging]\nsink = \"out.log\"\n").unwrap();

        let loaded = StoreConfig::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.logging.sink, Some(PathBuf::from("out.log")));
        assert_eq!(loaded.storage.state_dir, ".scopestore");
        assert_eq!(loaded.storage.extension, "json");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let (_temp_dir, config_path) = create_temp_config_env();
        let config = StoreConfig::load_or_default(&config_path).unwrap();
        assert_eq!(config.watcher, WatcherSettings::default());
    }

    #[test]
    fn test_invalid_toml() {
        let (_temp_dir, config_path) = create_temp_config_env();
        std::fs::write(&config_path, "[general\nlog_level=").unwrap();

        let err = StoreConfig::load_from_path(&config_path).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn test_env_var_overrides() {
        let mut config = StoreConfig::default();

        unsafe {
            std::env::set_var(ENV_DURABLE_WRITES, "false");
            std::env::set_var(ENV_LOG_SINK, "/tmp/scopestore-test.log");
        }

        let result = config.merge_env_vars();

        unsafe {
            std::env::remove_var(ENV_DURABLE_WRITES);
            std::env::remove_var(ENV_LOG_SINK);
        }

        result.unwrap();
        assert!(!config.storage.durable_writes);
        assert_eq!(
            config.logging.sink,
            Some(PathBuf::from("/tmp/scopestore-test.log"))
        );
    }

    #[test]
    fn test_manifest_load() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(MANIFEST_FILENAME),
            r#"
name = "demo"

[[modules]]
name = "core"
dir = "core"

[[modules]]
name = "app"
dir = "app"
"#,
        )
        .unwrap();

        let manifest = ProjectManifest::load(temp_dir.path()).unwrap();
        assert_eq!(manifest.name, "demo");
        let names: Vec<_> = manifest.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["core", "app"]);
    }

    #[test]
    fn test_manifest_rejects_duplicate_modules() {
        let manifest = ProjectManifest {
            name: "demo".to_string(),
            modules: vec![
                ModuleEntry {
                    name: "core".to_string(),
                    dir: PathBuf::from("a"),
                },
                ModuleEntry {
                    name: "core".to_string(),
                    dir: PathBuf::from("b"),
                },
            ],
        };
        assert!(manifest.validate().is_err());
    }
}
