//! Configuration management for the replica server.
//!
//! Loads the TOML configuration file, applies defaults for missing sections
//! and converts the result into the core library's configuration types.

use replica_core::{AllocatorConfig, CoreConfig, LoginConfig, SimulationConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

fn default_server_name() -> String {
    "replica-01".to_string()
}
fn default_health_interval_secs() -> u64 {
    60
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Process-level settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Avatar movement tunables
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Object id range for spawned avatars
    #[serde(default)]
    pub allocator: AllocatorConfig,
    /// Accounts accepted by the built-in authenticator
    #[serde(default)]
    pub login: LoginConfig,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Name shown in the startup summary and health lines
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Seconds between health reports (0 disables them)
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// How long shutdown waits for the simulation loop to drain
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            health_interval_secs: default_health_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// A missing file is created with the default configuration, which is
    /// then returned.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// The part of the configuration the object server consumes.
    pub fn to_core_config(&self) -> CoreConfig {
        CoreConfig {
            simulation: self.simulation.clone(),
            allocator: self.allocator.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.name.trim().is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.login.accounts.iter().any(|account| account.username.is_empty()) {
            return Err("login.accounts entries need a username".to_string());
        }

        self.to_core_config().validate().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.server.name, "replica-01");
        assert_eq!(config.server.health_interval_secs, 60);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert_eq!(config.simulation.tick_rate_hz, 20);
        assert_eq!(config.login.accounts.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replica.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // The written file loads back to the same configuration
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[server]
name = "arena-east"

[simulation]
tick_rate_hz = 30
arena_bound = 25.0

[allocator]
min_id = 5000
max_id = 5999

[[login.accounts]]
username = "alice"
password = "hunter2"

[logging]
level = "debug"
json_format = true
"#;
        tokio::fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf()).await.unwrap();
        assert_eq!(config.server.name, "arena-east");
        assert_eq!(config.server.health_interval_secs, 60);
        assert_eq!(config.simulation.tick_rate_hz, 30);
        assert_eq!(config.simulation.arena_bound, 25.0);
        assert_eq!(config.simulation.move_speed, 3.0);
        assert_eq!(config.allocator.min_id, 5000);
        assert_eq!(config.login.accounts[0].username, "alice");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[simulation\ntick_rate_hz = ").await.unwrap();
        assert!(AppConfig::load_from_file(&temp_file.path().to_path_buf()).await.is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().contains("Invalid log level"));
    }

    #[test]
    fn test_validation_valid_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "level {level} should be accepted");
        }
    }

    #[test]
    fn test_validation_delegates_to_core() {
        let mut config = AppConfig::default();
        config.simulation.tick_rate_hz = 0;
        assert!(config.validate().unwrap_err().contains("tick_rate_hz"));

        let mut config = AppConfig::default();
        config.allocator = AllocatorConfig { min_id: 10, max_id: 1 };
        assert!(config.validate().unwrap_err().contains("allocator"));
    }

    #[test]
    fn test_validation_rejects_blank_names() {
        let mut config = AppConfig::default();
        config.server.name = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.login.accounts[0].username.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_core_config() {
        let mut config = AppConfig::default();
        config.simulation.tick_rate_hz = 50;
        config.allocator.max_id = 100_010;

        let core = config.to_core_config();
        assert_eq!(core.simulation.tick_rate_hz, 50);
        assert_eq!(core.allocator.max_id, 100_010);
    }
}
