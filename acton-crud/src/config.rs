//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `ACTON_CRUD_`, nested keys split on `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/acton-crud/{service_name}/config.toml
//! 4. System directory: /etc/acton-crud/{service_name}/config.toml
//! 5. Default values
//!
//! ```toml
//! [service]
//! name = "inventory"
//! log_level = "debug"
//! instance_rid = "inventory-eu-1"
//!
//! [data.required_includes]
//! Device = ["location"]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::processing::IncludeSet;

const ENV_PREFIX: &str = "ACTON_CRUD_";
const XDG_PREFIX: &str = "acton-crud";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Data access configuration
    #[serde(default)]
    pub data: DataConfig,

    /// Database configuration (optional)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Log level or full filter directive (e.g. `info,acton_crud=debug`)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Identifier of this running instance, attached to every log line
    #[serde(default)]
    pub instance_rid: Option<String>,
}

/// Data access configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    /// Relations every repository of a type loads, keyed by type name
    #[serde(default)]
    pub required_includes: HashMap<String, Vec<String>>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl Config {
    /// Load configuration from all sources
    ///
    /// The service name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| XDG_PREFIX.to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::named(service_name)));

        // Lowest priority first so later files override earlier ones
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        let config = figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses the search path; environment variables still override.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Candidate config files, highest priority first
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(XDG_PREFIX);
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Some(path) = xdg_dirs.find_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc")
                .join(XDG_PREFIX)
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    fn named(service_name: &str) -> Self {
        let mut config = Self::default();
        config.service.name = service_name.to_string();
        config
    }

    /// Get database URL
    pub fn database_url(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.url.as_str())
    }

    /// Database URL, or a configuration error naming `database.url`
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url()
            .ok_or_else(|| Error::MissingConfig("database.url".to_string()))
    }

    /// Instance identifier, or a configuration error naming `service.instance_rid`
    pub fn require_instance_rid(&self) -> Result<&str> {
        self.service
            .instance_rid
            .as_deref()
            .ok_or_else(|| Error::MissingConfig("service.instance_rid".to_string()))
    }
}

impl DataConfig {
    /// Configured required includes for `type_name`; empty when none are set
    pub fn required_includes_for(&self, type_name: &str) -> IncludeSet {
        self.required_includes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(type_name))
            .map(|(_, paths)| paths.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: XDG_PREFIX.to_string(),
                log_level: default_log_level(),
                environment: default_environment(),
                instance_rid: None,
            },
            data: DataConfig::default(),
            database: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.service.environment, "dev");
        assert!(config.database.is_none());
        assert!(config.data.required_includes.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            [service]
            name = "inventory"
            log_level = "debug"
            instance_rid = "inventory-1"

            [data.required_includes]
            Device = ["location", "readings"]

            [database]
            url = "postgres://localhost/inventory"
            "#,
        );

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.service.name, "inventory");
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.require_instance_rid().unwrap(), "inventory-1");
        assert_eq!(
            config.require_database_url().unwrap(),
            "postgres://localhost/inventory"
        );
        assert_eq!(config.database.as_ref().unwrap().max_connections, 10);

        let includes = config.data.required_includes_for("device");
        assert!(includes.contains("location"));
        assert!(includes.contains("readings"));
    }

    #[test]
    fn test_missing_values_name_their_key() {
        let config = Config::default();
        let err = config.require_database_url().unwrap_err();
        assert_eq!(err.to_string(), "Missing database.url");
        let err = config.require_instance_rid().unwrap_err();
        assert_eq!(err.to_string(), "Missing service.instance_rid");
        assert!(config.data.required_includes_for("Device").is_empty());
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let file = write_config("[service\nname = \"broken\"\n");
        assert!(matches!(Config::load_from(file.path()), Err(Error::Config(_))));
    }
}
