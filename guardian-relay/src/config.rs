//! Configuration loading for guardian-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).
//! Secrets may be overridden from the environment (`SECRET_KEY`,
//! `ADMIN_USER`, `ADMIN_PASS`).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;

/// Placeholder secret shipped in sample configs. Refused at startup.
pub const PLACEHOLDER_SECRET: &str = "CHANGE_THIS_TO_A_SECURE_RANDOM_KEY";

/// Root configuration for guardian-relay.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Credential configuration.
    pub auth: AuthConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
    /// Cleanup task configuration.
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP server (default: 0.0.0.0:8000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Credential configuration.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC key used to sign access tokens.
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
    /// Access token lifetime in seconds (default: 1800 = 30 minutes).
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Reject tokens whose device has since left the registry (default: false).
    #[serde(default)]
    pub require_registered: bool,
    /// Username for the admin stats endpoint.
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    /// Password for the admin stats endpoint.
    #[serde(default = "default_admin_pass")]
    pub admin_pass: String,
    /// Trusted devices: device id to device secret.
    #[serde(default)]
    pub devices: BTreeMap<String, String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("require_registered", &self.require_registered)
            .field("admin_user", &self.admin_user)
            .field("admin_pass", &"<redacted>")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding message queues.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Directory holding uploaded blobs.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
    /// Maximum upload size in bytes (default: 10 MiB).
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,
    /// Unconsumed blobs older than this are deleted (default: 7 days, 0 = never).
    #[serde(default = "default_blob_ttl")]
    pub blob_ttl_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum authenticated requests per device per minute (default: 120).
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: NonZeroU32,
    /// Maximum authentication attempts per device id per minute (default: 10).
    #[serde(default = "default_auth_attempts_per_minute")]
    pub auth_attempts_per_minute: NonZeroU32,
    /// Maximum requests per second across all devices (default: 1000).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: NonZeroU32,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Cleanup interval in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_token_secret() -> String {
    PLACEHOLDER_SECRET.to_string()
}

fn default_token_ttl() -> u64 {
    30 * 60
}

fn default_admin_user() -> String {
    "admin".to_string()
}

fn default_admin_pass() -> String {
    "admin".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("messages.db")
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_blob_size() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_blob_ttl() -> u64 {
    7 * 24 * 60 * 60 // 7 days in seconds
}

fn default_requests_per_minute() -> NonZeroU32 {
    NonZeroU32::new(120).unwrap_or(NonZeroU32::MIN)
}

fn default_auth_attempts_per_minute() -> NonZeroU32 {
    NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN)
}

fn default_global_requests_per_second() -> NonZeroU32 {
    NonZeroU32::new(1000).unwrap_or(NonZeroU32::MIN)
}

fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: default_token_secret(),
            token_ttl_secs: default_token_ttl(),
            require_registered: false,
            admin_user: default_admin_user(),
            admin_pass: default_admin_pass(),
            devices: BTreeMap::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            blob_dir: default_blob_dir(),
            max_blob_size: default_max_blob_size(),
            blob_ttl_secs: default_blob_ttl(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            auth_attempts_per_minute: default_auth_attempts_per_minute(),
            global_requests_per_second: default_global_requests_per_second(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply `SECRET_KEY`, `ADMIN_USER` and `ADMIN_PASS` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup("SECRET_KEY") {
            self.auth.token_secret = secret;
        }
        if let Some(user) = lookup("ADMIN_USER") {
            self.auth.admin_user = user;
        }
        if let Some(pass) = lookup("ADMIN_PASS") {
            self.auth.admin_pass = pass;
        }
    }

    /// Check values serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token_secret.is_empty() || self.auth.token_secret == PLACEHOLDER_SECRET {
            return Err(ConfigError::Invalid {
                field: "auth.token_secret",
                reason: "must be set to a random value (e.g. `openssl rand -hex 32`)".into(),
            });
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "auth.token_ttl_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.storage.max_blob_size == 0 {
            return Err(ConfigError::Invalid {
                field: "storage.max_blob_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.cleanup.enabled && self.cleanup.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "cleanup.interval_secs",
                reason: "must be greater than zero when cleanup is enabled".into(),
            });
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value parsed but is not usable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_deployment_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8000");
        assert_eq!(config.auth.token_ttl_secs, 1800);
        assert_eq!(config.storage.max_blob_size, 10 * 1024 * 1024);
        assert!(config.auth.devices.is_empty());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:9000"

[auth]
token_secret = "0123456789abcdef"
admin_user = "ops"

[auth.devices]
"AA:BB:CC:DD:EE:FF" = "s3cr3t"

[storage]
database = "/data/messages.db"
blob_dir = "/data/uploads"
max_blob_size = 2097152

[limits]
requests_per_minute = 30

[cleanup]
interval_secs = 600
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.auth.admin_user, "ops");
        assert_eq!(config.auth.admin_pass, "admin");
        assert_eq!(
            config.auth.devices.get("AA:BB:CC:DD:EE:FF").map(String::as_str),
            Some("s3cr3t")
        );
        assert_eq!(config.storage.database, PathBuf::from("/data/messages.db"));
        assert_eq!(config.storage.max_blob_size, 2097152);
        assert_eq!(config.limits.requests_per_minute.get(), 30);
        assert_eq!(config.limits.auth_attempts_per_minute.get(), 10);
        assert_eq!(config.cleanup.interval_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.storage.blob_ttl_secs, 7 * 24 * 60 * 60);
        assert!(config.cleanup.enabled);
    }

    #[test]
    fn example_config_parses_but_needs_a_secret() {
        let config: Config = toml::from_str(include_str!("../relay.example.toml")).unwrap();
        assert_eq!(config.auth.devices.len(), 1);
        assert_eq!(config.storage.max_blob_size, 10 * 1024 * 1024);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rate_limit_is_rejected_at_parse_time() {
        let result: Result<Config, _> = toml::from_str("[limits]\nrequests_per_minute = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn placeholder_secret_fails_validation() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "auth.token_secret",
                ..
            })
        ));
    }

    #[test]
    fn env_overrides_replace_secrets() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "SECRET_KEY" => Some("from-env".to_string()),
            "ADMIN_PASS" => Some("hunter2".to_string()),
            _ => None,
        });
        assert_eq!(config.auth.token_secret, "from-env");
        assert_eq!(config.auth.admin_user, "admin");
        assert_eq!(config.auth.admin_pass, "hunter2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = Config::default();
        config.auth.token_secret = "very-secret-key".into();
        config
            .auth
            .devices
            .insert("dev1".into(), "device-secret".into());

        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret-key"));
        assert!(!debug.contains("device-secret"));
        assert!(debug.contains("dev1"));
    }
}
