//! Server configuration.
//!
//! Loaded from an optional JSON file (camelCase keys, every key optional)
//! and then overridden from the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use edl_transport::TransportConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub receive_buffer_size: usize,
    pub max_frame_bytes: usize,
    pub max_connections: usize,
    /// Pending requests admitted before new ones are answered with `Busy`.
    pub queue_capacity: usize,
    /// Requests started per editor tick.
    pub batch_size: usize,
    pub tick_interval_ms: u64,
    /// Applied when a command carries no `timeoutMs`. Zero disables it.
    pub default_timeout_ms: u64,
    pub idle_timeout_secs: Option<u64>,
    /// How long shutdown waits for outstanding work before cancelling it.
    pub drain_grace_ms: u64,
    pub status_port: Option<u16>,
    pub auth_token: Option<String>,
    /// Reject every mutating command.
    pub read_only: bool,
    pub verbose_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 13377,
            receive_buffer_size: 64 * 1024,
            max_frame_bytes: 4 * 1024 * 1024,
            max_connections: 32,
            queue_capacity: 256,
            batch_size: 16,
            tick_interval_ms: 16,
            default_timeout_ms: 30_000,
            idle_timeout_secs: None,
            drain_grace_ms: 2_000,
            status_port: None,
            auth_token: None,
            read_only: false,
            verbose_logging: false,
        }
    }
}

impl ServerConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("queueCapacity", self.queue_capacity as u64),
            ("batchSize", self.batch_size as u64),
            ("tickIntervalMs", self.tick_interval_ms),
            ("receiveBufferSize", self.receive_buffer_size as u64),
            ("maxFrameBytes", self.max_frame_bytes as u64),
            ("maxConnections", self.max_connections as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.auth_token.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Invalid("authToken must not be empty when set".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            hostname: self.host.clone(),
            port: self.port,
            max_connections: Some(self.max_connections),
            receive_buffer_size: self.receive_buffer_size,
            max_frame_bytes: self.max_frame_bytes,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            status_port: self.status_port,
            verbose_logging: self.verbose_logging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.port, 13377);
        assert_eq!(config.default_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(r#"{"port": 0, "queueCapacity": 50, "authToken": "abc"}"#);
        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.queue_capacity, 50);
        assert_eq!(config.auth_token.as_deref(), Some("abc"));
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn zero_default_timeout_disables_it() {
        let config = ServerConfig {
            default_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.default_timeout(), None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let file = write_config(r#"{"batchSize": 0}"#);
        assert!(matches!(
            ServerConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn unparseable_file_is_a_parse_error() {
        let file = write_config("{ port: ");
        assert!(matches!(
            ServerConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ServerConfig::load(dir.path().join("absent.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn transport_config_carries_network_settings() {
        let config = ServerConfig {
            port: 4000,
            idle_timeout_secs: Some(30),
            status_port: Some(4001),
            ..Default::default()
        };
        let transport = config.transport_config();
        assert_eq!(transport.port, 4000);
        assert_eq!(transport.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(transport.status_port, Some(4001));
        assert_eq!(transport.max_connections, Some(32));
    }
}
