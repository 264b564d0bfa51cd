//! Daemon configuration.
//!
//! Read from a TOML file; every key is optional:
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 989
//! read_buffer_size = 1024
//! shutdown_delay_ms = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tcpmux_protocol::constants::{DEFAULT_PORT, READ_BUFFER_SIZE, SHUTDOWN_DELAY};
use tcpmux_server::ServerConfig;

/// Default file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tcpmux.toml";

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Interface to bind.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// TCP port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bytes requested per socket read.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Delay between the shutdown notice and the actual shutdown.
    #[serde(default = "default_shutdown_delay_ms")]
    pub shutdown_delay_ms: u64,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_read_buffer_size() -> usize {
    READ_BUFFER_SIZE
}

fn default_shutdown_delay_ms() -> u64 {
    SHUTDOWN_DELAY.as_millis() as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            read_buffer_size: default_read_buffer_size(),
            shutdown_delay_ms: default_shutdown_delay_ms(),
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// used if present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_delay_ms)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind.clone(),
            port: self.port,
            read_buffer_size: self.read_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 989);
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.shutdown_delay(), Duration::from_secs(1));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str("port = 7000").unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.shutdown_delay_ms, 1000);
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tcpmux.toml");
        std::fs::write(
            &path,
            "bind = \"127.0.0.1\"\nport = 0\nshutdown_delay_ms = 50\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.shutdown_delay(), Duration::from_millis(50));
        assert_eq!(config.server_config().addr(), "127.0.0.1:0");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&tmp.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
