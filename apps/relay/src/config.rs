//! Relay configuration.
//!
//! Read from the TOML file named on the command line; every field is
//! optional. `HANDOFF_RELAY_PORT` overrides the port.

use std::path::Path;

use handoff_protocol::constants::DEFAULT_RELAY_PORT;
use handoff_rendezvous::ServerConfig;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides [`RelayConfig::port`].
pub const PORT_ENV: &str = "HANDOFF_RELAY_PORT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Interface to listen on.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// TCP port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    DEFAULT_RELAY_PORT
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl RelayConfig {
    /// Loads `path` if given, then applies the environment override.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                let config: RelayConfig = toml::from_str(&content)?;
                tracing::debug!(path = %path.display(), "configuration read");
                config
            }
            None => RelayConfig::default(),
        };
        if let Ok(port) = std::env::var(PORT_ENV) {
            config.apply_port_override(&port)?;
        }
        Ok(config)
    }

    fn apply_port_override(&mut self, raw: &str) -> anyhow::Result<()> {
        self.port = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {PORT_ENV} {raw:?}: {e}"))?;
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_address: self.bind_address.clone(),
            port: self.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 3001);
    }

    #[test]
    fn config_partial_toml() {
        let config: RelayConfig = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = RelayConfig {
            bind_address: "127.0.0.1".into(),
            port: 4000,
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: RelayConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relay.toml");
        std::fs::write(&path, "bind_address = \"127.0.0.1\"\nport = 4100\n").unwrap();

        let config: RelayConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.server_config().bind_address, "127.0.0.1");
        assert_eq!(config.server_config().port, 4100);
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(RelayConfig::load(Some(&tmp.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn port_override() {
        let mut config = RelayConfig::default();
        config.apply_port_override(" 8080 ").unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.apply_port_override("not-a-port").is_err());
        assert_eq!(config.port, 8080);
    }
}
