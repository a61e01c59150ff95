//! Configuration for the hub binary.
//!
//! Values resolve in order: built-in defaults, then the YAML config
//! file, then environment variables, then command-line flags (applied
//! by `main`). A missing or unparsable config file is reported and
//! ignored rather than fatal, so a bare `weft-node` always starts.
//!
//! Resolution runs before the log subscriber exists, so anything worth
//! reporting is buffered as a [`Notice`] and replayed by `main` once
//! logging is up.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};
use weft_wire::{DISCONNECT_TIMEOUT, KEEPALIVE_INTERVAL};

/// A log line produced while resolving configuration.
#[derive(Debug)]
pub enum Notice {
    Info(String),
    Warn(String),
}

impl Notice {
    /// Emit through the live subscriber.
    pub fn emit(&self) {
        match self {
            Notice::Info(msg) => info!("{msg}"),
            Notice::Warn(msg) => warn!("{msg}"),
        }
    }
}

/// Resolved node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name peers register this node's link under.
    pub name: String,
    /// TCP listen address.
    pub listen: String,
    /// Remote hubs to dial and stay connected to.
    pub connect: Vec<String>,
    /// Default log filter, overridable via `RUST_LOG`.
    pub log_level: String,
    /// Keepalive emission interval.
    pub keepalive: Duration,
    /// Silence threshold for keepalive-speaking peers.
    pub disconnect_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            name: "hub".to_string(),
            listen: "0.0.0.0:1540".to_string(),
            connect: Vec::new(),
            log_level: "info".to_string(),
            keepalive: KEEPALIVE_INTERVAL,
            disconnect_timeout: DISCONNECT_TIMEOUT,
        }
    }
}

/// YAML file structure. Every field is optional; absent fields keep
/// their previous value.
#[derive(Debug, Deserialize)]
struct FileConfig {
    node: Option<NodeSection>,
}

#[derive(Debug, Deserialize)]
struct NodeSection {
    name: Option<String>,
    listen: Option<String>,
    connect: Option<Vec<String>>,
    log_level: Option<String>,
    keepalive: Option<String>,
    disconnect_timeout: Option<String>,
}

impl NodeConfig {
    /// Load configuration from a file and environment variables.
    pub fn load_from_file<P: AsRef<Path>>(
        config_path: P,
        notices: &mut Vec<Notice>,
    ) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<FileConfig>(&content) {
                Ok(file_config) => {
                    config.apply_file_config(file_config, notices);
                    notices.push(Notice::Info(format!(
                        "loaded configuration from {:?}",
                        config_path.as_ref()
                    )));
                }
                Err(err) => {
                    notices.push(Notice::Warn(format!(
                        "failed to parse config file {:?}, using defaults: {err}",
                        config_path.as_ref()
                    )));
                }
            }
        } else {
            notices.push(Notice::Warn(format!(
                "config file {:?} not found, using defaults",
                config_path.as_ref()
            )));
        }

        config.apply_environment_overrides(notices);
        Ok(config)
    }

    /// Load from environment variables only.
    pub fn load(notices: &mut Vec<Notice>) -> Self {
        let mut config = Self::default();
        config.apply_environment_overrides(notices);
        config
    }

    fn apply_file_config(&mut self, file_config: FileConfig, notices: &mut Vec<Notice>) {
        let Some(node) = file_config.node else {
            return;
        };
        if let Some(name) = node.name {
            self.name = name;
        }
        if let Some(listen) = node.listen {
            self.listen = listen;
        }
        if let Some(connect) = node.connect {
            self.connect = connect;
        }
        if let Some(log_level) = node.log_level {
            self.log_level = log_level;
        }
        if let Some(keepalive) = node.keepalive {
            apply_duration("node.keepalive", &keepalive, &mut self.keepalive, notices);
        }
        if let Some(timeout) = node.disconnect_timeout {
            apply_duration(
                "node.disconnect_timeout",
                &timeout,
                &mut self.disconnect_timeout,
                notices,
            );
        }
    }

    fn apply_environment_overrides(&mut self, notices: &mut Vec<Notice>) {
        if let Ok(name) = std::env::var("WEFT_NODE_NAME") {
            notices.push(Notice::Info(format!(
                "node name overridden by environment: {name}"
            )));
            self.name = name;
        }
        if let Ok(listen) = std::env::var("WEFT_LISTEN_ADDR") {
            notices.push(Notice::Info(format!(
                "listen address overridden by environment: {listen}"
            )));
            self.listen = listen;
        }
        if let Ok(connect) = std::env::var("WEFT_CONNECT_ADDRS") {
            self.connect = connect
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            notices.push(Notice::Info(format!(
                "connect addresses overridden by environment: {:?}",
                self.connect
            )));
        }
        if let Ok(log_level) = std::env::var("WEFT_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(keepalive) = std::env::var("WEFT_KEEPALIVE") {
            apply_duration("WEFT_KEEPALIVE", &keepalive, &mut self.keepalive, notices);
        }
        if let Ok(timeout) = std::env::var("WEFT_DISCONNECT_TIMEOUT") {
            apply_duration(
                "WEFT_DISCONNECT_TIMEOUT",
                &timeout,
                &mut self.disconnect_timeout,
                notices,
            );
        }
    }
}

fn apply_duration(what: &str, raw: &str, slot: &mut Duration, notices: &mut Vec<Notice>) {
    match humantime::parse_duration(raw) {
        Ok(duration) => *slot = duration,
        Err(err) => notices.push(Notice::Warn(format!(
            "ignoring invalid duration for {what} ({raw:?}): {err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.name, "hub");
        assert_eq!(config.listen, "0.0.0.0:1540");
        assert!(config.connect.is_empty());
        assert_eq!(config.keepalive, KEEPALIVE_INTERVAL);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
node:
  name: pit-display
  listen: "0.0.0.0:2540"
  connect:
    - "10.0.0.2:1540"
    - "10.0.0.3:1540"
  log_level: debug
  keepalive: 150ms
  disconnect_timeout: 1s
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = NodeConfig::load_from_file(temp_file.path(), &mut Vec::new()).unwrap();
        assert_eq!(config.name, "pit-display");
        assert_eq!(config.listen, "0.0.0.0:2540");
        assert_eq!(config.connect.len(), 2);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.keepalive, Duration::from_millis(150));
        assert_eq!(config.disconnect_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let mut notices = Vec::new();
        let config = NodeConfig::load_from_file("/nonexistent/weft.yaml", &mut notices).unwrap();
        assert_eq!(config.name, "hub");
        // The complaint is buffered for replay, not logged into the void.
        assert!(matches!(notices.first(), Some(Notice::Warn(_))));
    }

    #[test]
    fn test_invalid_duration_keeps_default() {
        let yaml_content = "node:\n  keepalive: often\n";
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let mut notices = Vec::new();
        let config = NodeConfig::load_from_file(temp_file.path(), &mut notices).unwrap();
        assert_eq!(config.keepalive, KEEPALIVE_INTERVAL);
        assert!(notices
            .iter()
            .any(|n| matches!(n, Notice::Warn(msg) if msg.contains("node.keepalive"))));
    }
}
