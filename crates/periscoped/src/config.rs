//! periscope.toml configuration.
//!
//! Every section is optional; missing keys take their defaults. Durations
//! are strings such as "500ms", "10s" or "1m".

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use periscope_metadata::parse_duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub agents: AgentsConfig,
    pub tracepoints: TracepointsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:50400".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Keep all state in memory; nothing survives a restart.
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/periscope"),
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Agents silent for longer than this are removed.
    pub expiry_timeout: String,
    pub reap_interval: String,
    /// Newest agent change-log entries kept for streaming deltas. Streams
    /// that fall further behind are resent the full state.
    pub change_log_retention: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            expiry_timeout: "60s".to_string(),
            reap_interval: "10s".to_string(),
            change_log_retention: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracepointsConfig {
    /// How often expired tracepoints are terminated.
    pub expiry_interval: String,
}

impl Default for TracepointsConfig {
    fn default() -> Self {
        Self {
            expiry_interval: "10s".to_string(),
        }
    }
}

/// Configuration with every value parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen: SocketAddr,
    /// `None` for an in-memory store.
    pub db_path: Option<PathBuf>,
    pub agent_expiry_timeout: Duration,
    pub agent_reap_interval: Duration,
    pub change_log_retention: u64,
    pub tracepoint_expiry_interval: Duration,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let listen = self
            .server
            .listen
            .parse()
            .with_context(|| format!("invalid server.listen {:?}", self.server.listen))?;
        let db_path = (!self.storage.in_memory).then(|| self.storage.data_dir.join("periscope.redb"));

        Ok(Settings {
            listen,
            db_path,
            agent_expiry_timeout: duration("agents.expiry_timeout", &self.agents.expiry_timeout)?,
            agent_reap_interval: duration("agents.reap_interval", &self.agents.reap_interval)?,
            change_log_retention: self.agents.change_log_retention,
            tracepoint_expiry_interval: duration(
                "tracepoints.expiry_interval",
                &self.tracepoints.expiry_interval,
            )?,
        })
    }
}

fn duration(key: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).ok_or_else(|| anyhow::anyhow!("invalid duration for {key}: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config, DaemonConfig::default());

        let settings = config.settings().unwrap();
        assert_eq!(settings.listen, "0.0.0.0:50400".parse::<SocketAddr>().unwrap());
        assert_eq!(
            settings.db_path,
            Some(PathBuf::from("/var/lib/periscope/periscope.redb"))
        );
        assert_eq!(settings.agent_expiry_timeout, Duration::from_secs(60));
        assert_eq!(settings.agent_reap_interval, Duration::from_secs(10));
        assert_eq!(settings.tracepoint_expiry_interval, Duration::from_secs(10));
        assert_eq!(settings.change_log_retention, 10_000);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = DaemonConfig::parse(
            r#"
            [server]
            listen = "127.0.0.1:8080"

            [storage]
            in_memory = true

            [agents]
            expiry_timeout = "2m"
            change_log_retention = 500
            "#,
        )
        .unwrap();

        let settings = config.settings().unwrap();
        assert_eq!(settings.listen, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.db_path, None);
        assert_eq!(settings.agent_expiry_timeout, Duration::from_secs(120));
        assert_eq!(settings.agent_reap_interval, Duration::from_secs(10));
        assert_eq!(settings.change_log_retention, 500);
    }

    #[test]
    fn bad_duration_names_the_key() {
        let config = DaemonConfig::parse(
            r#"
            [tracepoints]
            expiry_interval = "often"
            "#,
        )
        .unwrap();

        let err = config.settings().unwrap_err().to_string();
        assert!(err.contains("tracepoints.expiry_interval"));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(DaemonConfig::parse("[server]\nlisten = 8080").is_err());
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("periscope.toml");
        std::fs::write(&path, "[storage]\ndata_dir = \"/tmp/periscope\"\n").unwrap();

        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/periscope"));
    }
}
