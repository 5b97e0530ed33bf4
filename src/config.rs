//! Participant configuration.
//!
//! Loaded from a TOML file (every field optional) and usually overridden by
//! command-line flags in the node binary.

use crate::error::{PartitioningError, Result};
use crate::partitioning::types::{LeasePolicy, NodeId};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantConfig {
    /// Table holding the partition space.
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Must be unique among live participants. Collisions are not detected.
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Expected size of the partition space. Informational: the scan decides
    /// which partitions exist.
    #[serde(default = "default_num_partitions")]
    pub num_partitions: u32,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// A held lease not renewed within this window is lost.
    #[serde(default = "default_lease_validity_secs")]
    pub lease_validity_secs: u64,

    /// How long a row must go unchanged before any node may claim it.
    #[serde(default = "default_acquire_older_than_secs")]
    pub acquire_older_than_secs: u64,

    #[serde(default = "default_max_partitions_per_node")]
    pub max_partitions_per_node: usize,

    #[serde(default = "default_max_acquires_per_cycle")]
    pub max_acquires_per_cycle: usize,
}

fn default_table_name() -> String {
    "partitions".to_string()
}

fn default_node_id() -> String {
    NodeId::random().0
}

fn default_num_partitions() -> u32 {
    64
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_lease_validity_secs() -> u64 {
    30
}

fn default_acquire_older_than_secs() -> u64 {
    43
}

fn default_max_partitions_per_node() -> usize {
    64
}

fn default_max_acquires_per_cycle() -> usize {
    4
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            node_id: default_node_id(),
            num_partitions: default_num_partitions(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            lease_validity_secs: default_lease_validity_secs(),
            acquire_older_than_secs: default_acquire_older_than_secs(),
            max_partitions_per_node: default_max_partitions_per_node(),
            max_acquires_per_cycle: default_max_acquires_per_cycle(),
        }
    }
}

impl ParticipantConfig {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: ParticipantConfig =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(invalid("table_name must not be empty"));
        }
        if self.node_id.is_empty() {
            return Err(invalid("node_id must not be empty"));
        }
        if self.num_partitions == 0 {
            return Err(invalid("num_partitions must be positive"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(invalid("heartbeat_interval_secs must be positive"));
        }
        if self.heartbeat_interval_secs >= self.lease_validity_secs {
            return Err(PartitioningError::InvalidConfig(format!(
                "heartbeat_interval_secs ({}) must be shorter than lease_validity_secs ({})",
                self.heartbeat_interval_secs, self.lease_validity_secs
            )));
        }
        if self.acquire_older_than_secs == 0 {
            return Err(invalid("acquire_older_than_secs must be positive"));
        }
        if self.max_partitions_per_node == 0 {
            return Err(invalid("max_partitions_per_node must be positive"));
        }
        if self.max_acquires_per_cycle == 0 {
            return Err(invalid("max_acquires_per_cycle must be positive"));
        }
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        NodeId(self.node_id.clone())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn lease_validity(&self) -> Duration {
        Duration::from_secs(self.lease_validity_secs)
    }

    pub fn acquire_older_than(&self) -> Duration {
        Duration::from_secs(self.acquire_older_than_secs)
    }

    /// Lease policy before control-row overrides are applied.
    pub fn policy(&self) -> LeasePolicy {
        LeasePolicy {
            lease_validity: self.lease_validity(),
            acquire_older_than: self.acquire_older_than(),
            max_partitions_per_node: self.max_partitions_per_node,
            max_acquires_per_cycle: self.max_acquires_per_cycle,
        }
    }
}

fn invalid(message: &str) -> PartitioningError {
    PartitioningError::InvalidConfig(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ParticipantConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_partitions, 64);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.lease_validity(), Duration::from_secs(30));
        assert_eq!(config.acquire_older_than(), Duration::from_secs(43));
    }

    #[test]
    fn test_heartbeat_must_fit_in_validity_window() {
        let config = ParticipantConfig {
            heartbeat_interval_secs: 30,
            lease_validity_secs: 30,
            ..ParticipantConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PartitioningError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_caps_rejected() {
        let config = ParticipantConfig {
            max_acquires_per_cycle: 0,
            ..ParticipantConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ParticipantConfig {
            node_id: String::new(),
            ..ParticipantConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "table_name = \"zoo\"\nnode_id = \"N042\"\nmax_acquires_per_cycle = 2"
        )
        .unwrap();

        let config = ParticipantConfig::from_toml_file(file.path()).unwrap();

        assert_eq!(config.table_name, "zoo");
        assert_eq!(config.node_id(), NodeId::from("N042"));
        assert_eq!(config.max_acquires_per_cycle, 2);
        assert_eq!(config.lease_validity_secs, 30);
    }

    #[test]
    fn test_invalid_toml_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "heartbeat_interval_secs = 60").unwrap();

        assert!(ParticipantConfig::from_toml_file(file.path()).is_err());
    }
}
