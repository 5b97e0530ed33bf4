use crate::partitioning::types::PartitionId;
use crate::store::types::{ConcurrencyToken, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shape of a partition space written by `create_space`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceLayout {
    pub partition_count: u32,
    /// Seeds every node's capacity cap at startup.
    pub max_partitions_per_node: u32,
    /// Seeds every node's per-cycle acquisition cap at startup.
    pub max_acquires_per_cycle: u32,
}

impl Default for SpaceLayout {
    fn default() -> Self {
        Self {
            partition_count: 64,
            max_partitions_per_node: 64,
            max_acquires_per_cycle: 4,
        }
    }
}

/// One partition row rendered for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    pub partition_id: PartitionId,
    pub token: ConcurrencyToken,
    pub timestamp_ms: u64,
    pub properties: BTreeMap<String, String>,
}

impl PartitionSnapshot {
    pub fn from_row(row: &Row) -> Self {
        Self {
            partition_id: PartitionId(row.key.partition_key.clone()),
            token: row.token.clone(),
            timestamp_ms: row.timestamp_ms,
            properties: row
                .properties
                .iter()
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect(),
        }
    }
}
