use crate::store::types::{ConcurrencyToken, KeyFilter, Properties, PropertyValue, Row, RowKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

// --- Row schema ---

pub const NODE_ID_PROPERTY: &str = "NodeID";
pub const LOAD_DATA_PROPERTY: &str = "LoadData";
pub const GIVEN_UP_PROPERTY: &str = "LeaseGivenUp";
pub const INVALID_PROPERTY: &str = "PartitionInvalid";
pub const DISALLOWED_NODE_PROPERTY: &str = "DisallowedNode";

/// Secondary key shared by every partition row.
pub const LEASE_ROW_KEY: &str = "0";

/// Reserved partition key for control rows.
pub const CONTROL_PARTITION_KEY: &str = "Control";
pub const CREATED_ROW_KEY: &str = "Created";
pub const PARTITION_COUNT_PROPERTY: &str = "PartitionCount";
pub const MAX_PARTITIONS_ROW_KEY: &str = "MaxPartitionsPerNode";
pub const MAX_PARTITIONS_PROPERTY: &str = "MaxPartitions";
pub const MAX_ACQUIRES_ROW_KEY: &str = "MaxPartitionAcquiresPerCycle";
pub const MAX_ACQUIRES_PROPERTY: &str = "MaxAcquires";

/// Owner written by an administrative kick.
pub const KICKED_OWNER: &str = "kicked";
/// Owner written into freshly created partition rows.
pub const UNOWNED: &str = "none";

/// Partition keys live strictly between these bounds.
const PARTITION_KEY_LOWER: &str = "x";
const PARTITION_KEY_UPPER: &str = "y";

/// Identifier of a partition, equal to the partition key of its row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub String);

impl PartitionId {
    /// Partition id for the `index`-th partition of a space.
    pub fn from_index(index: u32) -> Self {
        Self(format!("{}{:04x}", PARTITION_KEY_LOWER, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn row_key(&self) -> RowKey {
        RowKey::new(self.0.clone(), LEASE_ROW_KEY)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a participant node. Must be unique among live participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl NodeId {
    /// Short random id of the form `N123`.
    pub fn random() -> Self {
        Self(format!("N{:03}", rand::random::<u16>() % 1000))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Scan filter covering every partition row and no control row.
pub fn partition_rows() -> KeyFilter {
    KeyFilter::range(PARTITION_KEY_LOWER, PARTITION_KEY_UPPER)
}

/// Scan filter covering the control rows.
pub fn control_rows() -> KeyFilter {
    KeyFilter::partition(CONTROL_PARTITION_KEY)
}

/// The named property values of a partition row.
///
/// Missing properties read as empty / false, so rows written with only
/// `NodeID` and `LoadData` are understood.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub owner: String,
    pub load_data: String,
    pub given_up: bool,
    pub invalid: bool,
    /// Node excluded from acquiring this partition. Empty means none.
    pub disallowed_node: String,
}

impl LeaseRecord {
    pub fn from_row(row: &Row) -> Self {
        Self {
            owner: row.get_str(NODE_ID_PROPERTY).unwrap_or_default().to_string(),
            load_data: row.get_str(LOAD_DATA_PROPERTY).unwrap_or_default().to_string(),
            given_up: row.get_bool(GIVEN_UP_PROPERTY).unwrap_or(false),
            invalid: row.get_bool(INVALID_PROPERTY).unwrap_or(false),
            disallowed_node: row
                .get_str(DISALLOWED_NODE_PROPERTY)
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Record of a freshly created, immediately acquirable partition.
    pub fn unowned() -> Self {
        Self {
            owner: UNOWNED.to_string(),
            given_up: true,
            ..Self::default()
        }
    }

    pub fn is_disallowed(&self, node_id: &NodeId) -> bool {
        !self.disallowed_node.is_empty() && self.disallowed_node == node_id.0
    }

    pub fn to_properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert(NODE_ID_PROPERTY.to_string(), PropertyValue::from(self.owner.as_str()));
        properties.insert(
            LOAD_DATA_PROPERTY.to_string(),
            PropertyValue::from(self.load_data.as_str()),
        );
        properties.insert(GIVEN_UP_PROPERTY.to_string(), PropertyValue::Bool(self.given_up));
        properties.insert(INVALID_PROPERTY.to_string(), PropertyValue::Bool(self.invalid));
        properties.insert(
            DISALLOWED_NODE_PROPERTY.to_string(),
            PropertyValue::from(self.disallowed_node.as_str()),
        );
        properties
    }
}

/// Staleness windows and caps that drive classification and the apply phases.
#[derive(Debug, Clone, PartialEq)]
pub struct LeasePolicy {
    pub lease_validity: Duration,
    pub acquire_older_than: Duration,
    pub max_partitions_per_node: usize,
    pub max_acquires_per_cycle: usize,
}

/// What a refresh cycle decided to do with a lease after observing its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    Renew,
    Lose,
    Acquire,
}

/// This node's cached belief about one partition.
#[derive(Debug, Clone)]
pub struct Lease {
    pub partition_id: PartitionId,
    /// Secondary key of the backing row.
    pub row_id: String,
    pub token: ConcurrencyToken,
    /// Local time at which `token` was last seen to change. All staleness
    /// decisions are measured from here.
    pub last_observed_change: Instant,
    pub record: LeaseRecord,
    /// True iff this node's last conditional write against the row succeeded
    /// and has not since been invalidated.
    pub held: bool,
    /// Set when this node voluntarily released the lease.
    pub released_at: Option<Instant>,
    /// Scan epoch in which the row was last observed. A lease whose epoch lags
    /// the cache's current epoch is marked for collection.
    pub(crate) seen_epoch: u64,
}

impl Lease {
    pub fn from_row(row: &Row, now: Instant, epoch: u64) -> Self {
        Self {
            partition_id: PartitionId(row.key.partition_key.clone()),
            row_id: row.key.row_key.clone(),
            token: row.token.clone(),
            last_observed_change: now,
            record: LeaseRecord::from_row(row),
            held: false,
            released_at: None,
            seen_epoch: epoch,
        }
    }

    pub fn row_key(&self) -> RowKey {
        RowKey::new(self.partition_id.0.clone(), self.row_id.clone())
    }

    /// Folds a freshly scanned row into the lease. Returns whether the token changed.
    pub fn observe(&mut self, row: &Row, now: Instant, epoch: u64) -> bool {
        self.seen_epoch = epoch;
        self.row_id = row.key.row_key.clone();
        self.record = LeaseRecord::from_row(row);

        if self.token != row.token {
            self.token = row.token.clone();
            self.last_observed_change = now;
            return true;
        }
        false
    }

    /// Records a successful write by this node.
    pub fn record_write(&mut self, token: ConcurrencyToken, record: LeaseRecord, now: Instant) {
        self.token = token;
        self.record = record;
        self.last_observed_change = now;
    }

    pub fn unchanged_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_observed_change)
    }

    /// Decides the action for this lease after a scan observed its row.
    ///
    /// A held lease is renewed only if nobody wrote the row since our last write
    /// and that write is still within the validity window; any other token
    /// change is a loss, even if it may have been ours.
    pub fn classify(
        &self,
        token_changed: bool,
        now: Instant,
        policy: &LeasePolicy,
        node_id: &NodeId,
    ) -> Option<LeaseAction> {
        let age = self.unchanged_for(now);

        if self.held {
            if !token_changed && age < policy.lease_validity {
                return Some(LeaseAction::Renew);
            }
            return Some(LeaseAction::Lose);
        }

        if self.record.invalid || self.record.is_disallowed(node_id) {
            return None;
        }

        // A release by this node is not an invitation to take it straight back.
        let released_recently = self
            .released_at
            .is_some_and(|at| now.saturating_duration_since(at) < policy.acquire_older_than);
        let given_up = self.record.given_up && !released_recently;
        if age >= policy.acquire_older_than || given_up {
            return Some(LeaseAction::Acquire);
        }
        None
    }
}
