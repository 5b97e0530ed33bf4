//! Callback Consumer
//!
//! The hosting application's side of the contract: it is told when this node
//! gains or loses a partition and reports a load string for every held
//! partition on each renewal.

use super::types::PartitionId;

/// Hooks invoked by the refresh cycle.
///
/// All methods run on the refresh task, outside the lease cache lock, and must
/// return quickly: a slow callback stalls the cycle and with it every renewal.
pub trait ParticipantCallbacks: Send + Sync {
    /// This node now holds `partition`.
    fn got_partition(&self, partition: &PartitionId);

    /// This node no longer holds `partition`.
    fn lost_partition(&self, partition: &PartitionId);

    /// Opaque load description written into the row on renewal.
    fn current_load(&self, partition: &PartitionId) -> String;
}

/// Callbacks that ignore every notification and report no load.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl ParticipantCallbacks for NoopCallbacks {
    fn got_partition(&self, _partition: &PartitionId) {}

    fn lost_partition(&self, _partition: &PartitionId) {}

    fn current_load(&self, _partition: &PartitionId) -> String {
        String::new()
    }
}
