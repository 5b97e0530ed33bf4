//! Lease Cache
//!
//! The node's map from partition id to `Lease`. Mark-and-sweep uses a scan
//! epoch instead of a per-entry boolean: starting a scan bumps the epoch (marking
//! every entry at once), observing a row stamps its lease with the current
//! epoch, and whatever still lags the epoch after a complete scan is swept.

use super::types::*;
use crate::store::types::{ConcurrencyToken, Row};

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct LeaseCache {
    leases: BTreeMap<PartitionId, Lease>,
    epoch: u64,
    held_count: usize,
}

impl LeaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every cached lease for collection.
    pub fn begin_scan(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Creates or refreshes the lease for a scanned row and classifies it.
    pub fn observe(
        &mut self,
        row: &Row,
        now: Instant,
        policy: &LeasePolicy,
        node_id: &NodeId,
    ) -> Option<LeaseAction> {
        let partition_id = PartitionId(row.key.partition_key.clone());
        let epoch = self.epoch;

        let (lease, token_changed) = match self.leases.entry(partition_id) {
            Entry::Occupied(entry) => {
                let lease = entry.into_mut();
                let changed = lease.observe(row, now, epoch);
                (lease, changed)
            }
            Entry::Vacant(entry) => {
                tracing::debug!("Discovered partition {}", entry.key());
                (entry.insert(Lease::from_row(row, now, epoch)), false)
            }
        };

        lease.classify(token_changed, now, policy, node_id)
    }

    /// Leases not observed since the last `begin_scan`.
    pub fn marked_for_collection(&self) -> Vec<PartitionId> {
        self.leases
            .values()
            .filter(|lease| lease.seen_epoch != self.epoch)
            .map(|lease| lease.partition_id.clone())
            .collect()
    }

    /// Held leases not observed since the last `begin_scan` whose last
    /// successful write is at least `validity` old. Other nodes may already
    /// treat these as free.
    pub fn expired_unseen(&self, now: Instant, validity: Duration) -> Vec<PartitionId> {
        self.leases
            .values()
            .filter(|lease| lease.held && lease.seen_epoch != self.epoch)
            .filter(|lease| lease.unchanged_for(now) >= validity)
            .map(|lease| lease.partition_id.clone())
            .collect()
    }

    pub fn get(&self, partition_id: &PartitionId) -> Option<&Lease> {
        self.leases.get(partition_id)
    }

    pub fn is_held(&self, partition_id: &PartitionId) -> bool {
        self.leases
            .get(partition_id)
            .map(|lease| lease.held)
            .unwrap_or(false)
    }

    /// Records a successful acquisition. Returns `false` if the lease vanished
    /// from the cache in the meantime.
    pub fn mark_held(
        &mut self,
        partition_id: &PartitionId,
        token: ConcurrencyToken,
        record: LeaseRecord,
        now: Instant,
    ) -> bool {
        let Some(lease) = self.leases.get_mut(partition_id) else {
            return false;
        };
        lease.record_write(token, record, now);
        lease.released_at = None;
        if !lease.held {
            lease.held = true;
            self.held_count += 1;
        }
        true
    }

    /// Records a successful renewal of a lease that is still held.
    pub fn record_renewal(
        &mut self,
        partition_id: &PartitionId,
        token: ConcurrencyToken,
        record: LeaseRecord,
        now: Instant,
    ) -> bool {
        match self.leases.get_mut(partition_id) {
            Some(lease) if lease.held => {
                lease.record_write(token, record, now);
                true
            }
            _ => false,
        }
    }

    /// Clears `held`. Returns whether the lease was held.
    pub fn release(&mut self, partition_id: &PartitionId) -> bool {
        match self.leases.get_mut(partition_id) {
            Some(lease) if lease.held => {
                lease.held = false;
                self.held_count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Marks a lease as voluntarily given up by this node.
    pub fn record_release(&mut self, partition_id: &PartitionId, now: Instant) {
        if let Some(lease) = self.leases.get_mut(partition_id) {
            lease.released_at = Some(now);
        }
    }

    /// Records our own give-up write so the next scan does not mistake it for
    /// a foreign write.
    pub fn record_given_up(
        &mut self,
        partition_id: &PartitionId,
        token: ConcurrencyToken,
        record: LeaseRecord,
        now: Instant,
    ) {
        if let Some(lease) = self.leases.get_mut(partition_id)
            && !lease.held
        {
            lease.record_write(token, record, now);
        }
    }

    /// Drops a lease from the cache, releasing it first. Returns whether it was held.
    pub fn remove(&mut self, partition_id: &PartitionId) -> bool {
        let was_held = self.release(partition_id);
        self.leases.remove(partition_id);
        was_held
    }

    pub fn held_count(&self) -> usize {
        self.held_count
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn owned(&self) -> Vec<PartitionId> {
        self.leases
            .values()
            .filter(|lease| lease.held)
            .map(|lease| lease.partition_id.clone())
            .collect()
    }

    /// Partition id to last recorded owner, for every known partition.
    pub fn owner_map(&self) -> BTreeMap<PartitionId, String> {
        self.leases
            .iter()
            .map(|(id, lease)| (id.clone(), lease.record.owner.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{ConcurrencyToken, RowKey};

    fn row(partition: &str, token: &str, record: &LeaseRecord) -> Row {
        Row {
            key: RowKey::new(partition, LEASE_ROW_KEY),
            token: ConcurrencyToken(token.to_string()),
            timestamp_ms: 0,
            properties: record.to_properties(),
        }
    }

    fn policy() -> LeasePolicy {
        LeasePolicy {
            lease_validity: Duration::from_secs(30),
            acquire_older_than: Duration::from_secs(45),
            max_partitions_per_node: 8,
            max_acquires_per_cycle: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unobserved_leases_are_marked() {
        let mut cache = LeaseCache::new();
        let node = NodeId::from("N001");
        let record = LeaseRecord::default();

        cache.begin_scan();
        cache.observe(&row("x0000", "1", &record), Instant::now(), &policy(), &node);
        cache.observe(&row("x0001", "1", &record), Instant::now(), &policy(), &node);
        assert!(cache.marked_for_collection().is_empty());

        cache.begin_scan();
        cache.observe(&row("x0000", "1", &record), Instant::now(), &policy(), &node);

        assert_eq!(cache.marked_for_collection(), vec![PartitionId::from("x0001")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_count_tracks_mark_and_release() {
        let mut cache = LeaseCache::new();
        let node = NodeId::from("N001");
        let id = PartitionId::from("x0000");

        cache.begin_scan();
        cache.observe(&row("x0000", "1", &LeaseRecord::unowned()), Instant::now(), &policy(), &node);

        assert!(cache.mark_held(&id, ConcurrencyToken("2".into()), LeaseRecord::default(), Instant::now()));
        assert!(cache.mark_held(&id, ConcurrencyToken("3".into()), LeaseRecord::default(), Instant::now()));
        assert_eq!(cache.held_count(), 1);

        assert!(cache.release(&id));
        assert!(!cache.release(&id));
        assert_eq!(cache.held_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_reports_whether_held() {
        let mut cache = LeaseCache::new();
        let node = NodeId::from("N001");
        let id = PartitionId::from("x0002");

        cache.begin_scan();
        cache.observe(&row("x0002", "1", &LeaseRecord::default()), Instant::now(), &policy(), &node);
        cache.mark_held(&id, ConcurrencyToken("2".into()), LeaseRecord::default(), Instant::now());

        assert!(cache.remove(&id));
        assert!(cache.is_empty());
        assert_eq!(cache.held_count(), 0);
        assert!(!cache.remove(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_unseen_only_reports_old_held_leases() {
        let mut cache = LeaseCache::new();
        let node = NodeId::from("N001");
        let held = PartitionId::from("x0000");
        let free = PartitionId::from("x0001");

        cache.begin_scan();
        cache.observe(&row("x0000", "1", &LeaseRecord::unowned()), Instant::now(), &policy(), &node);
        cache.observe(&row("x0001", "1", &LeaseRecord::unowned()), Instant::now(), &policy(), &node);
        cache.mark_held(&held, ConcurrencyToken("2".into()), LeaseRecord::default(), Instant::now());

        // A scan that saw nothing
        cache.begin_scan();
        let validity = policy().lease_validity;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.expired_unseen(Instant::now(), validity).is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.expired_unseen(Instant::now(), validity), vec![held.clone()]);
        assert!(!cache.expired_unseen(Instant::now(), validity).contains(&free));

        // Observed in the current scan: not reported
        cache.observe(&row("x0000", "2", &LeaseRecord::default()), Instant::now(), &policy(), &node);
        assert!(cache.expired_unseen(Instant::now(), validity).is_empty());
        assert_eq!(cache.len(), 2);
    }
}
