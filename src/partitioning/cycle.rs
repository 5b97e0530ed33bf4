//! Refresh Cycle
//!
//! The protocol engine. Each run scans every partition row, classifies each
//! partition against the local cache, and then applies the resulting actions in
//! a fixed order:
//!
//! 1. **Mark**: bump the cache's scan epoch.
//! 2. **Scan & classify**: page through the store; each row is folded into the
//!    cache under the lock, which is dropped again before the next page fetch.
//! 3. **Sweep**: after a complete scan, leases that were not observed are queued
//!    for deletion. After a failed scan, unobserved held leases past their
//!    validity are queued as losses instead.
//! 4. **Lose**: purely local; the store already reflects the loss.
//! 5. **Acquire**: conditional writes in scan order, capped per cycle and by
//!    per-node capacity. A conflict means another node won the race.
//! 6. **Renew**: conditional writes carrying fresh load data. Any failure is a loss.
//! 7. **Delete**: release (if held) and drop swept leases.
//!
//! Classification is not atomic with the writes that follow it; every write is
//! re-validated by the store's concurrency token instead.

use super::cache::LeaseCache;
use super::callbacks::ParticipantCallbacks;
use super::types::*;
use crate::store::TableStore;
use crate::store::types::{RowKey, StoreError};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

/// Per-cycle counters, returned by every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Partition rows observed by the scan.
    pub scanned: usize,
    pub renewed: usize,
    pub acquired: usize,
    pub lost: usize,
    /// Leases swept because their rows disappeared.
    pub deleted: usize,
    /// False if the scan was cut short by a store error; nothing is swept then.
    pub scan_complete: bool,
    /// Leases held at the end of the cycle.
    pub held: usize,
}

/// Actions queued by the scan phase.
#[derive(Debug, Default)]
pub(crate) struct CyclePlan {
    pub(crate) renew: Vec<PartitionId>,
    pub(crate) lose: Vec<PartitionId>,
    pub(crate) acquire: Vec<PartitionId>,
    pub(crate) delete: Vec<PartitionId>,
    pub(crate) scanned: usize,
    pub(crate) scan_complete: bool,
}

pub struct RefreshCycle {
    store: Arc<dyn TableStore>,
    callbacks: Arc<dyn ParticipantCallbacks>,
    cache: Arc<Mutex<LeaseCache>>,
    table: String,
    node_id: NodeId,
    policy: LeasePolicy,
    /// Held for the whole of a run so cycles never overlap.
    running: tokio::sync::Mutex<()>,
}

impl RefreshCycle {
    pub fn new(
        store: Arc<dyn TableStore>,
        callbacks: Arc<dyn ParticipantCallbacks>,
        cache: Arc<Mutex<LeaseCache>>,
        table: String,
        node_id: NodeId,
        policy: LeasePolicy,
    ) -> Self {
        Self {
            store,
            callbacks,
            cache,
            table,
            node_id,
            policy,
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    /// Runs one complete cycle.
    pub async fn run_once(&self) -> CycleReport {
        let _running = self.running.lock().await;
        let plan = self.scan().await;
        self.apply(plan).await
    }

    /// Mark, scan & classify, sweep.
    pub(crate) async fn scan(&self) -> CyclePlan {
        let mut plan = CyclePlan::default();
        self.cache.lock().begin_scan();

        let filter = partition_rows();
        let mut continuation: Option<RowKey> = None;

        loop {
            let page = match self
                .store
                .scan(&self.table, &filter, continuation.as_ref())
                .await
            {
                Ok(page) => page,
                Err(StoreError::TableNotFound(_)) => {
                    // The space was deleted: every partition is gone.
                    tracing::warn!("Partition table {} does not exist", self.table);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Partition scan of {} failed: {}", self.table, e);
                    // Unseen leases cannot be renewed this cycle. Once they
                    // are past validity another node may take them.
                    let expired = self
                        .cache
                        .lock()
                        .expired_unseen(Instant::now(), self.policy.lease_validity);
                    plan.lose.extend(expired);
                    return plan;
                }
            };

            for row in &page.rows {
                let partition = PartitionId(row.key.partition_key.clone());
                let action =
                    self.cache
                        .lock()
                        .observe(row, Instant::now(), &self.policy, &self.node_id);
                plan.scanned += 1;

                match action {
                    Some(LeaseAction::Renew) => plan.renew.push(partition),
                    Some(LeaseAction::Lose) => plan.lose.push(partition),
                    Some(LeaseAction::Acquire) => plan.acquire.push(partition),
                    None => {}
                }
            }

            match page.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        plan.scan_complete = true;
        plan.delete = self.cache.lock().marked_for_collection();
        plan
    }

    /// Lose, acquire, renew, delete.
    pub(crate) async fn apply(&self, plan: CyclePlan) -> CycleReport {
        let mut report = CycleReport {
            scanned: plan.scanned,
            scan_complete: plan.scan_complete,
            ..CycleReport::default()
        };

        for partition in &plan.lose {
            if self.lose(partition) {
                report.lost += 1;
            }
        }

        report.acquired = self.apply_acquire(&plan.acquire).await;

        let (renewed, lost) = self.apply_renew(&plan.renew).await;
        report.renewed = renewed;
        report.lost += lost;

        report.deleted = self.apply_delete(&plan.delete);
        let known = {
            let cache = self.cache.lock();
            report.held = cache.held_count();
            cache.len()
        };

        tracing::debug!(
            "Cycle on {}: scanned={} known={} renewed={} acquired={} lost={} deleted={} held={}",
            self.node_id,
            report.scanned,
            known,
            report.renewed,
            report.acquired,
            report.lost,
            report.deleted,
            report.held
        );

        report
    }

    /// Clears `held` and notifies the consumer. Returns false if the lease was
    /// already released, in which case the consumer was notified before.
    fn lose(&self, partition: &PartitionId) -> bool {
        let released = self.cache.lock().release(partition);
        if released {
            tracing::info!("Lost partition {}", partition);
            self.callbacks.lost_partition(partition);
        }
        released
    }

    async fn apply_acquire(&self, candidates: &[PartitionId]) -> usize {
        let mut acquired = 0;

        for partition in candidates {
            if acquired >= self.policy.max_acquires_per_cycle {
                tracing::debug!(
                    "Acquisition cap of {} reached for this cycle",
                    self.policy.max_acquires_per_cycle
                );
                break;
            }

            let (key, token, record) = {
                let cache = self.cache.lock();
                if cache.held_count() >= self.policy.max_partitions_per_node {
                    tracing::debug!(
                        "Holding {} partitions, at capacity",
                        cache.held_count()
                    );
                    break;
                }
                let Some(lease) = cache.get(partition) else {
                    continue;
                };
                if lease.held {
                    continue;
                }
                let record = LeaseRecord {
                    owner: self.node_id.0.clone(),
                    load_data: String::new(),
                    given_up: false,
                    invalid: false,
                    disallowed_node: lease.record.disallowed_node.clone(),
                };
                (lease.row_key(), lease.token.clone(), record)
            };

            match self
                .store
                .conditional_replace(&self.table, &key, &token, record.to_properties())
                .await
            {
                Ok(new_token) => {
                    if self
                        .cache
                        .lock()
                        .mark_held(partition, new_token, record, Instant::now())
                    {
                        acquired += 1;
                        tracing::info!("Acquired partition {}", partition);
                        self.callbacks.got_partition(partition);
                    }
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!("Partition {} was taken by another node", partition);
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to acquire lease for eligible partition {}: {}",
                        partition,
                        e
                    );
                }
            }
        }

        acquired
    }

    async fn apply_renew(&self, partitions: &[PartitionId]) -> (usize, usize) {
        let mut renewed = 0;
        let mut lost = 0;

        for partition in partitions {
            let (key, token, previous) = {
                let cache = self.cache.lock();
                match cache.get(partition) {
                    Some(lease) if lease.held => {
                        (lease.row_key(), lease.token.clone(), lease.record.clone())
                    }
                    _ => continue,
                }
            };

            let record = LeaseRecord {
                owner: self.node_id.0.clone(),
                load_data: self.callbacks.current_load(partition),
                given_up: false,
                invalid: previous.invalid,
                disallowed_node: previous.disallowed_node,
            };

            match self
                .store
                .conditional_replace(&self.table, &key, &token, record.to_properties())
                .await
            {
                Ok(new_token) => {
                    if self
                        .cache
                        .lock()
                        .record_renewal(partition, new_token, record, Instant::now())
                    {
                        renewed += 1;
                        tracing::trace!("Renewed lease for partition {}", partition);
                    }
                }
                Err(e) => {
                    if e.is_conflict() {
                        tracing::debug!("Lease for partition {} changed under us", partition);
                    } else {
                        tracing::warn!("Failed to renew lease for partition {}: {}", partition, e);
                    }
                    if self.lose(partition) {
                        lost += 1;
                    }
                }
            }
        }

        (renewed, lost)
    }

    fn apply_delete(&self, partitions: &[PartitionId]) -> usize {
        for partition in partitions {
            let was_held = self.cache.lock().remove(partition);
            if was_held {
                tracing::info!("Partition {} no longer exists, releasing it", partition);
                self.callbacks.lost_partition(partition);
            } else {
                tracing::debug!("Partition {} no longer exists", partition);
            }
        }
        partitions.len()
    }
}
