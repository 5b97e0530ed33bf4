use super::cache::LeaseCache;
use super::callbacks::ParticipantCallbacks;
use super::cycle::{CycleReport, RefreshCycle};
use super::types::*;
use crate::config::ParticipantConfig;
use crate::error::{PartitioningError, Result};
use crate::store::TableStore;
use crate::store::types::StoreError;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One node's participation in a partition space.
///
/// Nothing touches the store until `start()`. Every query afterwards reads the
/// local lease cache only; `drop_partition` is the one call that also writes.
pub struct PartitioningService {
    store: Arc<dyn TableStore>,
    config: ParticipantConfig,
    node_id: NodeId,
    callbacks: Arc<dyn ParticipantCallbacks>,
    cache: Arc<Mutex<LeaseCache>>,
    cycle: OnceLock<Arc<RefreshCycle>>,
    refresh_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PartitioningService {
    pub fn new(
        store: Arc<dyn TableStore>,
        config: ParticipantConfig,
        callbacks: Arc<dyn ParticipantCallbacks>,
    ) -> Arc<Self> {
        let node_id = config.node_id();
        Arc::new(Self {
            store,
            config,
            node_id,
            callbacks,
            cache: Arc::new(Mutex::new(LeaseCache::new())),
            cycle: OnceLock::new(),
            refresh_handle: tokio::sync::Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    /// Effective policy after control-row overrides, once started.
    pub fn policy(&self) -> Option<LeasePolicy> {
        self.cycle.get().map(|cycle| cycle.policy().clone())
    }

    /// Validates the configuration, confirms the partition space exists and
    /// spawns the refresh loop. Calling it again while running is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut handle = self.refresh_handle.lock().await;
        if handle.is_some() {
            return Ok(());
        }

        let cycle = self.initialize().await?;
        *handle = Some(tokio::spawn(refresh_loop(
            cycle,
            self.config.heartbeat_interval(),
        )));

        tracing::info!(
            "Node {} started partitioning on table {}",
            self.node_id,
            self.config.table_name
        );
        Ok(())
    }

    /// Runs the startup check without spawning the refresh loop. The caller
    /// then drives cycles itself through `refresh_now`.
    pub async fn initialize(&self) -> Result<Arc<RefreshCycle>> {
        if let Some(cycle) = self.cycle.get() {
            return Ok(cycle.clone());
        }

        self.config.validate()?;
        let policy = self.check_space().await?;
        let cycle = Arc::new(RefreshCycle::new(
            self.store.clone(),
            self.callbacks.clone(),
            self.cache.clone(),
            self.config.table_name.clone(),
            self.node_id.clone(),
            policy,
        ));
        Ok(self.cycle.get_or_init(|| cycle).clone())
    }

    /// Startup check: the `Control/Created` row must exist. Reads the
    /// control rows that override node-local caps.
    async fn check_space(&self) -> Result<LeasePolicy> {
        let table = &self.config.table_name;
        let rows = self
            .store
            .scan_all(table, &control_rows())
            .await
            .map_err(|e| match e {
                StoreError::TableNotFound(_) => PartitioningError::SpaceNotCreated {
                    table: table.clone(),
                },
                other => PartitioningError::Store(other),
            })?;

        let created = rows
            .iter()
            .find(|row| row.key.row_key == CREATED_ROW_KEY)
            .ok_or_else(|| PartitioningError::SpaceNotCreated {
                table: table.clone(),
            })?;

        if let Some(count) = created.get_i64(PARTITION_COUNT_PROPERTY)
            && count != i64::from(self.config.num_partitions)
        {
            tracing::warn!(
                "Table {} was created with {} partitions, configured for {}",
                table,
                count,
                self.config.num_partitions
            );
        }

        let mut policy = self.config.policy();
        for row in &rows {
            match row.key.row_key.as_str() {
                MAX_PARTITIONS_ROW_KEY => {
                    match control_value(row.get_i64(MAX_PARTITIONS_PROPERTY)) {
                        Some(max) => policy.max_partitions_per_node = max,
                        None => tracing::warn!(
                            "Ignoring unusable {} in {}, keeping {}",
                            MAX_PARTITIONS_PROPERTY,
                            table,
                            policy.max_partitions_per_node
                        ),
                    }
                }
                MAX_ACQUIRES_ROW_KEY => {
                    match control_value(row.get_i64(MAX_ACQUIRES_PROPERTY)) {
                        Some(max) => policy.max_acquires_per_cycle = max,
                        None => tracing::warn!(
                            "Ignoring unusable {} in {}, keeping {}",
                            MAX_ACQUIRES_PROPERTY,
                            table,
                            policy.max_acquires_per_cycle
                        ),
                    }
                }
                _ => {}
            }
        }

        tracing::info!(
            "Partition space {}: max {} partitions per node, {} acquisitions per cycle",
            table,
            policy.max_partitions_per_node,
            policy.max_acquires_per_cycle
        );
        Ok(policy)
    }

    /// Runs one refresh cycle now, serialized with the background loop.
    pub async fn refresh_now(&self) -> Result<CycleReport> {
        let cycle = self.cycle.get().ok_or(PartitioningError::NotInitialized)?;
        Ok(cycle.run_once().await)
    }

    /// Stops the refresh loop. Held leases are not released: they go stale
    /// and are reclaimed by other nodes.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.refresh_handle.lock().await.take() {
            handle.abort();
            tracing::info!("Node {} stopped partitioning", self.node_id);
        }
    }

    fn initialized_cache(&self) -> Result<&Mutex<LeaseCache>> {
        if self.cycle.get().is_none() {
            return Err(PartitioningError::NotInitialized);
        }
        Ok(&self.cache)
    }

    // --- Participant API ---

    pub fn have_lease(&self, partition: &PartitionId) -> Result<bool> {
        Ok(self.initialized_cache()?.lock().is_held(partition))
    }

    pub fn list_owned(&self) -> Result<Vec<PartitionId>> {
        Ok(self.initialized_cache()?.lock().owned())
    }

    /// Gives up a held partition. The lost callback fires immediately; a
    /// best-effort write then marks the row given up so other nodes can take
    /// it without waiting out the staleness window. Returns false if the
    /// partition was not held.
    pub async fn drop_partition(&self, partition: &PartitionId) -> Result<bool> {
        let (key, token, record) = {
            let mut cache = self.initialized_cache()?.lock();
            let Some(lease) = cache.get(partition).filter(|lease| lease.held) else {
                return Ok(false);
            };
            let record = LeaseRecord {
                owner: String::new(),
                load_data: String::new(),
                given_up: true,
                invalid: lease.record.invalid,
                disallowed_node: lease.record.disallowed_node.clone(),
            };
            let snapshot = (lease.row_key(), lease.token.clone(), record);

            cache.release(partition);
            cache.record_release(partition, Instant::now());
            snapshot
        };

        tracing::info!("Dropping partition {}", partition);
        self.callbacks.lost_partition(partition);

        match self
            .store
            .conditional_replace(&self.config.table_name, &key, &token, record.to_properties())
            .await
        {
            Ok(new_token) => {
                self.cache
                    .lock()
                    .record_given_up(partition, new_token, record, Instant::now());
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to mark partition {} as given up, it will be reclaimed once stale: {}",
                    partition,
                    e
                );
            }
        }
        Ok(true)
    }

    // --- Client API ---

    /// Last recorded owner of a partition, as of the latest scan.
    pub fn owner_of(&self, partition: &PartitionId) -> Result<Option<String>> {
        Ok(self
            .initialized_cache()?
            .lock()
            .get(partition)
            .map(|lease| lease.record.owner.clone()))
    }

    pub fn partition_map(&self) -> Result<BTreeMap<PartitionId, String>> {
        Ok(self.initialized_cache()?.lock().owner_map())
    }
}

/// A cap read from a control row. Zero or negative values are ignored.
fn control_value(value: Option<i64>) -> Option<usize> {
    value
        .and_then(|v| usize::try_from(v).ok())
        .filter(|&v| v > 0)
}

async fn refresh_loop(cycle: Arc<RefreshCycle>, heartbeat: Duration) {
    loop {
        cycle.run_once().await;
        tokio::time::sleep(heartbeat).await;
    }
}
