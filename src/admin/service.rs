use super::types::*;
use crate::error::{PartitioningError, Result};
use crate::partitioning::types::*;
use crate::store::TableStore;
use crate::store::types::{ConcurrencyToken, KeyFilter, Properties, PropertyValue, Row, RowKey, StoreError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Out-of-band administration of a partition space.
///
/// Every write here uses the wildcard token: it bypasses ownership and changes
/// the row token, so a current holder loses the lease on its next scan.
pub struct PartitionAdmin {
    store: Arc<dyn TableStore>,
    table: String,
}

impl PartitionAdmin {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the table, one immediately acquirable row per partition, and
    /// the control rows. `Control/Created` is written last, so nodes refuse to
    /// start against a half-created space. Resumes a creation that was
    /// interrupted before that marker landed.
    pub async fn create_space(&self, layout: SpaceLayout) -> Result<()> {
        if layout.partition_count == 0 {
            return Err(PartitioningError::InvalidConfig(
                "partition_count must be positive".to_string(),
            ));
        }
        if layout.max_partitions_per_node == 0 {
            return Err(PartitioningError::InvalidConfig(
                "max_partitions_per_node must be positive".to_string(),
            ));
        }
        if layout.max_acquires_per_cycle == 0 {
            return Err(PartitioningError::InvalidConfig(
                "max_acquires_per_cycle must be positive".to_string(),
            ));
        }

        if !self.store.create_table_if_absent(&self.table).await? && self.space_exists().await? {
            return Err(PartitioningError::SpaceAlreadyExists {
                table: self.table.clone(),
            });
        }

        let unowned = LeaseRecord::unowned();
        for index in 0..layout.partition_count {
            let partition = PartitionId::from_index(index);
            self.store
                .insert_if_absent(&self.table, &partition.row_key(), unowned.to_properties())
                .await?;
        }

        self.insert_control(
            MAX_PARTITIONS_ROW_KEY,
            MAX_PARTITIONS_PROPERTY,
            layout.max_partitions_per_node,
        )
        .await?;
        self.insert_control(
            MAX_ACQUIRES_ROW_KEY,
            MAX_ACQUIRES_PROPERTY,
            layout.max_acquires_per_cycle,
        )
        .await?;
        self.insert_control(CREATED_ROW_KEY, PARTITION_COUNT_PROPERTY, layout.partition_count)
            .await?;

        tracing::info!(
            "Created partition space {} with {} partitions",
            self.table,
            layout.partition_count
        );
        Ok(())
    }

    async fn insert_control(&self, row_key: &str, property: &str, value: u32) -> Result<()> {
        let mut properties = Properties::new();
        properties.insert(property.to_string(), PropertyValue::Int64(i64::from(value)));
        self.store
            .insert_if_absent(
                &self.table,
                &RowKey::new(CONTROL_PARTITION_KEY, row_key),
                properties,
            )
            .await?;
        Ok(())
    }

    async fn space_exists(&self) -> Result<bool> {
        let rows = self.store.scan_all(&self.table, &control_rows()).await?;
        Ok(rows.iter().any(|row| row.key.row_key == CREATED_ROW_KEY))
    }

    /// Removes the table. Returns false if it did not exist.
    pub async fn delete_space(&self) -> Result<bool> {
        let deleted = self.store.delete_table(&self.table).await?;
        if deleted {
            tracing::info!("Deleted partition space {}", self.table);
        }
        Ok(deleted)
    }

    /// Forces a partition away from its holder. If `disallow` is set, that node
    /// will not acquire the partition again until `allow` clears the exclusion.
    pub async fn kick(&self, partition: &PartitionId, disallow: Option<&NodeId>) -> Result<()> {
        let record = LeaseRecord {
            owner: KICKED_OWNER.to_string(),
            load_data: String::new(),
            given_up: false,
            invalid: false,
            disallowed_node: disallow.map(|node| node.0.clone()).unwrap_or_default(),
        };
        self.overwrite(partition, &record).await?;

        match disallow {
            Some(node) => tracing::info!("Kicked partition {}, disallowing {}", partition, node),
            None => tracing::info!("Kicked partition {}", partition),
        }
        Ok(())
    }

    /// Sets or clears the "do not load" flag.
    pub async fn set_invalid(&self, partition: &PartitionId, invalid: bool) -> Result<()> {
        let mut record = LeaseRecord::from_row(&self.read_lease(partition).await?);
        record.invalid = invalid;
        self.overwrite(partition, &record).await
    }

    /// Clears the node exclusion set by `kick`.
    pub async fn allow(&self, partition: &PartitionId) -> Result<()> {
        let mut record = LeaseRecord::from_row(&self.read_lease(partition).await?);
        record.disallowed_node.clear();
        self.overwrite(partition, &record).await
    }

    async fn read_lease(&self, partition: &PartitionId) -> Result<Row> {
        let rows = self
            .store
            .scan_all(&self.table, &KeyFilter::partition(partition.as_str()))
            .await
            .map_err(|e| self.space_error(e))?;

        rows.into_iter()
            .find(|row| row.key.row_key == LEASE_ROW_KEY)
            .ok_or_else(|| PartitioningError::PartitionNotFound(partition.0.clone()))
    }

    async fn overwrite(&self, partition: &PartitionId, record: &LeaseRecord) -> Result<()> {
        match self
            .store
            .conditional_replace(
                &self.table,
                &partition.row_key(),
                &ConcurrencyToken::wildcard(),
                record.to_properties(),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::PreconditionFailed(_)) => {
                Err(PartitioningError::PartitionNotFound(partition.0.clone()))
            }
            Err(e) => Err(self.space_error(e)),
        }
    }

    fn space_error(&self, error: StoreError) -> PartitioningError {
        match error {
            StoreError::TableNotFound(_) => PartitioningError::SpaceNotCreated {
                table: self.table.clone(),
            },
            other => PartitioningError::Store(other),
        }
    }

    /// Every partition row, in key order.
    pub async fn snapshot(&self) -> Result<Vec<PartitionSnapshot>> {
        let rows = self
            .store
            .scan_all(&self.table, &partition_rows())
            .await
            .map_err(|e| self.space_error(e))?;
        Ok(rows.iter().map(PartitionSnapshot::from_row).collect())
    }

    /// Partitions whose token did not change across two snapshots taken `wait`
    /// apart. With `wait` longer than the lease validity window these are the
    /// partitions nobody is renewing.
    pub async fn detect_stale(&self, wait: Duration) -> Result<Vec<PartitionSnapshot>> {
        let before: HashMap<PartitionId, ConcurrencyToken> = self
            .snapshot()
            .await?
            .into_iter()
            .map(|snapshot| (snapshot.partition_id, snapshot.token))
            .collect();

        tokio::time::sleep(wait).await;

        Ok(self
            .snapshot()
            .await?
            .into_iter()
            .filter(|snapshot| before.get(&snapshot.partition_id) == Some(&snapshot.token))
            .collect())
    }
}
