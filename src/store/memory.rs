use super::TableStore;
use super::types::*;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredRow {
    version: u64,
    timestamp_ms: u64,
    properties: Properties,
}

/// In-process table store.
///
/// All tables live behind one mutex, so every conditional write is atomic with
/// respect to every other write and scan page. Versions are drawn from a single
/// store-wide counter, so a token is never reused even across table recreation.
pub struct InMemoryTableStore {
    tables: Mutex<HashMap<String, BTreeMap<RowKey, StoredRow>>>,
    next_version: AtomicU64,
    page_size: usize,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Creates a store that returns at most `page_size` rows per scan call.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            page_size: page_size.max(1),
        }
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn token_for(version: u64) -> ConcurrencyToken {
        ConcurrencyToken(format!("W/\"{}\"", version))
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.tables.lock().contains_key(table)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map(|rows| rows.len()).unwrap_or(0)
    }

    /// Removes a single row outside the normal protocol. Returns whether it existed.
    pub fn remove_row(&self, table: &str, key: &RowKey) -> bool {
        self.tables
            .lock()
            .get_mut(table)
            .map(|rows| rows.remove(key).is_some())
            .unwrap_or(false)
    }
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn create_table_if_absent(&self, table: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), BTreeMap::new());
        tracing::info!("Created table {}", table);
        Ok(true)
    }

    async fn delete_table(&self, table: &str) -> Result<bool, StoreError> {
        let removed = self.tables.lock().remove(table).is_some();
        if removed {
            tracing::info!("Deleted table {}", table);
        }
        Ok(removed)
    }

    async fn scan(
        &self,
        table: &str,
        filter: &KeyFilter,
        continuation: Option<&RowKey>,
    ) -> Result<ScanPage, StoreError> {
        let tables = self.tables.lock();
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let lower = match continuation {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };

        let mut page = ScanPage::default();
        for (key, stored) in rows.range((lower, Bound::Unbounded)) {
            if !filter.matches(key) {
                continue;
            }
            if page.rows.len() == self.page_size {
                page.continuation = page.rows.last().map(|row| row.key.clone());
                break;
            }
            page.rows.push(Row {
                key: key.clone(),
                token: Self::token_for(stored.version),
                timestamp_ms: stored.timestamp_ms,
                properties: stored.properties.clone(),
            });
        }

        Ok(page)
    }

    async fn insert_if_absent(
        &self,
        table: &str,
        key: &RowKey,
        properties: Properties,
    ) -> Result<Option<ConcurrencyToken>, StoreError> {
        let mut tables = self.tables.lock();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        if rows.contains_key(key) {
            return Ok(None);
        }

        let version = self.bump_version();
        rows.insert(
            key.clone(),
            StoredRow {
                version,
                timestamp_ms: now_ms(),
                properties,
            },
        );
        Ok(Some(Self::token_for(version)))
    }

    async fn conditional_replace(
        &self,
        table: &str,
        key: &RowKey,
        token: &ConcurrencyToken,
        properties: Properties,
    ) -> Result<ConcurrencyToken, StoreError> {
        let mut tables = self.tables.lock();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let stored = rows
            .get_mut(key)
            .ok_or_else(|| StoreError::PreconditionFailed(key.clone()))?;

        if !token.is_wildcard() && *token != Self::token_for(stored.version) {
            return Err(StoreError::PreconditionFailed(key.clone()));
        }

        let version = self.bump_version();
        stored.version = version;
        stored.timestamp_ms = now_ms();
        stored.properties = properties;
        Ok(Self::token_for(version))
    }
}
