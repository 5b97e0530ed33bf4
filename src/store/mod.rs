//! Row Store Adapter
//!
//! The shared, strongly-consistent table store is the only coordination medium
//! between participants. This module models it as a narrow async interface over
//! rows carrying an opaque concurrency token.
//!
//! ## Core Concepts
//! - **Tables**: named collections of rows keyed by `(partition_key, row_key)`.
//! - **Scans**: key-filtered, paged, returned in key order.
//! - **Conditional replace**: succeeds only if the caller's token matches the
//!   row's current token (or the token is the wildcard `*`). Losing the race is
//!   `StoreError::PreconditionFailed`, never a panic.
//!
//! ## Implementations
//! - **`memory`**: `InMemoryTableStore`, used in tests, single-process embedding,
//!   and behind the table server.
//! - **`http`**: `HttpTableStore`, a `reqwest` client for a remote table server.
//! - **`handlers`** / **`protocol`**: axum handlers and DTOs serving any
//!   `TableStore` over HTTP.

pub mod handlers;
pub mod http;
pub mod memory;
pub mod protocol;
pub mod types;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use types::*;

/// A conditionally-writable table store.
///
/// Implementations must make a successful `conditional_replace` visible to every
/// subsequent `scan` within bounded time.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Creates the table. Returns `false` if it already existed.
    async fn create_table_if_absent(&self, table: &str) -> Result<bool, StoreError>;

    /// Deletes the table and all its rows. Returns `false` if it did not exist.
    async fn delete_table(&self, table: &str) -> Result<bool, StoreError>;

    /// Fetches one page of rows matching `filter`, starting after `continuation`.
    async fn scan(
        &self,
        table: &str,
        filter: &KeyFilter,
        continuation: Option<&RowKey>,
    ) -> Result<ScanPage, StoreError>;

    /// Inserts a new row. Returns `None` if a row with this key already exists.
    async fn insert_if_absent(
        &self,
        table: &str,
        key: &RowKey,
        properties: Properties,
    ) -> Result<Option<ConcurrencyToken>, StoreError>;

    /// Replaces every property of an existing row if `token` still matches.
    async fn conditional_replace(
        &self,
        table: &str,
        key: &RowKey,
        token: &ConcurrencyToken,
        properties: Properties,
    ) -> Result<ConcurrencyToken, StoreError>;

    /// Drains every page of a scan.
    async fn scan_all(&self, table: &str, filter: &KeyFilter) -> Result<Vec<Row>, StoreError> {
        let mut rows = Vec::new();
        let mut continuation: Option<RowKey> = None;
        loop {
            let page = self.scan(table, filter, continuation.as_ref()).await?;
            rows.extend(page.rows);
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => return Ok(rows),
            }
        }
    }
}
