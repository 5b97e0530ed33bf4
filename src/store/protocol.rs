//! Table Store Network Protocol
//!
//! Defines the API endpoints and Data Transfer Objects (DTOs) used by
//! `HttpTableStore` to talk to a table server.
//!
//! These structures are serialized as JSON and sent over HTTP. Status codes carry
//! the error taxonomy: `412` is an optimistic-concurrency conflict, `404` a
//! missing table, `400` a malformed request.

use super::types::*;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Prefix of every table endpoint; followed by `/{table}`.
pub const ENDPOINT_TABLES: &str = "/tables";
/// Suffix for paged scans.
pub const ENDPOINT_SCAN: &str = "/scan";
/// Suffix for insert-if-absent.
pub const ENDPOINT_INSERT: &str = "/insert";
/// Suffix for conditional replace.
pub const ENDPOINT_REPLACE: &str = "/replace";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTableResponse {
    /// `false` if the table already existed.
    pub created: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteTableResponse {
    /// `false` if the table did not exist.
    pub deleted: bool,
}

/// Request for one page of a scan.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanRequest {
    pub filter: KeyFilter,
    /// Last key of the previous page, if any.
    pub continuation: Option<RowKey>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub rows: Vec<Row>,
    pub continuation: Option<RowKey>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InsertRowRequest {
    pub key: RowKey,
    pub properties: Properties,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InsertRowResponse {
    /// `None` if a row with this key already existed.
    pub token: Option<ConcurrencyToken>,
}

/// Conditional replace of an existing row.
///
/// `token` may be the wildcard `*` for an unconditional replace.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplaceRowRequest {
    pub key: RowKey,
    pub token: ConcurrencyToken,
    pub properties: Properties,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplaceRowResponse {
    pub token: ConcurrencyToken,
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// The row involved, for conflicts.
    pub key: Option<RowKey>,
}
