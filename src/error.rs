//! Library error types.
//!
//! Store-level failures are `StoreError` (see `store::types`); everything the
//! participant and admin surfaces can return is a `PartitioningError`.

use crate::store::types::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PartitioningError {
    /// Participant API used before `start()` completed its startup check.
    #[error("partitioning service is not initialized")]
    NotInitialized,

    /// The backing table or its `Control/Created` marker row is missing.
    #[error("partition space {table} has not been created")]
    SpaceNotCreated { table: String },

    #[error("partition space {table} already exists")]
    SpaceAlreadyExists { table: String },

    #[error("partition {0} not found")]
    PartitionNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PartitioningError>;
