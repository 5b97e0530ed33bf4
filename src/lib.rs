//! Distributed Partition Leasing Library
//!
//! Nodes divide a fixed space of logical partitions among themselves using lease
//! rows in a shared, conditionally-writable table store as the only coordination
//! medium. This crate is the library behind the node, table server and admin
//! binaries.
//!
//! ## Architecture Modules
//! - **`store`**: the row store adapter. An async `TableStore` trait with an
//!   in-memory implementation, an HTTP client, and axum handlers that serve any
//!   store over HTTP.
//! - **`partitioning`**: the lease engine. Lease cache, refresh cycle, and the
//!   participant and client APIs of `PartitioningService`.
//! - **`admin`**: out-of-band space creation, kicks, flags and diagnostics.
//! - **`config`** / **`error`**: participant configuration and library errors.

pub mod admin;
pub mod config;
pub mod error;
pub mod partitioning;
pub mod store;
