//! Partition Leasing
//!
//! Cooperating nodes divide a fixed space of partitions among themselves using
//! lease rows in the shared table store. Nodes never talk to each other.
//!
//! ## Core Concepts
//! - **Lease**: a node's cached belief about one partition row. `held` is true
//!   iff this node's last conditional write against the row succeeded and has
//!   not since been invalidated by another writer.
//! - **Staleness**: measured on the local monotonic clock from the moment a
//!   row's concurrency token was last seen to change, never from store time.
//! - **Refresh cycle**: the only driver of state change. Scans, classifies,
//!   sweeps, then applies losses, acquisitions, renewals and deletions.
//!
//! ## Safety
//! Acquisition is a race settled by the store: of several nodes writing with
//! the same token, exactly one succeeds. A held lease whose token changed for
//! any reason is treated as lost, even if the write might have been ours.
//!
//! ## Liveness
//! A partition whose holder stops renewing becomes acquirable elsewhere within
//! `lease_validity + acquire_older_than + heartbeat`.

pub mod cache;
pub mod callbacks;
pub mod cycle;
pub mod service;
pub mod types;


pub use callbacks::{NoopCallbacks, ParticipantCallbacks};
pub use cycle::CycleReport;
pub use service::PartitioningService;
pub use types::{NodeId, PartitionId};
