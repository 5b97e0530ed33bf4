//! Admin Protocol
//!
//! Out-of-band writes to the partition rows, consumed by the refresh cycle on
//! every node through ordinary scans. There is no side channel.
//!
//! - **create / delete space**: lay down (or remove) the table, one row per
//!   partition, and the control rows nodes read at startup.
//! - **kick**: take a partition away from its holder, optionally excluding a
//!   node from re-acquiring it.
//! - **invalidate / allow**: toggle the flags the classification honors.
//! - **snapshot / detect_stale**: read-only diagnostics.

pub mod service;
pub mod types;


pub use service::PartitionAdmin;
pub use types::{PartitionSnapshot, SpaceLayout};
