//! Multi-instance work queue over a shared JSON file
//!
//! Lets N worker processes pull disjoint batches of pending video ids from
//! one manifest without double-processing. Every read-modify-write of the
//! queue file happens under an exclusive advisory lock; crashed workers are
//! detected by heartbeat age and their leases returned to pending.

pub mod coordinator;
pub mod lock;
pub mod state;

pub use coordinator::QueueCoordinator;
pub use lock::PathLock;
pub use state::{InstanceInfo, QueueBuckets, QueueFile, RecordBookkeeping};
