//! Lease-based distributed locks on top of any store that supports
//! conditional writes.
//!
//! A lock is a record keyed by name holding the owner, a version and an
//! expiry. Holders keep their record fresh with heartbeats; contenders may
//! take over a record once it has gone stale. The record version doubles as a
//! fencing token.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether_rs::{AcquireOptions, LockClient, MemoryLeaseStore};
//!
//! # async fn demo() -> Result<(), tether_rs::LockError> {
//! let client = LockClient::builder(Arc::new(MemoryLeaseStore::new()))
//!     .lease_duration(Duration::from_secs(10))
//!     .heartbeat_interval(Duration::from_secs(2))
//!     .build();
//!
//! let handle = client.acquire("jobs", AcquireOptions::new()).await?;
//! handle.ensure_held()?;
//! handle.release().await?;
//! client.close().await
//! # }
//! ```

mod acquire;
mod client;
mod clock;
mod error;
mod handle;
mod heartbeat;
mod lock;
mod options;
mod record;
mod store;

#[cfg(test)]
mod testing;

pub use client::{LockClient, LockClientBuilder};
pub use clock::{Clock, SystemClock};
pub use error::{LockError, StoreError};
pub use handle::{LockHandle, ReleaseOutcome};
pub use lock::DistributedLock;
pub use options::{
    AcquireOptions, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_LEASE_DURATION, DEFAULT_RENEW_ATTEMPTS,
    MAX_LEASE_DURATION,
};
pub use record::{LeaseRecord, Version};
pub use store::{LeaseStore, MemoryLeaseStore, SpannerLeaseStore, WriteOutcome};
