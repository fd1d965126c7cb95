use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::{LeaseRecord, Version};

mod memory;
mod spanner;

pub use memory::MemoryLeaseStore;
pub use spanner::SpannerLeaseStore;

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Someone else changed the record since it was read.
    Conflict,
}

impl WriteOutcome {
    pub fn is_applied(self) -> bool {
        self == WriteOutcome::Applied
    }
}

/// Conditionally-writable storage for lease records. Every method must be
/// atomic at the backend.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<Option<LeaseRecord>, StoreError>;

    /// Writes `record` only if no record exists under its name.
    async fn create_if_absent(&self, record: &LeaseRecord) -> Result<WriteOutcome, StoreError>;

    /// Replaces the record under `record.name` only if its stored version is
    /// still `expected`.
    async fn update_if_version(
        &self,
        expected: Version,
        record: &LeaseRecord,
    ) -> Result<WriteOutcome, StoreError>;

    async fn delete_if_version(
        &self,
        name: &str,
        expected: Version,
    ) -> Result<WriteOutcome, StoreError>;
}
