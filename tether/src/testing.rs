use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::{Instant, sleep};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::record::{LeaseRecord, Version};
use crate::store::{LeaseStore, MemoryLeaseStore, WriteOutcome};

/// Wall clock that follows tokio's (pausable) time.
#[derive(Debug, Clone)]
pub(crate) struct TokioClock {
    base: OffsetDateTime,
    start: Instant,
}

impl TokioClock {
    pub(crate) fn new() -> Self {
        Self {
            base: OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            start: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> OffsetDateTime {
        self.base + self.start.elapsed()
    }
}

/// Memory store that counts calls and fails or hides on demand. The `fail_*`
/// and `hide_reads` counters are consumed one call at a time; `slow_*` delay
/// every call by that many milliseconds.
#[derive(Debug, Default)]
pub(crate) struct CountingStore {
    pub(crate) inner: MemoryLeaseStore,
    pub(crate) reads: AtomicUsize,
    pub(crate) creates: AtomicUsize,
    pub(crate) updates: AtomicUsize,
    pub(crate) deletes: AtomicUsize,
    pub(crate) fail_reads: AtomicUsize,
    pub(crate) fail_updates: AtomicUsize,
    pub(crate) fail_deletes: AtomicUsize,
    pub(crate) hide_reads: AtomicUsize,
    pub(crate) slow_reads: AtomicU64,
    pub(crate) slow_updates: AtomicU64,
}

impl CountingStore {
    pub(crate) fn writes(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    /// Replaces the stored record as another process would after a takeover.
    pub(crate) async fn hijack(&self, name: &str, owner: &str) -> LeaseRecord {
        let current = self.inner.read(name).await.unwrap().unwrap();
        let mut next = current.clone();
        next.owner = owner.to_string();
        next.version = Version::new(current.version.get() + 1000);
        assert!(
            self.inner
                .update_if_version(current.version, &next)
                .await
                .unwrap()
                .is_applied()
        );
        next
    }
}

fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn delay(millis: &AtomicU64) {
    let ms = millis.load(Ordering::SeqCst);
    if ms > 0 {
        sleep(Duration::from_millis(ms)).await;
    }
}

fn injected() -> StoreError {
    StoreError::Unavailable(anyhow::anyhow!("injected failure"))
}

#[async_trait]
impl LeaseStore for CountingStore {
    async fn read(&self, name: &str) -> Result<Option<LeaseRecord>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        delay(&self.slow_reads).await;
        if take(&self.fail_reads) {
            return Err(injected());
        }

        if take(&self.hide_reads) {
            return Ok(None);
        }

        self.inner.read(name).await
    }

    async fn create_if_absent(&self, record: &LeaseRecord) -> Result<WriteOutcome, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_if_absent(record).await
    }

    async fn update_if_version(
        &self,
        expected: Version,
        record: &LeaseRecord,
    ) -> Result<WriteOutcome, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        delay(&self.slow_updates).await;
        if take(&self.fail_updates) {
            return Err(injected());
        }

        self.inner.update_if_version(expected, record).await
    }

    async fn delete_if_version(
        &self,
        name: &str,
        expected: Version,
    ) -> Result<WriteOutcome, StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if take(&self.fail_deletes) {
            return Err(injected());
        }

        self.inner.delete_if_version(name, expected).await
    }
}
