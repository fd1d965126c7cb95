use std::sync::Arc;
use std::time::Duration;

use crate::client::LockClient;
use crate::error::LockError;
use crate::handle::{LockHandle, ReleaseOutcome};
use crate::options::AcquireOptions;
use crate::store::LeaseStore;

/// A client and one held lock in a single value, for callers that only ever
/// need one lock.
#[derive(Debug)]
pub struct DistributedLock {
    client: LockClient,
    handle: LockHandle,
}

impl DistributedLock {
    /// Creates a dedicated client and acquires `name`, waiting up to three
    /// lease durations for it.
    pub async fn acquire(
        store: Arc<dyn LeaseStore>,
        name: &str,
        lease_duration: Duration,
        heartbeat_interval: Duration,
    ) -> Result<DistributedLock, LockError> {
        let client = LockClient::builder(store)
            .lease_duration(lease_duration)
            .heartbeat_interval(heartbeat_interval)
            .build();
        DistributedLock::acquire_with(client, name).await
    }

    /// Same as [`acquire`](DistributedLock::acquire) with a preconfigured
    /// client, which the lock then owns.
    pub async fn acquire_with(client: LockClient, name: &str) -> Result<DistributedLock, LockError> {
        let lease = client.defaults().lease_duration;
        let handle = client
            .acquire(name, AcquireOptions::new().max_wait(lease.saturating_mul(3)))
            .await?;
        Ok(DistributedLock { client, handle })
    }

    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }

    /// Releases the lock, then closes the client. Fails with `LockLost` if the
    /// lock had been taken over in the meantime.
    pub async fn release(self) -> Result<(), LockError> {
        let released = match self.handle.release().await {
            Ok(ReleaseOutcome::AlreadyLost) => Err(LockError::LockLost {
                name: self.handle.name().to_string(),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };

        let closed = self.client.close().await;
        released.and(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::store::MemoryLeaseStore;
    use crate::testing::TokioClock;
    use tokio::time::{Instant, sleep};

    fn client(store: &Arc<MemoryLeaseStore>, clock: &Arc<TokioClock>, owner: &str) -> LockClient {
        LockClient::builder(store.clone())
            .owner(owner.to_string())
            .clock(clock.clone())
            .lease_duration(Duration::from_secs(3))
            .heartbeat_interval(Duration::from_secs(1))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn second_process_waits_for_release() {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(MemoryLeaseStore::new());
        let clock = Arc::new(TokioClock::new());
        let (ca, cb) = (client(&store, &clock, "a"), client(&store, &clock, "b"));
        let start = Instant::now();

        let a = tokio::spawn(async move {
            let lock = DistributedLock::acquire_with(ca, "foo").await.unwrap();
            sleep(Duration::from_secs(8)).await;
            lock.release().await.unwrap();
            start.elapsed()
        });

        sleep(Duration::from_secs(1)).await;
        let lock = DistributedLock::acquire_with(cb, "foo").await.unwrap();
        let granted_at = start.elapsed();
        let released_at = a.await.unwrap();

        assert_eq!(lock.handle().owner(), "b");
        assert!(granted_at >= released_at, "{granted_at:?} < {released_at:?}");
        assert!(granted_at < Duration::from_secs(10), "{granted_at:?}");
        lock.release().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_process_times_out_while_held() {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(MemoryLeaseStore::new());
        let clock = Arc::new(TokioClock::new());
        let (ca, cb) = (client(&store, &clock, "a"), client(&store, &clock, "b"));
        let start = Instant::now();

        let a = tokio::spawn(async move {
            let lock = DistributedLock::acquire_with(ca, "foo").await.unwrap();
            sleep(Duration::from_secs(12)).await;
            assert!(lock.handle().is_valid());
            lock.release().await.unwrap();
        });

        sleep(Duration::from_secs(1)).await;
        let err = DistributedLock::acquire_with(cb, "foo").await.unwrap_err();
        let failed_at = start.elapsed();
        assert!(matches!(err, LockError::LockNotGranted { .. }), "{err:?}");
        assert!(failed_at >= Duration::from_secs(10), "{failed_at:?}");
        assert!(failed_at <= Duration::from_secs(11), "{failed_at:?}");

        // a still held it when b gave up.
        let rec = store.read("foo").await.unwrap().unwrap();
        assert_eq!(rec.owner, "a");
        assert!(!rec.is_stale(clock.now()));
        a.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn release_fails_when_lock_was_lost() {
        let store = Arc::new(MemoryLeaseStore::new());
        let clock = Arc::new(TokioClock::new());
        let lock = DistributedLock::acquire_with(client(&store, &clock, "a"), "foo")
            .await
            .unwrap();

        // Another process deletes the row behind our back.
        let rec = store.read("foo").await.unwrap().unwrap();
        assert!(store.delete_if_version("foo", rec.version).await.unwrap().is_applied());

        assert!(matches!(lock.release().await, Err(LockError::LockLost { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_lease_is_rejected() {
        let store = Arc::new(MemoryLeaseStore::new());
        let client = LockClient::builder(store.clone())
            .lease_duration(Duration::MAX)
            .heartbeat_interval(Duration::from_secs(1))
            .build();
        let err = DistributedLock::acquire_with(client, "foo").await.unwrap_err();
        assert!(matches!(err, LockError::InvalidConfiguration(_)), "{err:?}");
        assert!(store.is_empty());
    }
}
