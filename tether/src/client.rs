use log::*;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use uuid::Uuid;

use crate::acquire::Contender;
use crate::clock::{Clock, SystemClock};
use crate::error::LockError;
use crate::handle::{Lease, LockHandle, ReleaseOutcome};
use crate::options::{AcquireOptions, ClientDefaults};
use crate::record::{LeaseRecord, Version};
use crate::store::LeaseStore;

/// Mints lock handles against one lease store.
pub struct LockClient {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    owner: String,
    defaults: ClientDefaults,
    leases: Mutex<Vec<Weak<Lease>>>,
    closed: AtomicBool,
}

impl LockClient {
    pub fn builder(store: Arc<dyn LeaseStore>) -> LockClientBuilder {
        LockClientBuilder::new(store)
    }

    /// Identity written into every record this client creates.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn defaults(&self) -> &ClientDefaults {
        &self.defaults
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Contends for `name` until granted or until `options` say to give up.
    pub async fn acquire(
        &self,
        name: &str,
        mut options: AcquireOptions,
    ) -> Result<LockHandle, LockError> {
        if self.is_closed() {
            return Err(LockError::ClientClosed);
        }

        let settings = options.resolve(&self.defaults)?;
        let contender = Contender {
            store: self.store.as_ref(),
            clock: self.clock.as_ref(),
            owner: &self.owner,
            name,
            payload: options.take_payload(),
            settings,
        };

        let record = contender.acquire().await?;
        let lease = Lease::start(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            settings,
            record,
        );
        let handle = LockHandle::new(Arc::clone(&lease));

        let registered = {
            let mut leases = self.leases();
            if self.is_closed() {
                false
            } else {
                leases.retain(|l| l.strong_count() > 0);
                leases.push(Arc::downgrade(&lease));
                true
            }
        };

        if !registered {
            // close() ran while we were contending.
            if let Err(e) = handle.release().await {
                warn!("release name={name} after close failed: {e}");
            }
            return Err(LockError::ClientClosed);
        }

        Ok(handle)
    }

    /// Current record stored under `name`, whoever holds it.
    pub async fn get(&self, name: &str) -> Result<Option<LeaseRecord>, LockError> {
        Ok(self.store.read(name).await?)
    }

    /// Runs `f` while holding `name` and releases afterwards. `f` receives
    /// the fencing token of the grant.
    ///
    /// Fails with `LockLost` if the lease was lost before `f` finished. If `f`
    /// panics or the returned future is dropped, the lock is released in the
    /// background.
    pub async fn with_lock<F, Fut, T>(
        &self,
        name: &str,
        options: AcquireOptions,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce(Version) -> Fut,
        Fut: Future<Output = T>,
    {
        let handle = self.acquire(name, options).await?;
        let out = f(handle.version()).await;
        match handle.release().await? {
            ReleaseOutcome::AlreadyLost => Err(LockError::LockLost {
                name: name.to_string(),
            }),
            ReleaseOutcome::Released | ReleaseOutcome::AlreadyReleased => Ok(out),
        }
    }

    /// Releases every handle still held through this client. Later
    /// acquisitions fail with `ClientClosed`. Returns the first release error.
    pub async fn close(&self) -> Result<(), LockError> {
        let leases = {
            let mut leases = self.leases();
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *leases)
        };

        let mut first_err = None;
        for lease in leases.iter().filter_map(Weak::upgrade) {
            match lease.release().await {
                Ok(ReleaseOutcome::AlreadyLost) => {
                    warn!("close: name={} was already taken over", lease.name)
                }
                Ok(_) => {}
                Err(e) => {
                    error!("close: release name={} failed: {e}", lease.name);
                    first_err.get_or_insert(e);
                }
            }
        }

        info!("closed owner={}", self.owner);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn leases(&self) -> MutexGuard<'_, Vec<Weak<Lease>>> {
        self.leases.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for LockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockClient")
            .field("owner", &self.owner)
            .field("defaults", &self.defaults)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

pub struct LockClientBuilder {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    owner: String,
    defaults: ClientDefaults,
}

impl LockClientBuilder {
    pub fn new(store: Arc<dyn LeaseStore>) -> LockClientBuilder {
        LockClientBuilder {
            store,
            clock: Arc::new(SystemClock),
            owner: Uuid::new_v4().to_string(),
            defaults: ClientDefaults::default(),
        }
    }

    /// Defaults to a random UUID.
    pub fn owner(mut self, id: String) -> LockClientBuilder {
        self.owner = id;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> LockClientBuilder {
        self.clock = clock;
        self
    }

    pub fn lease_duration(mut self, d: Duration) -> LockClientBuilder {
        self.defaults.lease_duration = d;
        self
    }

    pub fn heartbeat_interval(mut self, d: Duration) -> LockClientBuilder {
        self.defaults.heartbeat_interval = d;
        self
    }

    /// Renewal attempts in a row that may fail on backend errors before a
    /// lease is given up as lost.
    pub fn renew_attempts(mut self, n: usize) -> LockClientBuilder {
        self.defaults.renew_attempts = n;
        self
    }

    pub fn build(self) -> LockClient {
        info!(
            "owner={}, lease={:?}, heartbeat={:?}",
            self.owner, self.defaults.lease_duration, self.defaults.heartbeat_interval
        );

        LockClient {
            store: self.store,
            clock: self.clock,
            owner: self.owner,
            defaults: self.defaults,
            leases: Mutex::new(vec![]),
            closed: AtomicBool::new(false),
        }
    }
}
