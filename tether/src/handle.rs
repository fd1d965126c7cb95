use log::*;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::LockError;
use crate::heartbeat;
use crate::options::LeaseSettings;
use crate::record::{LeaseRecord, Version};
use crate::store::{LeaseStore, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Active,
    Released,
    Lost,
}

impl Status {
    fn from_u8(v: u8) -> Status {
        match v {
            0 => Status::Active,
            1 => Status::Released,
            _ => Status::Lost,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Status::Active => 0,
            Status::Released => 1,
            Status::Lost => 2,
        }
    }
}

/// How a successful [`LockHandle::release`] went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The record was deleted, or marked expired, by this call.
    Released,
    /// Someone had already taken the lease over; there was nothing to free.
    AlreadyLost,
    /// An earlier release already finished. Nothing was sent to the store.
    AlreadyReleased,
}

/// State shared by a handle, its heartbeat task and the owning client.
pub(crate) struct Lease {
    pub(crate) name: String,
    pub(crate) owner: String,
    pub(crate) store: Arc<dyn LeaseStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: LeaseSettings,
    pub(crate) stop: Notify,
    record: Mutex<LeaseRecord>,
    status: AtomicU8,
    heartbeat: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Lease {
    /// Wraps a freshly granted record and starts renewing it.
    pub(crate) fn start(
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        settings: LeaseSettings,
        record: LeaseRecord,
    ) -> Arc<Lease> {
        let lease = Arc::new(Lease {
            name: record.name.clone(),
            owner: record.owner.clone(),
            store,
            clock,
            settings,
            stop: Notify::new(),
            record: Mutex::new(record),
            status: AtomicU8::new(Status::Active.as_u8()),
            heartbeat: tokio::sync::Mutex::new(None),
        });

        let task = tokio::spawn(heartbeat::run(Arc::clone(&lease)));
        // Nothing else can reach the slot yet.
        if let Ok(mut slot) = lease.heartbeat.try_lock() {
            *slot = Some(task);
        }
        lease
    }

    pub(crate) fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    fn swap_status(&self, to: Status) -> Status {
        Status::from_u8(self.status.swap(to.as_u8(), Ordering::AcqRel))
    }

    /// Active -> Lost. Returns false if the lease was already terminal.
    pub(crate) fn mark_lost(&self) -> bool {
        self.status
            .compare_exchange(
                Status::Active.as_u8(),
                Status::Lost.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn guard(&self) -> MutexGuard<'_, LeaseRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn record(&self) -> LeaseRecord {
        self.guard().clone()
    }

    pub(crate) fn set_record(&self, record: LeaseRecord) {
        *self.guard() = record;
    }

    fn is_valid(&self) -> bool {
        self.status() == Status::Active && !self.guard().is_stale(self.clock.now())
    }

    fn ensure_held(&self) -> Result<(), LockError> {
        match self.status() {
            Status::Released => Err(LockError::AlreadyReleased {
                name: self.name.clone(),
            }),
            Status::Lost => Err(LockError::LockLost {
                name: self.name.clone(),
            }),
            Status::Active if self.guard().is_stale(self.clock.now()) => Err(LockError::LockLost {
                name: self.name.clone(),
            }),
            Status::Active => Ok(()),
        }
    }

    pub(crate) async fn release(&self) -> Result<ReleaseOutcome, LockError> {
        // Held for the whole call so concurrent releases run one at a time.
        let mut heartbeat = self.heartbeat.lock().await;
        if let Some(task) = heartbeat.take() {
            self.stop.notify_one();
            if let Err(e) = task.await {
                error!("heartbeat name={} ended abnormally: {e}", self.name);
            }
        }

        let record = self.record();
        match self.swap_status(Status::Released) {
            Status::Released => return Ok(ReleaseOutcome::AlreadyReleased),
            Status::Lost => {
                // Renewals may have failed on transport errors while the row
                // is still ours; the version guard keeps this harmless.
                if self.settings.delete_on_release {
                    if let Err(e) = self.store.delete_if_version(&self.name, record.version).await {
                        debug!("cleanup name={} failed: {e}", self.name);
                    }
                }

                return Err(LockError::LockLost {
                    name: self.name.clone(),
                });
            }
            Status::Active => {}
        }

        let outcome = if self.settings.delete_on_release {
            self.store.delete_if_version(&self.name, record.version).await
        } else {
            let expired = record.expired(self.clock.now());
            self.store.update_if_version(record.version, &expired).await
        };

        match outcome {
            Ok(WriteOutcome::Applied) => {
                info!(
                    "released name={}, owner={}, version={}",
                    self.name, self.owner, record.version
                );
                Ok(ReleaseOutcome::Released)
            }
            Ok(WriteOutcome::Conflict) => {
                warn!(
                    "name={} was taken over before release, owner={}",
                    self.name, self.owner
                );
                Ok(ReleaseOutcome::AlreadyLost)
            }
            Err(e) => {
                error!("release name={} failed: {e}", self.name);
                Err(LockError::BackendUnavailable(e))
            }
        }
    }
}

/// A granted lock. Its lease is renewed in the background until
/// [`release`](LockHandle::release) is called or a renewal discovers the
/// lease was lost.
///
/// Dropping a handle without releasing it releases it on a background task.
/// Outside a tokio runtime the renewals just stop and the record lapses at
/// `expires_at`.
pub struct LockHandle {
    lease: Arc<Lease>,
}

impl LockHandle {
    pub(crate) fn new(lease: Arc<Lease>) -> Self {
        Self { lease }
    }

    pub fn name(&self) -> &str {
        &self.lease.name
    }

    pub fn owner(&self) -> &str {
        &self.lease.owner
    }

    /// Current fencing token. Grows with every renewal and across holders.
    pub fn version(&self) -> Version {
        self.lease.guard().version
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.lease.guard().expires_at
    }

    pub fn payload(&self) -> Option<Vec<u8>> {
        self.lease.guard().payload.clone()
    }

    /// Last record this handle wrote.
    pub fn record(&self) -> LeaseRecord {
        self.lease.record()
    }

    /// Whether the lease is still held and not past its expiry.
    pub fn is_valid(&self) -> bool {
        self.lease.is_valid()
    }

    /// Fails with `LockLost` or `AlreadyReleased` when exclusivity can no
    /// longer be trusted.
    pub fn ensure_held(&self) -> Result<(), LockError> {
        self.lease.ensure_held()
    }

    /// Stops the heartbeat and deletes the record. Safe to call more than
    /// once; only the first call touches the store.
    ///
    /// Returns `LockLost` if the heartbeat had already found the lease taken.
    pub async fn release(&self) -> Result<ReleaseOutcome, LockError> {
        self.lease.release().await
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.lease.status() != Status::Active {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                debug!(
                    "handle name={} dropped without release, releasing in background",
                    self.lease.name
                );
                let lease = Arc::clone(&self.lease);
                rt.spawn(async move {
                    if let Err(e) = lease.release().await {
                        warn!("background release name={} failed: {e}", lease.name);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "handle name={} dropped outside a runtime, lease will lapse",
                    self.lease.name
                );
                self.lease.stop.notify_one();
            }
        }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("name", &self.lease.name)
            .field("owner", &self.lease.owner)
            .field("status", &self.lease.status())
            .field("record", &self.lease.record())
            .finish()
    }
}
