use exp_backoff::BackoffBuilder;
use log::*;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};

use crate::clock::Clock;
use crate::error::{LockError, StoreError};
use crate::options::LeaseSettings;
use crate::record::LeaseRecord;
use crate::store::{LeaseStore, WriteOutcome};

/// Outcome of a single read-then-conditional-write round.
#[derive(Debug)]
pub(crate) enum Probe {
    Granted(LeaseRecord),
    /// Held by someone else, or a concurrent contender won the write.
    Contended { holder: Option<String> },
}

pub(crate) struct Contender<'a> {
    pub(crate) store: &'a dyn LeaseStore,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) owner: &'a str,
    pub(crate) name: &'a str,
    pub(crate) payload: Option<Vec<u8>>,
    pub(crate) settings: LeaseSettings,
}

impl Contender<'_> {
    /// Probes until granted, contention outlasts `max_wait`, or (fail-fast)
    /// the first probe does not win. Nothing is left in the store on failure.
    pub(crate) async fn acquire(&self) -> Result<LeaseRecord, LockError> {
        let start = Instant::now();
        // None: wait indefinitely.
        let deadline = start.checked_add(self.settings.max_wait);
        let mut attempt: u32 = 0;
        loop {
            let failure = match self.bounded_probe(deadline).await {
                Ok(Probe::Granted(record)) => {
                    info!(
                        "acquired name={}, owner={}, version={}, attempts={}, took {:?}",
                        self.name,
                        self.owner,
                        record.version,
                        attempt + 1,
                        start.elapsed()
                    );
                    return Ok(record);
                }
                Ok(Probe::Contended { holder }) => LockError::LockNotGranted {
                    name: self.name.to_string(),
                    holder,
                },
                Err(e) => {
                    warn!("probe name={} failed: {e}", self.name);
                    LockError::BackendUnavailable(e)
                }
            };

            if self.settings.fail_fast {
                return Err(failure);
            }

            let now = Instant::now();
            let mut pause = backoff_pause(attempt, self.settings.retry_interval);
            if let Some(deadline) = deadline {
                if now >= deadline {
                    debug!(
                        "giving up name={} after {:?}, attempts={}",
                        self.name,
                        start.elapsed(),
                        attempt + 1
                    );
                    return Err(failure);
                }

                pause = pause.min(deadline - now);
            }

            debug!("name={} contended, pause for {:?}", self.name, pause);
            sleep(pause).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// One probe, cut off at the deadline. A probe always gets at least one
    /// retry interval, so the total wait overshoots `max_wait` by at most
    /// one backoff. Without a deadline the lease duration bounds it.
    async fn bounded_probe(&self, deadline: Option<Instant>) -> Result<Probe, StoreError> {
        let budget = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => self.settings.lease_duration,
        }
        .max(self.settings.retry_interval);

        match timeout(budget, self.probe()).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::TimedOut(budget)),
        }
    }

    pub(crate) async fn probe(&self) -> Result<Probe, StoreError> {
        let lease = self.settings.lease_duration;
        let now = self.clock.now();
        match self.store.read(self.name).await? {
            None => {
                let record =
                    LeaseRecord::claim(self.name, self.owner, self.payload.clone(), now, lease);
                Ok(match self.store.create_if_absent(&record).await? {
                    WriteOutcome::Applied => Probe::Granted(record),
                    WriteOutcome::Conflict => Probe::Contended { holder: None },
                })
            }
            Some(current) if current.is_stale(now) => {
                debug!(
                    "taking over stale name={}, from={}, version={}",
                    self.name, current.owner, current.version
                );
                let record = current.take_over(self.owner, self.payload.clone(), now, lease);
                Ok(
                    match self.store.update_if_version(current.version, &record).await? {
                        WriteOutcome::Applied => Probe::Granted(record),
                        WriteOutcome::Conflict => Probe::Contended { holder: None },
                    },
                )
            }
            Some(current) => Ok(Probe::Contended {
                holder: Some(current.owner),
            }),
        }
    }
}

/// Jittered pause in `[retry / 2, retry]`.
pub(crate) fn backoff_pause(attempt: u32, retry: Duration) -> Duration {
    // exp_backoff is unit-agnostic; feed it millis, read millis back.
    let max = (retry.as_millis() as u64).max(2);
    let min = max / 2;
    let mut bo = BackoffBuilder::new().initial_ns(min).max_ns(max).build();
    let mut pause = min;
    for _ in 0..=attempt.min(16) {
        pause = bo.pause();
    }

    Duration::from_millis(pause.clamp(min, max))
}
