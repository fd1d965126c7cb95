use log::*;
use scopeguard::ScopeGuard;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};

use crate::error::StoreError;
use crate::handle::{Lease, Status};
use crate::store::WriteOutcome;

enum Renewal {
    Renewed,
    Stopped,
    Lost,
}

/// Renews `lease` every heartbeat interval until told to stop or until a
/// renewal shows the lease is gone.
pub(crate) async fn run(lease: Arc<Lease>) {
    let period = lease.settings.heartbeat_interval;
    info!(
        "heartbeat name={}, owner={}, period={:?}, lease={:?}",
        lease.name, lease.owner, period, lease.settings.lease_duration
    );

    // Dropped mid-flight (panic, runtime shutdown): nobody renews any more.
    let guard = scopeguard::guard(Arc::clone(&lease), |lease| {
        if lease.mark_lost() {
            error!("heartbeat name={} aborted, lease presumed lost", lease.name);
        }
    });

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = lease.stop.notified() => break,
            _ = ticker.tick() => {}
        }

        if lease.status() != Status::Active {
            break;
        }

        match renew(&lease).await {
            Renewal::Renewed => {}
            Renewal::Stopped | Renewal::Lost => break,
        }
    }

    let _ = ScopeGuard::into_inner(guard);
    debug!("heartbeat name={} stopped", lease.name);
}

async fn renew(lease: &Lease) -> Renewal {
    let current = lease.record();
    let mut failures = 0;
    loop {
        // Never trust the lease past its expiry, however many attempts remain.
        let Some(remaining) = current.remaining(lease.clock.now()) else {
            error!(
                "renew name={} did not succeed before expiry, lock presumed lost",
                lease.name
            );
            lease.mark_lost();
            return Renewal::Lost;
        };

        let start = Instant::now();
        let renewed = current.renewed(lease.clock.now(), lease.settings.lease_duration);
        let write = lease.store.update_if_version(current.version, &renewed);
        let res = match timeout(remaining, write).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::TimedOut(remaining)),
        };

        match res {
            Ok(WriteOutcome::Applied) => {
                debug!(
                    "renewed name={}, version={}, took {:?}",
                    lease.name,
                    renewed.version,
                    start.elapsed()
                );
                lease.set_record(renewed);
                return Renewal::Renewed;
            }
            Ok(WriteOutcome::Conflict) => {
                error!(
                    "name={} taken over, owner={} lost the lock",
                    lease.name, lease.owner
                );
                lease.mark_lost();
                return Renewal::Lost;
            }
            Err(e) => {
                failures += 1;
                if failures >= lease.settings.renew_attempts || current.is_stale(lease.clock.now()) {
                    error!(
                        "renew name={} failed {failures} time(s), lock presumed lost: {e}",
                        lease.name
                    );
                    lease.mark_lost();
                    return Renewal::Lost;
                }

                warn!("renew name={} attempt {failures} failed: {e}", lease.name);
                tokio::select! {
                    _ = lease.stop.notified() => return Renewal::Stopped,
                    _ = sleep(lease.settings.heartbeat_interval / 4) => {}
                }
            }
        }
    }
}
