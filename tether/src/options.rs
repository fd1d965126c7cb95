use std::time::Duration;

use crate::error::LockError;

pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(20);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RENEW_ATTEMPTS: usize = 3;
/// Longest lease accepted. Expiries must stay representable as unix
/// nanoseconds in an `i64`.
pub const MAX_LEASE_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Per-acquisition settings. Anything left unset falls back to the client's
/// defaults.
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    lease_duration: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    max_wait: Option<Duration>,
    retry_interval: Option<Duration>,
    fail_fast: bool,
    payload: Option<Vec<u8>>,
    delete_on_release: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            lease_duration: None,
            heartbeat_interval: None,
            max_wait: None,
            retry_interval: None,
            fail_fast: false,
            payload: None,
            delete_on_release: true,
        }
    }
}

impl AcquireOptions {
    pub fn new() -> AcquireOptions {
        AcquireOptions::default()
    }

    /// How long the lease stays valid without a heartbeat.
    pub fn lease_duration(mut self, d: Duration) -> AcquireOptions {
        self.lease_duration = Some(d);
        self
    }

    /// Renewal cadence. Must be shorter than the lease; a third of it is a
    /// good starting point.
    pub fn heartbeat_interval(mut self, d: Duration) -> AcquireOptions {
        self.heartbeat_interval = Some(d);
        self
    }

    /// Total time to keep contending before giving up. Defaults to one lease
    /// duration. `Duration::MAX` waits indefinitely.
    pub fn max_wait(mut self, d: Duration) -> AcquireOptions {
        self.max_wait = Some(d);
        self
    }

    /// Upper bound of the pause between probes. Defaults to the heartbeat
    /// interval.
    pub fn retry_interval(mut self, d: Duration) -> AcquireOptions {
        self.retry_interval = Some(d);
        self
    }

    /// Probe once and fail immediately if the lock is held.
    pub fn fail_fast(mut self, v: bool) -> AcquireOptions {
        self.fail_fast = v;
        self
    }

    pub fn payload(mut self, data: Vec<u8>) -> AcquireOptions {
        self.payload = Some(data);
        self
    }

    /// Whether release deletes the record (default) or leaves it behind
    /// already expired.
    pub fn delete_on_release(mut self, v: bool) -> AcquireOptions {
        self.delete_on_release = v;
        self
    }

    pub(crate) fn take_payload(&mut self) -> Option<Vec<u8>> {
        self.payload.take()
    }

    pub(crate) fn resolve(&self, defaults: &ClientDefaults) -> Result<LeaseSettings, LockError> {
        let lease_duration = self.lease_duration.unwrap_or(defaults.lease_duration);
        let heartbeat_interval = self
            .heartbeat_interval
            .unwrap_or(defaults.heartbeat_interval);
        let settings = LeaseSettings {
            lease_duration,
            heartbeat_interval,
            max_wait: self.max_wait.unwrap_or(lease_duration),
            retry_interval: self.retry_interval.unwrap_or(heartbeat_interval),
            fail_fast: self.fail_fast,
            delete_on_release: self.delete_on_release,
            renew_attempts: defaults.renew_attempts,
        };

        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ClientDefaults {
    pub(crate) lease_duration: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) renew_attempts: usize,
}

impl Default for ClientDefaults {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            renew_attempts: DEFAULT_RENEW_ATTEMPTS,
        }
    }
}

/// Effective, validated settings of one acquisition and its lease.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeaseSettings {
    pub(crate) lease_duration: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) max_wait: Duration,
    pub(crate) retry_interval: Duration,
    pub(crate) fail_fast: bool,
    pub(crate) delete_on_release: bool,
    pub(crate) renew_attempts: usize,
}

impl LeaseSettings {
    fn validate(&self) -> Result<(), LockError> {
        let invalid = |msg: String| Err(LockError::InvalidConfiguration(msg));
        if self.lease_duration.is_zero() {
            return invalid("lease duration must be positive".to_string());
        }

        if self.lease_duration > MAX_LEASE_DURATION {
            return invalid(format!(
                "lease duration {:?} exceeds {:?}",
                self.lease_duration, MAX_LEASE_DURATION
            ));
        }

        if self.heartbeat_interval.is_zero() {
            return invalid("heartbeat interval must be positive".to_string());
        }

        if self.heartbeat_interval >= self.lease_duration {
            return invalid(format!(
                "heartbeat interval {:?} must be shorter than lease duration {:?}",
                self.heartbeat_interval, self.lease_duration
            ));
        }

        if self.retry_interval.is_zero() {
            return invalid("retry interval must be positive".to_string());
        }

        if self.renew_attempts == 0 {
            return invalid("renew attempts must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_client_defaults() {
        let s = AcquireOptions::new().resolve(&ClientDefaults::default()).unwrap();
        assert_eq!(s.lease_duration, DEFAULT_LEASE_DURATION);
        assert_eq!(s.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(s.max_wait, DEFAULT_LEASE_DURATION);
        assert_eq!(s.retry_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert!(!s.fail_fast);
        assert!(s.delete_on_release);
    }

    #[test]
    fn overrides_win() {
        let s = AcquireOptions::new()
            .lease_duration(Duration::from_secs(3))
            .heartbeat_interval(Duration::from_secs(1))
            .max_wait(Duration::from_secs(9))
            .retry_interval(Duration::from_millis(250))
            .fail_fast(true)
            .delete_on_release(false)
            .resolve(&ClientDefaults::default())
            .unwrap();
        assert_eq!(s.lease_duration, Duration::from_secs(3));
        assert_eq!(s.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(s.max_wait, Duration::from_secs(9));
        assert_eq!(s.retry_interval, Duration::from_millis(250));
        assert!(s.fail_fast);
        assert!(!s.delete_on_release);
    }

    #[test]
    fn heartbeat_must_be_shorter_than_lease() {
        let defaults = ClientDefaults::default();
        for hb in [Duration::from_secs(3), Duration::from_secs(4)] {
            let err = AcquireOptions::new()
                .lease_duration(Duration::from_secs(3))
                .heartbeat_interval(hb)
                .resolve(&defaults)
                .unwrap_err();
            assert!(matches!(err, LockError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn zero_durations_are_rejected() {
        let defaults = ClientDefaults::default();
        let cases = [
            AcquireOptions::new().lease_duration(Duration::ZERO),
            AcquireOptions::new().heartbeat_interval(Duration::ZERO),
            AcquireOptions::new().retry_interval(Duration::ZERO),
        ];
        for opts in cases {
            assert!(matches!(
                opts.resolve(&defaults),
                Err(LockError::InvalidConfiguration(_))
            ));
        }

        let no_retries = ClientDefaults {
            renew_attempts: 0,
            ..ClientDefaults::default()
        };
        assert!(AcquireOptions::new().resolve(&no_retries).is_err());
    }

    #[test]
    fn oversized_lease_is_rejected() {
        let defaults = ClientDefaults::default();
        let err = AcquireOptions::new()
            .lease_duration(Duration::MAX)
            .resolve(&defaults)
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidConfiguration(_)));

        let s = AcquireOptions::new()
            .lease_duration(MAX_LEASE_DURATION)
            .max_wait(Duration::MAX)
            .resolve(&defaults)
            .unwrap();
        assert_eq!(s.max_wait, Duration::MAX);
    }
}
