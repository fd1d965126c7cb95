use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

/// Fencing token carried by every write to a lease record.
///
/// Tokens only move forward along one record's history. A record's first
/// token is seeded from the wall clock, so a record recreated after a delete
/// does not hand out a token from its previous life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    pub const fn new(v: u64) -> Self {
        Version(v)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn initial(now: OffsetDateTime) -> Self {
        let nanos = now.unix_timestamp_nanos().clamp(1, u64::MAX as i128);
        Version(nanos as u64)
    }

    pub(crate) fn next(self, now: OffsetDateTime) -> Self {
        Version(self.0.saturating_add(1).max(Version::initial(now).0))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The durable state of one lock, stored under its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    pub name: String,
    pub owner: String,
    pub version: Version,
    pub expires_at: OffsetDateTime,
    pub payload: Option<Vec<u8>>,
}

impl LeaseRecord {
    /// A stale record still exists but anyone may take it over.
    pub fn is_stale(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Time left before the record goes stale, `None` if it already has.
    pub fn remaining(&self, now: OffsetDateTime) -> Option<Duration> {
        if self.is_stale(now) {
            return None;
        }

        Duration::try_from(self.expires_at - now).ok()
    }

    pub(crate) fn claim(
        name: &str,
        owner: &str,
        payload: Option<Vec<u8>>,
        now: OffsetDateTime,
        lease: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            owner: owner.to_string(),
            version: Version::initial(now),
            expires_at: now + lease,
            payload,
        }
    }

    pub(crate) fn take_over(
        &self,
        owner: &str,
        payload: Option<Vec<u8>>,
        now: OffsetDateTime,
        lease: Duration,
    ) -> Self {
        Self {
            name: self.name.clone(),
            owner: owner.to_string(),
            version: self.version.next(now),
            expires_at: now + lease,
            payload,
        }
    }

    pub(crate) fn renewed(&self, now: OffsetDateTime, lease: Duration) -> Self {
        Self {
            version: self.version.next(now),
            expires_at: now + lease,
            ..self.clone()
        }
    }

    pub(crate) fn expired(&self, now: OffsetDateTime) -> Self {
        Self {
            version: self.version.next(now),
            expires_at: now,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn stale_at_expiry_boundary() {
        let now = epoch();
        let rec = LeaseRecord::claim("foo", "a", None, now, Duration::from_secs(3));
        assert!(!rec.is_stale(now));
        assert!(!rec.is_stale(now + Duration::from_millis(2999)));
        assert!(rec.is_stale(now + Duration::from_secs(3)));
        assert_eq!(rec.remaining(now), Some(Duration::from_secs(3)));
        assert_eq!(rec.remaining(now + Duration::from_secs(5)), None);
    }

    #[test]
    fn versions_only_move_forward() {
        let now = epoch();
        let v = Version::initial(now);
        assert!(v.next(now) > v);

        // A clock that went backwards still cannot rewind the token.
        let earlier = now - Duration::from_secs(60);
        assert_eq!(v.next(earlier), Version::new(v.get() + 1));

        // A record recreated later starts above the old history.
        let later = now + Duration::from_secs(1);
        assert!(Version::initial(later) > v.next(now));
    }

    #[test]
    fn take_over_replaces_owner_and_payload() {
        let now = epoch();
        let rec = LeaseRecord::claim("foo", "a", Some(b"x".to_vec()), now, Duration::from_secs(3));
        let later = now + Duration::from_secs(4);
        let taken = rec.take_over("b", None, later, Duration::from_secs(3));
        assert_eq!(taken.name, "foo");
        assert_eq!(taken.owner, "b");
        assert_eq!(taken.payload, None);
        assert!(taken.version > rec.version);
        assert_eq!(taken.expires_at, later + Duration::from_secs(3));
    }

    #[test]
    fn renew_keeps_owner() {
        let now = epoch();
        let rec = LeaseRecord::claim("foo", "a", Some(b"x".to_vec()), now, Duration::from_secs(3));
        let renewed = rec.renewed(now + Duration::from_secs(1), Duration::from_secs(3));
        assert_eq!(renewed.owner, "a");
        assert_eq!(renewed.payload.as_deref(), Some(&b"x"[..]));
        assert!(renewed.expires_at > rec.expires_at);

        let expired = renewed.expired(now + Duration::from_secs(2));
        assert!(expired.is_stale(now + Duration::from_secs(2)));
        assert!(expired.version > renewed.version);
    }
}
