//! Change detection against backend state fingerprints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque summary of backend state
///
/// `Unknown` never equals anything, itself included, so a tracker holding
/// it always reports a change. It is only the tracker's starting value;
/// backends report a missing key as `Absent`, which is stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Fingerprint {
    #[default]
    Unknown,
    /// Nothing is stored under the key
    Absent,
    /// Row or document count
    Count(u64),
    /// Last modification time
    Modified(DateTime<Utc>),
    /// Content tag, compared as an exact string
    Etag(String),
}

impl Fingerprint {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Fingerprint::Unknown)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Fingerprint::Absent)
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Fingerprint::Absent, Fingerprint::Absent) => true,
            (Fingerprint::Count(a), Fingerprint::Count(b)) => a == b,
            (Fingerprint::Modified(a), Fingerprint::Modified(b)) => a == b,
            (Fingerprint::Etag(a), Fingerprint::Etag(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Unknown => f.write_str("unknown"),
            Fingerprint::Absent => f.write_str("absent"),
            Fingerprint::Count(n) => write!(f, "count:{n}"),
            Fingerprint::Modified(ts) => write!(f, "modified:{}", ts.to_rfc3339()),
            Fingerprint::Etag(tag) => write!(f, "etag:{tag}"),
        }
    }
}

/// Observable state of a [`ChangeTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    Changed,
    Unchanged,
}

/// Per-connector cache of the last observed fingerprint
///
/// Starts in [`ChangeState::Changed`] with an unknown fingerprint.
#[derive(Debug, Clone)]
pub struct ChangeTracker {
    last: Fingerprint,
    state: ChangeState,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    pub fn new() -> Self {
        ChangeTracker {
            last: Fingerprint::Unknown,
            state: ChangeState::Changed,
        }
    }

    /// Compare a live probe with the stored fingerprint and record it
    ///
    /// Returns true when the probe differs or nothing comparable was stored.
    /// The one exception is a tracker acknowledged with `reset(false)` before
    /// its first probe: that probe becomes the baseline and reports unchanged.
    pub fn observe(&mut self, probe: Fingerprint) -> bool {
        let acknowledged = self.last.is_unknown() && self.state == ChangeState::Unchanged;
        let changed = if acknowledged && !probe.is_unknown() {
            false
        } else {
            self.last != probe
        };
        self.last = probe;
        self.state = if changed {
            ChangeState::Changed
        } else {
            ChangeState::Unchanged
        };
        changed
    }

    /// Force the observable state without probing
    pub fn reset(&mut self, changed: bool) {
        self.state = if changed {
            ChangeState::Changed
        } else {
            ChangeState::Unchanged
        };
    }

    pub fn state(&self) -> ChangeState {
        self.state
    }

    pub fn is_changed(&self) -> bool {
        self.state == ChangeState::Changed
    }

    pub fn last_fingerprint(&self) -> &Fingerprint {
        &self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unknown_never_matches() {
        assert_ne!(Fingerprint::Unknown, Fingerprint::Unknown);
        assert_ne!(Fingerprint::Unknown, Fingerprint::Count(0));
        assert_eq!(Fingerprint::Count(3), Fingerprint::Count(3));
        assert_ne!(Fingerprint::Count(3), Fingerprint::Etag("3".into()));
    }

    #[test]
    fn test_absent_is_stable() {
        assert_eq!(Fingerprint::Absent, Fingerprint::Absent);
        assert_ne!(Fingerprint::Absent, Fingerprint::Unknown);
        assert_ne!(Fingerprint::Absent, Fingerprint::Count(0));

        let mut tracker = ChangeTracker::new();
        assert!(tracker.observe(Fingerprint::Absent));
        assert!(!tracker.observe(Fingerprint::Absent));
        tracker.reset(false);
        assert!(!tracker.observe(Fingerprint::Absent));
        assert!(tracker.observe(Fingerprint::Count(1)));
        assert!(tracker.observe(Fingerprint::Absent));
    }

    #[test]
    fn test_first_observation_reports_changed() {
        let mut tracker = ChangeTracker::new();
        assert!(tracker.is_changed());
        assert!(tracker.observe(Fingerprint::Count(10)));
        assert_eq!(tracker.state(), ChangeState::Changed);
    }

    #[test]
    fn test_unknown_probe_always_reports_changed() {
        let mut tracker = ChangeTracker::new();
        assert!(tracker.observe(Fingerprint::Unknown));
        assert!(tracker.observe(Fingerprint::Unknown));
    }

    #[test]
    fn test_repeat_probe_is_unchanged() {
        let mut tracker = ChangeTracker::new();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        tracker.observe(Fingerprint::Modified(ts));
        assert!(!tracker.observe(Fingerprint::Modified(ts)));
        assert_eq!(tracker.state(), ChangeState::Unchanged);

        let later = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap();
        assert!(tracker.observe(Fingerprint::Modified(later)));
        assert_eq!(tracker.last_fingerprint(), &Fingerprint::Modified(later));
    }

    #[test]
    fn test_reset_then_check_is_idempotent() {
        let mut tracker = ChangeTracker::new();
        tracker.observe(Fingerprint::Etag("abc".into()));
        tracker.reset(false);
        assert!(!tracker.is_changed());
        assert!(!tracker.observe(Fingerprint::Etag("abc".into())));
    }

    #[test]
    fn test_reset_before_first_probe_adopts_baseline() {
        let mut tracker = ChangeTracker::new();
        tracker.reset(false);
        assert!(!tracker.observe(Fingerprint::Count(7)));
        assert_eq!(tracker.last_fingerprint(), &Fingerprint::Count(7));
        assert!(tracker.observe(Fingerprint::Count(8)));
    }

    #[test]
    fn test_reset_does_not_touch_fingerprint() {
        let mut tracker = ChangeTracker::new();
        tracker.observe(Fingerprint::Count(1));
        tracker.reset(true);
        assert!(tracker.is_changed());
        assert_eq!(tracker.last_fingerprint(), &Fingerprint::Count(1));
    }
}
