//! Pledge time windows.
//!
//! Every pledge carries a `[commence, expiry)` window in unix seconds.
//! Windows are second-granular; all predicates take an explicit `now` so the
//! callers (and tests) control the clock.

use serde::{Deserialize, Serialize};

use crate::PledgeError;

/// A half-open reservation window `[commence, expiry)` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub commence: i64,
    pub expiry: i64,
}

impl Window {
    /// Build a window, clamping a commence time in the past up to `now`.
    ///
    /// An expiry at or before the clamped commence time is rejected.
    pub fn new(commence: i64, expiry: i64, now: i64) -> Result<Self, PledgeError> {
        let commence = commence.max(now);
        if expiry <= commence {
            return Err(PledgeError::InvalidWindow { commence, expiry });
        }
        Ok(Self { commence, expiry })
    }

    /// Rewrite the expiry time. Setting it into the past is valid; that is
    /// how deletion withdraws a reservation.
    pub fn set_expiry(&mut self, expiry: i64) {
        self.expiry = expiry;
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expiry
    }

    pub fn is_pending(&self, now: i64) -> bool {
        now < self.commence
    }

    /// Active: commenced and not yet expired.
    pub fn is_active(&self, now: i64) -> bool {
        self.commence <= now && now < self.expiry
    }

    /// Active now, or commencing within the next `window` seconds.
    pub fn is_active_soon(&self, now: i64, window: i64) -> bool {
        self.commence >= now && self.commence <= now + window && self.expiry > now
    }

    /// Commenced between `now - window` and `now`, and still running.
    pub fn commenced_recently(&self, now: i64, window: i64) -> bool {
        self.commence >= now - window && self.commence <= now && self.expiry > now
    }

    /// Expired between `now - window` and `now`.
    pub fn concluded_recently(&self, now: i64, window: i64) -> bool {
        self.expiry < now && self.expiry >= now - window
    }

    /// Expired at least `window` seconds ago.
    pub fn is_extinct(&self, now: i64, window: i64) -> bool {
        self.expiry <= now - window
    }

    /// Human state label used in listings.
    pub fn state(&self, now: i64) -> &'static str {
        if self.is_expired(now) {
            "EXPIRED"
        } else if self.is_pending(now) {
            "PENDING"
        } else {
            "ACTIVE"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn commence_in_past_is_clamped() {
        let w = Window::new(NOW - 100, NOW + 60, NOW).unwrap();
        assert_eq!(w.commence, NOW);
        assert_eq!(w.expiry, NOW + 60);
    }

    #[test]
    fn expiry_before_clamped_commence_rejected() {
        // Raw window is ordered, but the clamp pushes commence past expiry.
        let err = Window::new(NOW - 100, NOW - 10, NOW).unwrap_err();
        assert!(matches!(err, PledgeError::InvalidWindow { .. }));
        assert!(Window::new(NOW + 10, NOW + 10, NOW).is_err());
    }

    #[test]
    fn state_transitions() {
        let w = Window::new(NOW + 10, NOW + 70, NOW).unwrap();
        assert!(w.is_pending(NOW));
        assert!(!w.is_active(NOW));
        assert!(w.is_active(NOW + 10));
        assert!(w.is_active(NOW + 69));
        assert!(w.is_expired(NOW + 70));
        assert_eq!(w.state(NOW), "PENDING");
        assert_eq!(w.state(NOW + 30), "ACTIVE");
        assert_eq!(w.state(NOW + 71), "EXPIRED");
    }

    #[test]
    fn active_soon_window() {
        let w = Window::new(NOW + 10, NOW + 70, NOW).unwrap();
        assert!(w.is_active_soon(NOW, 15));
        assert!(!w.is_active_soon(NOW, 5));
        // Already active pledges are not "active soon"; the push loop tests
        // is_active separately.
        assert!(!w.is_active_soon(NOW + 20, 15));
    }

    #[test]
    fn recent_boundaries() {
        let mut w = Window::new(NOW + 10, NOW + 70, NOW).unwrap();
        assert!(w.commenced_recently(NOW + 11, 2));
        assert!(!w.commenced_recently(NOW + 20, 2));

        w.set_expiry(NOW + 20);
        assert!(w.concluded_recently(NOW + 21, 2));
        assert!(!w.concluded_recently(NOW + 30, 2));

        assert!(!w.is_extinct(NOW + 30, 120));
        assert!(w.is_extinct(NOW + 140, 120));
    }
}
