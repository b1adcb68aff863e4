//! Time source with a manual variant for tests
//!
//! Retention trimming and iterator expiry are clock-based; tests need to
//! back-date arrivals and jump past TTLs without sleeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum Clock {
    System,
    Manual(Arc<Mutex<DateTime<Utc>>>),
}

impl Clock {
    /// Wall-clock time.
    pub fn system() -> Self {
        Self::System
    }

    /// Fixed time, advanced explicitly. Test use only.
    pub fn manual(start: DateTime<Utc>) -> Self {
        Self::Manual(Arc::new(Mutex::new(start)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Manual(t) => *t.lock().expect("clock lock poisoned"),
        }
    }

    /// Advance a manual clock; no-op on the system clock.
    pub fn advance(&self, by: Duration) {
        if let Self::Manual(t) = self {
            let mut t = t.lock().expect("clock lock poisoned");
            *t = *t + by;
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = Clock::manual(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(6));
        assert_eq!(clock.now(), start + Duration::minutes(6));
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let start = Utc::now();
        let clock = Clock::manual(start);
        let other = clock.clone();

        clock.advance(Duration::hours(1));
        assert_eq!(other.now(), start + Duration::hours(1));
    }
}
