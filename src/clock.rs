//! Time and identifier collaborators injected into the session engine.
//!
//! The engine never reads the system clock directly; every duration it reports is
//! derived from instants handed out by a [`TimeSource`]. Tests (and replaying hosts)
//! swap in [`FakeTimeSource`] and move time forward explicitly.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait IdGenerator: Send + Sync {
    fn generate_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic clock that only moves when told to.
#[derive(Debug)]
pub struct FakeTimeSource {
    current: Mutex<DateTime<Utc>>,
}

impl FakeTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Starts at 2024-01-01T00:00:00Z.
    pub fn at_epoch() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = to;
    }
}

impl TimeSource for FakeTimeSource {
    fn now(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Hands out `"{prefix}-1"`, `"{prefix}-2"`, ... in order.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new("id")
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_time_only_moves_when_advanced() {
        let clock = FakeTimeSource::at_epoch();
        let first = clock.now();
        assert_eq!(clock.now(), first);

        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now() - first, Duration::seconds(90));
    }

    #[test]
    fn sequential_ids_are_unique_and_ordered() {
        let ids = SequentialIdGenerator::new("section");
        assert_eq!(ids.generate_id(), "section-1");
        assert_eq!(ids.generate_id(), "section-2");
    }

    #[test]
    fn uuid_ids_differ() {
        let ids = UuidGenerator;
        assert_ne!(ids.generate_id(), ids.generate_id());
    }
}
