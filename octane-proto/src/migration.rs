//! Peer-address migration detection, rate/volume limits, and validation (§4.11).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub struct MigrationTracker {
    original_addr: SocketAddr,
    current_addr: SocketAddr,
    migration_count: u32,
    last_migration_time: Option<Instant>,
    min_interval: Duration,
    max_count: u32,
}

impl MigrationTracker {
    pub fn new(original_addr: SocketAddr, min_interval: Duration, max_count: u32) -> Self {
        MigrationTracker {
            original_addr,
            current_addr: original_addr,
            migration_count: 0,
            last_migration_time: None,
            min_interval,
            max_count,
        }
    }

    pub fn current_addr(&self) -> SocketAddr {
        self.current_addr
    }

    pub fn migration_count(&self) -> u32 {
        self.migration_count
    }

    pub fn has_changed(&self, addr: SocketAddr) -> bool {
        addr != self.current_addr
    }

    /// Rejects if less than `min_interval` has passed since the last migration, or if
    /// `migration_count` has reached `max_count`; otherwise updates `current_addr` and records
    /// the attempt.
    pub fn migrate(&mut self, addr: SocketAddr, now: Instant) -> bool {
        if self.migration_count >= self.max_count {
            return false;
        }
        if let Some(last) = self.last_migration_time {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.current_addr = addr;
        self.migration_count += 1;
        self.last_migration_time = Some(now);
        true
    }

    /// True if `addr` equals the current address or the original one, tolerating packets that
    /// straddle a migration window.
    pub fn validate(&self, addr: SocketAddr) -> bool {
        addr == self.current_addr || addr == self.original_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn migration_window_scenario() {
        let now = Instant::now();
        let a = addr(1000);
        let b = addr(2000);
        let c = addr(3000);
        let d = addr(4000);
        let mut tracker = MigrationTracker::new(a, Duration::from_secs(1), 10);

        assert!(tracker.migrate(b, now + Duration::from_millis(1200)));
        assert!(!tracker.migrate(c, now + Duration::from_millis(1200)));
        assert!(tracker.migrate(c, now + Duration::from_millis(2400)));

        assert!(tracker.validate(a));
        assert!(tracker.validate(c));
        assert!(!tracker.validate(d));
    }

    #[test]
    fn eleventh_migration_is_rejected() {
        let now = Instant::now();
        let mut tracker = MigrationTracker::new(addr(0), Duration::from_secs(0), 10);
        for i in 1..=10u16 {
            assert!(tracker.migrate(addr(i), now + Duration::from_secs(i as u64)));
        }
        assert!(!tracker.migrate(addr(999), now + Duration::from_secs(20)));
    }
}
