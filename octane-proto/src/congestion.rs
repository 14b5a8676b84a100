//! AIMD congestion control with a pacing hook (§4.4).

use std::time::{Duration, Instant};

/// Pacing token bucket: refills at `rate` bytes/sec, capped at `rate * 0.1s`.
struct PacingBucket {
    rate_bytes_per_sec: f64,
    tokens: f64,
    cap: f64,
    last_update: Instant,
}

impl PacingBucket {
    fn new(rate_bytes_per_sec: f64, now: Instant) -> Self {
        let cap = rate_bytes_per_sec * 0.1;
        PacingBucket {
            rate_bytes_per_sec,
            tokens: cap,
            cap,
            last_update: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_bytes_per_sec).min(self.cap);
        self.last_update = now;
    }

    fn try_consume(&mut self, bytes: usize, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= bytes as f64 {
            self.tokens -= bytes as f64;
            true
        } else {
            false
        }
    }
}

/// AIMD congestion controller: exponential growth below `ssthresh`, linear above, halved on loss.
pub struct CongestionController {
    cwnd: u32,
    ssthresh: u32,
    bytes_in_flight: u32,
    recovery_start: Option<Instant>,
    mss: u32,
    max_cwnd: u32,
    pacing: PacingBucket,
}

/// Default pacing rate: 1 GB/s, matching the spec's uncapped-in-practice default.
const DEFAULT_PACING_RATE: f64 = 1_000_000_000.0;

impl CongestionController {
    pub fn new(initial_cwnd: u32, initial_ssthresh: u32, mss: u32, max_cwnd: u32, now: Instant) -> Self {
        CongestionController {
            cwnd: initial_cwnd,
            ssthresh: initial_ssthresh,
            bytes_in_flight: 0,
            recovery_start: None,
            mss,
            max_cwnd,
            pacing: PacingBucket::new(DEFAULT_PACING_RATE, now),
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn bytes_in_flight(&self) -> u32 {
        self.bytes_in_flight
    }

    pub fn in_recovery(&self) -> bool {
        self.recovery_start.is_some()
    }

    /// `bytes_in_flight -= bytes_acked`; grow `cwnd` exponentially in slow-start, linearly in
    /// congestion avoidance; clamp at `max_cwnd`.
    pub fn on_ack(&mut self, bytes_acked: u32) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes_acked);
        let growth = if self.cwnd < self.ssthresh {
            bytes_acked
        } else {
            let mss = self.mss as u64;
            ((mss * mss) / (self.cwnd as u64).max(1)) as u32
        };
        self.cwnd = self.cwnd.saturating_add(growth).min(self.max_cwnd);
    }

    /// Halve `cwnd` (floored at `mss`), mark recovery.
    pub fn on_loss(&mut self, now: Instant) {
        self.ssthresh = (self.cwnd / 2).max(self.mss);
        self.cwnd = self.ssthresh;
        self.recovery_start = Some(now);
    }

    /// True iff sending `bytes` would not exceed `cwnd` and the pacing bucket permits it.
    pub fn can_send(&mut self, bytes: usize, now: Instant) -> bool {
        let within_window = self.bytes_in_flight as usize + bytes <= self.cwnd as usize;
        within_window && self.pacing.try_consume(bytes, now)
    }

    pub fn mark_in_flight(&mut self, bytes: u32) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_add(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u32 = 1460;

    fn controller(now: Instant) -> CongestionController {
        CongestionController::new(MSS, 65535, MSS, 10 * 1024 * 1024, now)
    }

    #[test]
    fn slow_start_grows_exponentially() {
        let now = Instant::now();
        let mut cc = controller(now);
        let before = cc.cwnd();
        cc.mark_in_flight(MSS);
        cc.on_ack(MSS);
        assert_eq!(cc.cwnd(), before + MSS);
    }

    #[test]
    fn loss_halves_cwnd_and_floors_at_mss() {
        let now = Instant::now();
        let mut cc = controller(now);
        for _ in 0..10 {
            cc.mark_in_flight(MSS);
            cc.on_ack(MSS);
        }
        let cwnd_before_loss = cc.cwnd();
        assert!(cwnd_before_loss > MSS);
        cc.on_loss(now);
        assert_eq!(cc.ssthresh(), cwnd_before_loss / 2);
        assert_eq!(cc.cwnd(), cwnd_before_loss / 2);
        assert!(cc.cwnd() >= MSS);
        assert!(cc.in_recovery());
    }

    #[test]
    fn bytes_in_flight_never_negative() {
        let now = Instant::now();
        let mut cc = controller(now);
        cc.mark_in_flight(100);
        cc.on_ack(1_000_000);
        assert_eq!(cc.bytes_in_flight(), 0);
    }

    #[test]
    fn cwnd_clamped_at_max() {
        let now = Instant::now();
        let mut cc = CongestionController::new(MSS, MSS, MSS, 2000, now);
        cc.mark_in_flight(MSS);
        cc.on_ack(MSS);
        assert!(cc.cwnd() <= 2000);
    }

    #[test]
    fn pacing_bucket_limits_bursts() {
        let now = Instant::now();
        let mut cc = CongestionController::new(u32::MAX / 2, u32::MAX / 2, MSS, u32::MAX, now);
        // drain far past the 0.1s cap in one shot
        let huge = (DEFAULT_PACING_RATE * 0.2) as usize;
        assert!(!cc.can_send(huge, now));
    }
}
