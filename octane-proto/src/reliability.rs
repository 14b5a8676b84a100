//! Packet-number allocation, in-flight bookkeeping, RTT smoothing, and SACK ranges (§4.3).

use std::time::{Duration, Instant};

use bytes::Bytes;
use rustc_hash::FxHashMap;

/// Maximum number of coalesced ranges retained by an [`AckRanges`] set (§3).
const MAX_RANGES: usize = 10;

/// An ordered, coalesced list of inclusive `[start, end]` packet-number ranges.
///
/// Insertion keeps the list sorted by `start` and merges adjoining/overlapping ranges. Once more
/// than [`MAX_RANGES`] ranges accumulate, the oldest (by `end`) are dropped, biasing retention
/// toward the most recently acknowledged packets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AckRanges {
    ranges: Vec<(u32, u32)>,
}

impl AckRanges {
    pub fn new() -> Self {
        AckRanges::default()
    }

    pub fn as_slice(&self) -> &[(u32, u32)] {
        &self.ranges
    }

    pub fn is_acked(&self, pn: u32) -> bool {
        self.ranges.iter().any(|&(s, e)| s <= pn && pn <= e)
    }

    /// Merge `pn` into the range set: extend an adjoining range, no-op inside an existing one, or
    /// insert a new singleton range; then enforce the retention cap.
    pub fn insert(&mut self, pn: u32) {
        self.insert_range(pn, pn);
    }

    /// Merge the inclusive range `[start, end]` into the set.
    pub fn insert_range(&mut self, start: u32, end: u32) {
        let mut merged_start = start;
        let mut merged_end = end;
        let mut i = 0;
        while i < self.ranges.len() {
            let (s, e) = self.ranges[i];
            let adjoins = merged_start.saturating_sub(1) <= e && s.saturating_sub(1) <= merged_end;
            if adjoins {
                merged_start = merged_start.min(s);
                merged_end = merged_end.max(e);
                self.ranges.remove(i);
            } else {
                i += 1;
            }
        }
        let pos = self
            .ranges
            .iter()
            .position(|&(s, _)| s > merged_start)
            .unwrap_or(self.ranges.len());
        self.ranges.insert(pos, (merged_start, merged_end));

        if self.ranges.len() > MAX_RANGES {
            // Suffix-biased: keep the ranges with the largest `end` values.
            self.ranges.sort_by_key(|&(_, e)| e);
            let drop = self.ranges.len() - MAX_RANGES;
            self.ranges.drain(0..drop);
            self.ranges.sort_by_key(|&(s, _)| s);
        }
    }
}

/// Smoothed RTT estimate (§4.3 RTT update rules).
#[derive(Debug, Clone, Copy, Default)]
pub struct RttState {
    pub srtt: Option<Duration>,
    pub rttvar: Option<Duration>,
    pub min_rtt: Option<Duration>,
}

impl RttState {
    fn on_sample(&mut self, sample: Duration) {
        self.min_rtt = Some(match self.min_rtt {
            Some(min) => min.min(sample),
            None => sample,
        });
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
            Some(srtt) => {
                let rttvar = self.rttvar.unwrap_or_default();
                let delta = if sample > srtt {
                    sample - srtt
                } else {
                    srtt - sample
                };
                self.rttvar = Some(rttvar.mul_f64(0.75) + delta.mul_f64(0.25));
                self.srtt = Some(srtt.mul_f64(0.875) + sample.mul_f64(0.125));
            }
        }
    }
}

struct InFlightRecord {
    sent_at: Instant,
    /// Retained so a timed-out packet's frame bytes can be retransmitted under a fresh packet
    /// number (see DESIGN.md's resolution of the retransmission-retention open question).
    payload: Bytes,
    /// The wire (ciphertext) length charged against `congestion`'s `bytes_in_flight` when this
    /// packet was sent; handed back by `note_ack` so the caller can credit the same amount back,
    /// per I3 (§4.12).
    sent_len: usize,
}

/// Tracks packet-number allocation, in-flight sends, RTT, and selective-ack state for one
/// connection direction.
pub struct ReliabilityTracker {
    next: u32,
    in_flight: FxHashMap<u32, InFlightRecord>,
    ack_ranges: AckRanges,
    largest_acked: Option<u32>,
    rtt: RttState,
}

impl Default for ReliabilityTracker {
    fn default() -> Self {
        ReliabilityTracker {
            next: 0,
            in_flight: FxHashMap::default(),
            ack_ranges: AckRanges::new(),
            largest_acked: None,
            rtt: RttState::default(),
        }
    }
}

impl ReliabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current packet number and post-increments with wraparound.
    pub fn allocate(&mut self) -> u32 {
        let pn = self.next;
        self.next = self.next.wrapping_add(1);
        pn
    }

    /// The packet number [`allocate`] would hand out next, without consuming it.
    pub fn peek_next(&self) -> u32 {
        self.next
    }

    /// Records `pn -> now` in the in-flight map, retaining `payload` for possible retransmission
    /// and `sent_len` (the wire/ciphertext length) for crediting back to `congestion` on ack.
    pub fn note_sent(&mut self, pn: u32, payload: Bytes, sent_len: usize, now: Instant) {
        self.in_flight.insert(
            pn,
            InFlightRecord {
                sent_at: now,
                payload,
                sent_len,
            },
        );
    }

    /// Removes `pn` from in-flight if present, folds an RTT sample if it was, and merges `pn`
    /// into the ack range set either way (an ACK for an unknown pn is a silent no-op per §7, but
    /// the already-acked range bookkeeping still records it so a retransmitted duplicate ack is
    /// idempotent). Returns the packet's `sent_len` if it was actually in flight, so the caller
    /// can credit exactly that many bytes back to `congestion` (I3) instead of a guessed constant.
    pub fn note_ack(&mut self, pn: u32, now: Instant) -> Option<usize> {
        let sent_len = self.in_flight.remove(&pn).map(|record| {
            let sample = now.saturating_duration_since(record.sent_at);
            self.rtt.on_sample(sample);
            record.sent_len
        });
        self.ack_ranges.insert(pn);
        self.largest_acked = Some(match self.largest_acked {
            Some(largest) => largest.max(pn),
            None => pn,
        });
        sent_len
    }

    /// At most 10 coalesced ranges, suffix-biased toward the most recent.
    pub fn ack_ranges(&self) -> &AckRanges {
        &self.ack_ranges
    }

    pub fn largest_acked(&self) -> Option<u32> {
        self.largest_acked
    }

    pub fn is_acked(&self, pn: u32) -> bool {
        match self.largest_acked {
            Some(largest) if pn <= largest => self.ack_ranges.is_acked(pn),
            _ => false,
        }
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.in_flight.values().map(|r| r.payload.len()).sum()
    }

    pub fn rtt(&self) -> RttState {
        self.rtt
    }

    /// Packets sent before `now - timeout` and not yet acked: removed from in-flight and
    /// returned with their retained payload so the caller can retransmit them under a fresh
    /// packet number. Already-acked entries can't appear here since `note_ack` removes them from
    /// in-flight as soon as they're acknowledged.
    pub fn timed_out(&mut self, now: Instant, timeout: Duration) -> Vec<(u32, Bytes)> {
        let expired: Vec<u32> = self
            .in_flight
            .iter()
            .filter(|(_, record)| now.saturating_duration_since(record.sent_at) >= timeout)
            .map(|(&pn, _)| pn)
            .collect();

        expired
            .into_iter()
            .filter_map(|pn| self.in_flight.remove(&pn).map(|r| (pn, r.payload)))
            .collect()
    }

    /// `max(1ms, srtt + 4*rttvar)` if a sample exists, else `1s` (§4.3).
    pub fn rto(&self) -> Duration {
        match (self.rtt.srtt, self.rtt.rttvar) {
            (Some(srtt), Some(rttvar)) => (srtt + rttvar * 4).max(Duration::from_millis(1)),
            _ => Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_increments_and_wraps() {
        let mut t = ReliabilityTracker::new();
        t.next = u32::MAX;
        assert_eq!(t.allocate(), u32::MAX);
        assert_eq!(t.allocate(), 0);
    }

    #[test]
    fn note_ack_updates_rtt_and_ranges() {
        let mut t = ReliabilityTracker::new();
        let t0 = Instant::now();
        let pn = t.allocate();
        t.note_sent(pn, Bytes::from_static(b"x"), 1, t0);
        let acked_len = t.note_ack(pn, t0 + Duration::from_millis(50));
        assert_eq!(acked_len, Some(1));
        assert!(t.rtt().srtt.is_some());
        assert!(t.is_acked(pn));
        assert_eq!(t.bytes_in_flight(), 0);
    }

    #[test]
    fn selective_ack_under_loss() {
        let mut t = ReliabilityTracker::new();
        let t0 = Instant::now();
        let mut pns = vec![];
        for _ in 0..6 {
            let pn = t.allocate();
            t.note_sent(pn, Bytes::new(), 0, t0);
            pns.push(pn);
        }
        // Ack 1,2,3 then 5,6 (pns are 0-indexed: 0,1,2 then 4,5); simulate loss of pn 3.
        for &pn in &[pns[0], pns[1], pns[2]] {
            t.note_ack(pn, t0);
        }
        for &pn in &[pns[4], pns[5]] {
            t.note_ack(pn, t0);
        }
        assert!(t.ack_ranges().as_slice().len() >= 2);
        assert!(!t.is_acked(pns[3]));
        assert!(t.is_acked(pns[4]));
    }

    #[test]
    fn timed_out_removes_from_in_flight_and_retains_payload() {
        let mut t = ReliabilityTracker::new();
        let t0 = Instant::now();
        let pn = t.allocate();
        t.note_sent(pn, Bytes::from_static(b"retry-me"), 8, t0);
        let expired = t.timed_out(t0 + Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(expired, vec![(pn, Bytes::from_static(b"retry-me"))]);
        assert_eq!(t.bytes_in_flight(), 0);
    }

    #[test]
    fn rto_floors_at_one_ms_and_defaults_to_one_second() {
        let t = ReliabilityTracker::new();
        assert_eq!(t.rto(), Duration::from_secs(1));
    }

    #[test]
    fn ack_ranges_cap_at_ten_suffix_biased() {
        let mut ranges = AckRanges::new();
        for i in 0..20u32 {
            ranges.insert(i * 4); // keep each insertion disjoint from its neighbors
        }
        assert!(ranges.as_slice().len() <= 10);
        // the most recent (largest) packet numbers must have survived the cap.
        assert!(ranges.is_acked(19 * 4));
        assert!(!ranges.is_acked(0));
    }
}
