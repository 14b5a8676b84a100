//! Nonce sequencing, replay detection, and key rotation (§4.5).
//!
//! AEAD and key-exchange primitives themselves are opaque collaborators (§6); this module only
//! owns the bookkeeping around them. `octane::crypto` supplies real implementations of the
//! [`Aead`] and [`KeyExchange`] traits defined here.

use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;

use crate::config::SecurityConfig;

/// An authenticated-encryption primitive, opaque to the engine (§6).
///
/// Implementations MUST treat `nonce` as unique per `key`; the security manager guarantees that
/// by construction (I6) as long as callers only encrypt through [`SecurityManager::next_nonce`].
pub trait Aead: Send + 'static {
    fn encrypt(&self, plaintext: &[u8], nonce: u64) -> Vec<u8>;
    fn decrypt(&self, ciphertext: &[u8], nonce: u64) -> Result<Vec<u8>, AuthError>;
}

/// A key-exchange primitive, opaque to the engine (§6).
pub trait KeyExchange: Send + 'static {
    type PublicValue;
    fn generate() -> (Self, Self::PublicValue)
    where
        Self: Sized;
    fn derive_shared_secret(&self, peer_public: &Self::PublicValue) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthError;

/// The set of recently-accepted nonces, used to reject duplicates while tolerating reordering
/// (I7).
#[derive(Debug, Default)]
struct ReplayWindow {
    observed: FxHashSet<u64>,
    largest_observed: Option<u64>,
}

impl ReplayWindow {
    fn validate(&mut self, nonce: u64, window_size: u64) -> bool {
        if let Some(largest) = self.largest_observed {
            if nonce < largest && largest - nonce > window_size {
                return false; // too old
            }
        }
        if self.observed.contains(&nonce) {
            return false; // replay
        }
        self.observed.insert(nonce);
        self.largest_observed = Some(match self.largest_observed {
            Some(largest) => largest.max(nonce),
            None => nonce,
        });
        if let Some(largest) = self.largest_observed {
            let floor = largest.saturating_sub(window_size);
            self.observed.retain(|&n| n >= floor);
        }
        true
    }

    fn clear(&mut self) {
        self.observed.clear();
        self.largest_observed = None;
    }
}

/// Owns the current symmetric key, the monotonic send-nonce counter, and the replay window for
/// one connection direction.
pub struct SecurityManager<A: Aead> {
    key: A,
    send_nonce: u64,
    packets_since_rotation: u64,
    last_rotation_time: Instant,
    replay: ReplayWindow,
    max_packets_per_key: u64,
    max_time_per_key: Duration,
    replay_window_size: u64,
}

impl<A: Aead> SecurityManager<A> {
    pub fn new(key: A, config: SecurityConfig, now: Instant) -> Self {
        SecurityManager {
            key,
            send_nonce: 0,
            packets_since_rotation: 0,
            last_rotation_time: now,
            replay: ReplayWindow::default(),
            max_packets_per_key: config.max_packets_per_key,
            max_time_per_key: config.max_time_per_key,
            replay_window_size: config.replay_window_size,
        }
    }

    /// Returns the current send nonce, then increments it (with wraparound) and the
    /// packets-since-rotation counter.
    pub fn next_nonce(&mut self) -> u64 {
        let nonce = self.send_nonce;
        self.send_nonce = self.send_nonce.wrapping_add(1);
        self.packets_since_rotation += 1;
        nonce
    }

    pub fn should_rotate(&self, now: Instant) -> bool {
        self.packets_since_rotation >= self.max_packets_per_key
            || now.saturating_duration_since(self.last_rotation_time) >= self.max_time_per_key
    }

    /// Install `new_key`, reset the nonce counter and rotation clock, and clear the replay
    /// window (I6).
    pub fn rotate(&mut self, new_key: A, now: Instant) {
        self.key = new_key;
        self.send_nonce = 0;
        self.packets_since_rotation = 0;
        self.last_rotation_time = now;
        self.replay.clear();
    }

    /// §4.5: reject nonces older than the replay window or already observed; otherwise accept
    /// and record.
    pub fn validate_incoming(&mut self, nonce: u64) -> bool {
        self.replay.validate(nonce, self.replay_window_size)
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> (u64, Vec<u8>) {
        let nonce = self.next_nonce();
        (nonce, self.key.encrypt(plaintext, nonce))
    }

    /// Decrypts under the current key without touching the replay window; callers must call
    /// [`validate_incoming`] first per the silent-drop policy (§4.5, §7).
    pub fn decrypt(&self, ciphertext: &[u8], nonce: u64) -> Result<Vec<u8>, AuthError> {
        self.key.decrypt(ciphertext, nonce)
    }
}
