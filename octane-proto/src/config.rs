use std::time::Duration;

use crate::error::ConfigError;

/// Parameters governing the core connection engine.
///
/// Default values should be suitable for most applications. Tuning these is mostly useful for
/// adjusting memory/latency trade-offs: a larger `replay_window_size` tolerates more reordering
/// at the cost of a larger per-connection set, a smaller `coalesce_mtu_bytes` avoids IP
/// fragmentation on paths with a smaller MTU than Ethernet's.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub(crate) max_streams_per_connection: u32,
    pub(crate) max_packets_per_key: u64,
    pub(crate) max_time_per_key: Duration,
    pub(crate) replay_window_size: u64,
    pub(crate) handshake_timeout: Duration,
    pub(crate) drain_timeout: Duration,
    pub(crate) initial_cwnd_bytes: u32,
    pub(crate) initial_ssthresh_bytes: u32,
    pub(crate) mss_bytes: u32,
    pub(crate) max_cwnd_bytes: u32,
    pub(crate) coalesce_mtu_bytes: u16,
    pub(crate) migration_min_interval: Duration,
    pub(crate) migration_max_count: u32,
}

impl TransportConfig {
    /// Maximum number of streams that may be concurrently open on one connection.
    pub fn max_streams_per_connection(&mut self, value: u32) -> Result<&mut Self, ConfigError> {
        if value == 0 {
            return Err(ConfigError::OutOfBounds);
        }
        self.max_streams_per_connection = value;
        Ok(self)
    }

    /// Packets encryptable under one key before rotation is required.
    pub fn max_packets_per_key(&mut self, value: u64) -> Result<&mut Self, ConfigError> {
        if value == 0 {
            return Err(ConfigError::OutOfBounds);
        }
        self.max_packets_per_key = value;
        Ok(self)
    }

    /// Wall-clock time under one key before rotation is required.
    pub fn max_time_per_key(&mut self, value: Duration) -> &mut Self {
        self.max_time_per_key = value;
        self
    }

    /// Number of recently-accepted nonces the replay window retains.
    pub fn replay_window_size(&mut self, value: u64) -> Result<&mut Self, ConfigError> {
        if value == 0 {
            return Err(ConfigError::OutOfBounds);
        }
        self.replay_window_size = value;
        Ok(self)
    }

    /// How long `synSent`/`handshake` waits before giving up.
    pub fn handshake_timeout(&mut self, value: Duration) -> &mut Self {
        self.handshake_timeout = value;
        self
    }

    /// How long `draining` waits before releasing the connection.
    pub fn drain_timeout(&mut self, value: Duration) -> &mut Self {
        self.drain_timeout = value;
        self
    }

    /// Initial congestion window, in bytes. Must be at least `mss_bytes`.
    pub fn initial_cwnd_bytes(&mut self, value: u32) -> Result<&mut Self, ConfigError> {
        if value < self.mss_bytes {
            return Err(ConfigError::OutOfBounds);
        }
        self.initial_cwnd_bytes = value;
        Ok(self)
    }

    /// Initial slow-start threshold, in bytes. Must be at least `mss_bytes`.
    pub fn initial_ssthresh_bytes(&mut self, value: u32) -> Result<&mut Self, ConfigError> {
        if value < self.mss_bytes {
            return Err(ConfigError::OutOfBounds);
        }
        self.initial_ssthresh_bytes = value;
        Ok(self)
    }

    /// Maximum segment size used by the congestion controller's arithmetic.
    pub fn mss_bytes(&mut self, value: u32) -> Result<&mut Self, ConfigError> {
        if value == 0 {
            return Err(ConfigError::OutOfBounds);
        }
        self.mss_bytes = value;
        Ok(self)
    }

    /// Hard ceiling on the congestion window.
    pub fn max_cwnd_bytes(&mut self, value: u32) -> Result<&mut Self, ConfigError> {
        if value < self.mss_bytes {
            return Err(ConfigError::OutOfBounds);
        }
        self.max_cwnd_bytes = value;
        Ok(self)
    }

    /// Maximum size of a coalesced UDP datagram's payload.
    pub fn coalesce_mtu_bytes(&mut self, value: u16) -> Result<&mut Self, ConfigError> {
        if (value as u32) < self.mss_bytes {
            return Err(ConfigError::OutOfBounds);
        }
        self.coalesce_mtu_bytes = value;
        Ok(self)
    }

    /// Minimum time between accepted address migrations.
    pub fn migration_min_interval(&mut self, value: Duration) -> &mut Self {
        self.migration_min_interval = value;
        self
    }

    /// Maximum number of address migrations tolerated over a connection's lifetime.
    pub fn migration_max_count(&mut self, value: u32) -> &mut Self {
        self.migration_max_count = value;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        const MSS: u32 = 1460;
        TransportConfig {
            max_streams_per_connection: 32,
            max_packets_per_key: 1_000_000,
            max_time_per_key: Duration::from_secs(3600),
            replay_window_size: 1000,
            handshake_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
            initial_cwnd_bytes: MSS,
            initial_ssthresh_bytes: 65_535,
            mss_bytes: MSS,
            max_cwnd_bytes: 10 * 1024 * 1024,
            coalesce_mtu_bytes: 1472,
            migration_min_interval: Duration::from_secs(1),
            migration_max_count: 10,
        }
    }
}

/// Parameters governing the security manager (§4.5), split out from `TransportConfig` since it
/// is meaningful even to callers who construct an `octane::Connection` directly with their own
/// transport tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityConfig {
    pub(crate) max_packets_per_key: u64,
    pub(crate) max_time_per_key: Duration,
    pub(crate) replay_window_size: u64,
}

impl From<&TransportConfig> for SecurityConfig {
    fn from(t: &TransportConfig) -> Self {
        SecurityConfig {
            max_packets_per_key: t.max_packets_per_key,
            max_time_per_key: t.max_time_per_key,
            replay_window_size: t.replay_window_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let cfg = TransportConfig::default();
        assert!(cfg.initial_cwnd_bytes >= cfg.mss_bytes);
        assert!(cfg.initial_ssthresh_bytes >= cfg.mss_bytes);
        assert!(cfg.max_cwnd_bytes >= cfg.mss_bytes);
    }

    #[test]
    fn rejects_cwnd_below_mss() {
        let mut cfg = TransportConfig::default();
        assert!(cfg.initial_cwnd_bytes(100).is_err());
    }

    #[test]
    fn rejects_zero_stream_cap() {
        let mut cfg = TransportConfig::default();
        assert!(cfg.max_streams_per_connection(0).is_err());
    }
}
