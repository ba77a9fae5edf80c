use std::time;

use crate::frame::serial;
use crate::simulator::LinkConfig;

const HANDSHAKE_TIMEOUT_DEFAULT_MS: u64 = 1_000;
const HANDSHAKE_TIMEOUT_MIN_MS: u64 = 10;

const HANDSHAKE_ATTEMPTS_DEFAULT: u32 = 3;

const RECEIVE_WINDOW_DEFAULT: u32 = 64;

const RETRANSMIT_TIMEOUT_DEFAULT_MS: u64 = 1_000;
const RETRANSMIT_TIMEOUT_MIN_MS: u64 = 10;

const SLOW_START_THRESHOLD_DEFAULT: u32 = 16;

const CONNECTION_TIMEOUT_DEFAULT_MS: u64 = 10_000;

const POLL_INTERVAL_DEFAULT_MS: u64 = 10;

/// Configuration shared by both ends of a [`Connection`](crate::Connection).
#[derive(Clone, Debug)]
pub struct Config {
    /// Time to wait for each handshake reply before resending, in milliseconds.
    ///
    /// Minimum value: 10 \
    /// Default value: 1,000
    pub handshake_timeout_ms: u64,

    /// Number of times a handshake packet is sent before giving up.
    ///
    /// Minimum value: 1 \
    /// Default value: 3
    pub handshake_attempts: u32,

    /// Time a server waits for a client's first handshake packet, in milliseconds. Waits
    /// indefinitely if `None`.
    ///
    /// Default value: `None`
    pub accept_timeout_ms: Option<u64>,

    /// Number of packets the peer may keep in flight, advertised during the handshake.
    ///
    /// Minimum value: 1 \
    /// Default value: 64
    pub receive_window: u32,

    /// Time after which an unacknowledged packet is resent, in milliseconds.
    ///
    /// Minimum value: 10 \
    /// Default value: 1,000
    pub retransmit_timeout_ms: u64,

    /// Congestion window size beyond which slow start ends.
    ///
    /// Minimum value: 1 \
    /// Default value: 16
    pub slow_start_threshold: u32,

    /// Time a packet may remain unacknowledged before the peer is considered unreachable, in
    /// milliseconds.
    ///
    /// Minimum value: `retransmit_timeout_ms` \
    /// Default value: 10,000
    pub connection_timeout_ms: u64,

    /// Period of the worker loops, in milliseconds. Bounds how quickly a close is observed.
    ///
    /// Minimum value: 1 \
    /// Default value: 10
    pub poll_interval_ms: u64,

    /// Time `close` waits for queued and unacknowledged data to be delivered before shutting
    /// the connection down, in milliseconds.
    ///
    /// Default value: 0
    pub linger_ms: u64,

    /// Largest datagram that will be sent, in bytes.
    ///
    /// Minimum value: 22 \
    /// Default value: 1,500
    pub datagram_size_max: usize,

    /// Faults applied to outbound datagrams.
    pub link: LinkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: HANDSHAKE_TIMEOUT_DEFAULT_MS,
            handshake_attempts: HANDSHAKE_ATTEMPTS_DEFAULT,
            accept_timeout_ms: None,
            receive_window: RECEIVE_WINDOW_DEFAULT,
            retransmit_timeout_ms: RETRANSMIT_TIMEOUT_DEFAULT_MS,
            slow_start_threshold: SLOW_START_THRESHOLD_DEFAULT,
            connection_timeout_ms: CONNECTION_TIMEOUT_DEFAULT_MS,
            poll_interval_ms: POLL_INTERVAL_DEFAULT_MS,
            linger_ms: 0,
            datagram_size_max: serial::DATAGRAM_SIZE_MAX,
            link: LinkConfig::default(),
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) {
        assert!(
            self.handshake_timeout_ms >= HANDSHAKE_TIMEOUT_MIN_MS,
            "invalid configuration: handshake_timeout_ms < {}",
            HANDSHAKE_TIMEOUT_MIN_MS
        );
        assert!(
            self.handshake_attempts >= 1,
            "invalid configuration: handshake_attempts < 1"
        );
        assert!(
            self.receive_window >= 1,
            "invalid configuration: receive_window < 1"
        );
        assert!(
            self.retransmit_timeout_ms >= RETRANSMIT_TIMEOUT_MIN_MS,
            "invalid configuration: retransmit_timeout_ms < {}",
            RETRANSMIT_TIMEOUT_MIN_MS
        );
        assert!(
            self.slow_start_threshold >= 1,
            "invalid configuration: slow_start_threshold < 1"
        );
        assert!(
            self.connection_timeout_ms >= self.retransmit_timeout_ms,
            "invalid configuration: connection_timeout_ms < retransmit_timeout_ms"
        );
        assert!(
            self.poll_interval_ms >= 1,
            "invalid configuration: poll_interval_ms < 1"
        );
        assert!(
            self.datagram_size_max > serial::STREAM_OVERHEAD_SIZE,
            "invalid configuration: datagram_size_max <= {}",
            serial::STREAM_OVERHEAD_SIZE
        );

        self.link.validate();
    }

    pub(crate) fn handshake_timeout(&self) -> time::Duration {
        time::Duration::from_millis(self.handshake_timeout_ms)
    }

    pub(crate) fn poll_interval(&self) -> time::Duration {
        time::Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn max_stream_payload(&self) -> usize {
        serial::stream_payload_size_max(self.datagram_size_max)
    }
}
