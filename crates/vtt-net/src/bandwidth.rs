//! Traffic counters bumped by the transport's reader and writer tasks.
//!
//! The sync layer drains them periodically with [`NetworkCounters::take`] and
//! feeds the observed receive rate into its bandwidth estimate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free byte and message counters.
#[derive(Debug, Default)]
pub struct NetworkCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl NetworkCounters {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one outbound frame of `wire_bytes` (prefix included).
    pub fn record_send(&self, wire_bytes: u64) {
        self.bytes_sent.fetch_add(wire_bytes, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one inbound frame of `wire_bytes` (prefix included).
    pub fn record_receive(&self, wire_bytes: u64) {
        self.bytes_received.fetch_add(wire_bytes, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and zero every counter.
    pub fn take(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            bytes_sent: self.bytes_sent.swap(0, Ordering::Relaxed),
            bytes_received: self.bytes_received.swap(0, Ordering::Relaxed),
            messages_sent: self.messages_sent.swap(0, Ordering::Relaxed),
            messages_received: self.messages_received.swap(0, Ordering::Relaxed),
        }
    }
}

/// Traffic observed since the previous [`NetworkCounters::take`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    /// Bytes written to the socket.
    pub bytes_sent: u64,
    /// Bytes read from the socket.
    pub bytes_received: u64,
    /// Frames written.
    pub messages_sent: u64,
    /// Frames read.
    pub messages_received: u64,
}

impl TrafficSnapshot {
    /// Total bytes in both directions.
    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent + self.bytes_received
    }

    /// Inbound throughput in bits per second over `elapsed`, or `None` when
    /// nothing was received or no time passed.
    pub fn receive_rate_bps(&self, elapsed: Duration) -> Option<f64> {
        let secs = elapsed.as_secs_f64();
        (self.bytes_received > 0 && secs > 0.0).then(|| self.bytes_received as f64 * 8.0 / secs)
    }
}
