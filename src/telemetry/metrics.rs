//! Per-link counters.
//!
//! Counters are atomic so a session's statistics can be read from another
//! task while the session keeps running.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Control-plane statistics for one link.
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Control packets received.
    pub rx_packets: Counter,
    /// Control bytes received.
    pub rx_bytes: Counter,
    /// Control packets sent.
    pub tx_packets: Counter,
    /// Control bytes sent.
    pub tx_bytes: Counter,
    /// Packets dropped as malformed.
    pub rx_malformed: Counter,
    /// Frames for protocols we do not run.
    pub rx_unknown_protocol: Counter,
    /// Transmit failures reported by the link.
    pub tx_errors: Counter,
    /// Configure-Naks sent.
    pub naks_sent: Counter,
    /// Configure-Rejects sent.
    pub rejects_sent: Counter,
    /// Failed peer authentications.
    pub auth_failures: Counter,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a received control packet.
    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    /// Records a transmitted control packet.
    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }

    pub fn record_malformed(&self) {
        self.rx_malformed.inc();
    }

    /// Exports all counters as key-value pairs prefixed with `name`.
    pub fn export(&self, name: &str) -> Vec<(String, u64)> {
        [
            ("rx_packets", &self.rx_packets),
            ("rx_bytes", &self.rx_bytes),
            ("tx_packets", &self.tx_packets),
            ("tx_bytes", &self.tx_bytes),
            ("rx_malformed", &self.rx_malformed),
            ("rx_unknown_protocol", &self.rx_unknown_protocol),
            ("tx_errors", &self.tx_errors),
            ("naks_sent", &self.naks_sent),
            ("rejects_sent", &self.rejects_sent),
            ("auth_failures", &self.auth_failures),
        ]
        .into_iter()
        .map(|(key, counter)| (format!("{}_{}", name, key), counter.get()))
        .collect()
    }
}
