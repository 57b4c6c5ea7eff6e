//! Switch counters.
//!
//! Everything is a relaxed atomic: the port loops, the stage threads and
//! the orchestrator all write concurrently and only totals are read.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Monotonic event count
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Point-in-time value such as a table size
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: usize) {
        self.0.store(val as u64, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Traffic seen by one port
#[derive(Debug, Default)]
pub struct PortStats {
    pub rx_packets: Counter,
    pub rx_bytes: Counter,
    pub tx_packets: Counter,
    pub tx_bytes: Counter,
    /// Frames discarded by the inbound VLAN policy.
    pub rx_drops: Counter,
    /// Frames discarded by the outbound VLAN policy.
    pub tx_drops: Counter,
    /// Link read failures and undecodable frames.
    pub rx_errors: Counter,
    /// Link write failures.
    pub tx_errors: Counter,
}

impl PortStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }

    fn counters(&self) -> [(&'static str, &Counter); 8] {
        [
            ("rx_packets", &self.rx_packets),
            ("rx_bytes", &self.rx_bytes),
            ("tx_packets", &self.tx_packets),
            ("tx_bytes", &self.tx_bytes),
            ("rx_drops", &self.rx_drops),
            ("tx_drops", &self.tx_drops),
            ("rx_errors", &self.rx_errors),
            ("tx_errors", &self.tx_errors),
        ]
    }
}

/// Counters of one switch instance
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    ports: RwLock<BTreeMap<String, PortStats>>,

    // Forwarding
    /// Frames handed to at least one output port.
    pub frames_forwarded: Counter,
    /// Frames flooded for lack of a learned destination.
    pub frames_flooded: Counter,
    /// Traversals ended by a stage's drop verdict.
    pub frames_dropped: Counter,

    // ARP
    pub arp_requests_sent: Counter,
    pub arp_replies_sent: Counter,
    pub arp_resolve_timeouts: Counter,

    // ICMP
    pub icmp_echo_replies: Counter,

    // Filtering
    /// Ingress frames and egress ports denied by the MAC filter.
    pub filter_denied: Counter,

    // Table sizes
    pub mac_table_size: Gauge,
    pub arp_table_size: Gauge,
    pub route_count: Gauge,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name`. Registering twice keeps the existing counts.
    pub fn register_port(&self, name: &str) {
        let mut ports = self.ports.write().unwrap_or_else(PoisonError::into_inner);
        ports.entry(name.to_string()).or_default();
    }

    pub fn unregister_port(&self, name: &str) {
        let mut ports = self.ports.write().unwrap_or_else(PoisonError::into_inner);
        ports.remove(name);
    }

    /// Run `f` on the statistics of `name`, if tracked
    pub fn with_port(&self, name: &str, f: impl FnOnce(&PortStats)) {
        let ports = self.ports.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(stats) = ports.get(name) {
            f(stats);
        }
    }

    /// Switch-wide values followed by `<port>_<stat>` for every port
    pub fn export(&self) -> Vec<(String, u64)> {
        let counters = [
            ("frames_forwarded", &self.frames_forwarded),
            ("frames_flooded", &self.frames_flooded),
            ("frames_dropped", &self.frames_dropped),
            ("arp_requests_sent", &self.arp_requests_sent),
            ("arp_replies_sent", &self.arp_replies_sent),
            ("arp_resolve_timeouts", &self.arp_resolve_timeouts),
            ("icmp_echo_replies", &self.icmp_echo_replies),
            ("filter_denied", &self.filter_denied),
        ];
        let gauges = [
            ("mac_table_size", &self.mac_table_size),
            ("arp_table_size", &self.arp_table_size),
            ("route_count", &self.route_count),
        ];

        let mut result: Vec<(String, u64)> = counters
            .iter()
            .map(|(name, c)| (name.to_string(), c.get()))
            .chain(gauges.iter().map(|(name, g)| (name.to_string(), g.get())))
            .collect();

        let ports = self.ports.read().unwrap_or_else(PoisonError::into_inner);
        for (port, stats) in ports.iter() {
            result.extend(
                stats
                    .counters()
                    .into_iter()
                    .map(|(stat, c)| (format!("{}_{}", port, stat), c.get())),
            );
        }
        result
    }
}
