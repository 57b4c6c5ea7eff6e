//! Forwarding Database (MAC address table)
//!
//! Provides L2 switching functionality including:
//! - MAC address learning from received frames
//! - Output port resolution (learned unicast or VLAN flood)
//! - Aging of stale entries
//! - Per-VLAN separation (Independent VLAN Learning)

use super::port::SwitchPort;
use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Entries unrefreshed for this long are removed by the sweep
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30);

/// Interval between aging sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct FdbEntry {
    pub port: Arc<SwitchPort>,
    pub created: Instant,
    pub last_refreshed: Instant,
}

/// How a frame leaves the switch
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Learned destination on an active port
    Unicast(Arc<SwitchPort>),
    /// Destination learned on the port the frame came from
    Filter,
    /// Broadcast, multicast or unknown destination
    Flood(Vec<Arc<SwitchPort>>),
}

impl Resolution {
    pub fn into_ports(self) -> Vec<Arc<SwitchPort>> {
        match self {
            Resolution::Unicast(port) => vec![port],
            Resolution::Filter => Vec::new(),
            Resolution::Flood(ports) => ports,
        }
    }

    pub fn is_flood(&self) -> bool {
        matches!(self, Resolution::Flood(_))
    }
}

/// MAC learning table keyed by (VLAN, address)
#[derive(Debug)]
pub struct MacTable {
    entries: HashMap<(u16, MacAddr), FdbEntry>,
    max_age: Duration,
}

impl Default for MacTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl MacTable {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_age,
        }
    }

    /// Learn or refresh `mac` on `port`.
    ///
    /// Broadcast and multicast sources are ignored. An existing entry is
    /// updated in place, so a station that moves takes its new port.
    pub fn learn(&mut self, vlan: u16, mac: MacAddr, port: &Arc<SwitchPort>) {
        if mac.is_broadcast() || mac.is_multicast() {
            return;
        }

        let now = Instant::now();
        self.entries
            .entry((vlan, mac))
            .and_modify(|entry| {
                entry.port = Arc::clone(port);
                entry.last_refreshed = now;
            })
            .or_insert_with(|| FdbEntry {
                port: Arc::clone(port),
                created: now,
                last_refreshed: now,
            });
    }

    /// Port a non-expired entry points at
    pub fn lookup(&self, vlan: u16, mac: &MacAddr) -> Option<&Arc<SwitchPort>> {
        self.entries
            .get(&(vlan, *mac))
            .filter(|entry| entry.last_refreshed.elapsed() < self.max_age)
            .map(|entry| &entry.port)
    }

    pub fn entry(&self, vlan: u16, mac: &MacAddr) -> Option<FdbEntry> {
        self.entries.get(&(vlan, *mac)).cloned()
    }

    /// Decide where a frame for `dst` on `vlan` goes.
    ///
    /// `in_port` is excluded from the flood set; `None` means the frame was
    /// originated or re-addressed by the switch and may leave on any port.
    pub fn resolve_out_ports(
        &self,
        vlan: u16,
        dst: &MacAddr,
        in_port: Option<&Arc<SwitchPort>>,
        ports: &[Arc<SwitchPort>],
    ) -> Resolution {
        if dst.is_unicast() {
            if let Some(port) = self.lookup(vlan, dst) {
                if in_port.is_some_and(|p| Arc::ptr_eq(p, port)) {
                    return Resolution::Filter;
                }
                if port.is_up() {
                    return Resolution::Unicast(Arc::clone(port));
                }
            }
        }

        Resolution::Flood(flood_ports(vlan, in_port, ports))
    }

    /// Remove aged-out entries, returning how many were removed
    pub fn age_out(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_refreshed) < self.max_age);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Active ports carrying `vlan`, minus `in_port`
pub fn flood_ports(
    vlan: u16,
    in_port: Option<&Arc<SwitchPort>>,
    ports: &[Arc<SwitchPort>],
) -> Vec<Arc<SwitchPort>> {
    ports
        .iter()
        .filter(|p| p.is_up() && p.mode().carries(vlan))
        .filter(|p| !in_port.is_some_and(|i| Arc::ptr_eq(i, p)))
        .cloned()
        .collect()
}
