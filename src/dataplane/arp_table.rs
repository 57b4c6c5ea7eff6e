//! ARP table (IP to MAC mapping)
//!
//! Keeps a forward index (IP -> entry) and an inverse index (MAC -> IPs)
//! under one lock so both always agree. Outstanding resolutions are tracked
//! per IP; whoever records the answer wakes every waiter.

use super::port::SwitchPort;
use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Entries unrefreshed for this long are removed by the sweep
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

/// Interval between aging sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How long a resolution waits for a reply
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub mac: MacAddr,
    /// Port the binding was observed on
    pub port: Option<Arc<SwitchPort>>,
    pub created: Instant,
    pub last_refreshed: Instant,
}

/// Completion signal for one outstanding resolution
#[derive(Debug, Default)]
pub struct PendingResolution {
    answer: Mutex<Option<MacAddr>>,
    done: Condvar,
}

impl PendingResolution {
    fn complete(&self, mac: MacAddr) {
        *self.answer.lock().unwrap_or_else(PoisonError::into_inner) = Some(mac);
        self.done.notify_all();
    }

    /// Block until answered or `timeout` elapses
    fn wait(&self, timeout: Duration) -> Option<MacAddr> {
        let answer = self.answer.lock().unwrap_or_else(PoisonError::into_inner);
        let (answer, _) = self
            .done
            .wait_timeout_while(answer, timeout, |answer| answer.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *answer
    }
}

/// Outcome of asking the table for an address
#[derive(Debug)]
pub enum Lookup {
    /// Cached binding
    Hit(MacAddr),
    /// First to ask: the caller must send the request, then wait
    Resolve(Arc<PendingResolution>),
    /// A request is already out: just wait
    Wait(Arc<PendingResolution>),
}

#[derive(Debug, Default)]
struct Tables {
    forward: HashMap<Ipv4Addr, ArpEntry>,
    inverse: HashMap<MacAddr, Vec<Ipv4Addr>>,
    pending: HashMap<Ipv4Addr, Arc<PendingResolution>>,
}

impl Tables {
    fn unlink(&mut self, ip: &Ipv4Addr, mac: &MacAddr) {
        if let Some(ips) = self.inverse.get_mut(mac) {
            ips.retain(|i| i != ip);
            if ips.is_empty() {
                self.inverse.remove(mac);
            }
        }
    }
}

/// Shared ARP table with aging
#[derive(Debug)]
pub struct ArpTable {
    tables: Mutex<Tables>,
    max_age: Duration,
}

impl Default for ArpTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl ArpTable {
    pub fn new(max_age: Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            max_age,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record or refresh a binding and complete any pending resolution for `ip`
    pub fn set_entry(&self, ip: Ipv4Addr, mac: MacAddr, port: Option<Arc<SwitchPort>>) {
        let now = Instant::now();
        let mut tables = self.lock();

        let created = match tables.forward.get(&ip) {
            Some(old) if old.mac == mac => old.created,
            Some(old) => {
                let old_mac = old.mac;
                tables.unlink(&ip, &old_mac);
                now
            }
            None => now,
        };

        tables.forward.insert(
            ip,
            ArpEntry {
                mac,
                port,
                created,
                last_refreshed: now,
            },
        );
        let ips = tables.inverse.entry(mac).or_default();
        if !ips.contains(&ip) {
            ips.push(ip);
        }

        if let Some(pending) = tables.pending.remove(&ip) {
            pending.complete(mac);
        }
    }

    /// MAC bound to `ip`, if the binding has not expired
    pub fn lookup(&self, ip: &Ipv4Addr) -> Option<MacAddr> {
        self.lock()
            .forward
            .get(ip)
            .filter(|entry| entry.last_refreshed.elapsed() < self.max_age)
            .map(|entry| entry.mac)
    }

    pub fn entry(&self, ip: &Ipv4Addr) -> Option<ArpEntry> {
        self.lock().forward.get(ip).cloned()
    }

    /// IPs currently bound to `mac`
    pub fn ips_for(&self, mac: &MacAddr) -> Vec<Ipv4Addr> {
        self.lock().inverse.get(mac).cloned().unwrap_or_default()
    }

    /// Delete the binding for `ip` from both indices
    pub fn remove(&self, ip: &Ipv4Addr) -> bool {
        let mut tables = self.lock();
        match tables.forward.remove(ip) {
            Some(entry) => {
                tables.unlink(ip, &entry.mac);
                true
            }
            None => false,
        }
    }

    /// Look `ip` up, registering a pending resolution on a miss
    pub fn lookup_or_pend(&self, ip: Ipv4Addr) -> Lookup {
        let mut tables = self.lock();

        if let Some(entry) = tables.forward.get(&ip) {
            if entry.last_refreshed.elapsed() < self.max_age {
                return Lookup::Hit(entry.mac);
            }
        }

        if let Some(pending) = tables.pending.get(&ip) {
            return Lookup::Wait(Arc::clone(pending));
        }

        let pending = Arc::new(PendingResolution::default());
        tables.pending.insert(ip, Arc::clone(&pending));
        Lookup::Resolve(pending)
    }

    /// Wait for `pending` to complete. On timeout the pending slot for `ip`
    /// is released so the next frame starts a fresh resolution.
    pub fn wait(
        &self,
        ip: Ipv4Addr,
        pending: &Arc<PendingResolution>,
        timeout: Duration,
    ) -> Option<MacAddr> {
        let answer = pending.wait(timeout);
        if answer.is_none() {
            let mut tables = self.lock();
            if tables
                .pending
                .get(&ip)
                .is_some_and(|p| Arc::ptr_eq(p, pending))
            {
                tables.pending.remove(&ip);
            }
        }
        answer
    }

    pub fn is_pending(&self, ip: &Ipv4Addr) -> bool {
        self.lock().pending.contains_key(ip)
    }

    /// Remove aged-out entries, returning how many were removed
    pub fn age_out(&self) -> usize {
        let now = Instant::now();
        let mut tables = self.lock();

        let expired: Vec<(Ipv4Addr, MacAddr)> = tables
            .forward
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_refreshed) >= self.max_age)
            .map(|(ip, entry)| (*ip, entry.mac))
            .collect();

        for (ip, mac) in &expired {
            tables.forward.remove(ip);
            tables.unlink(ip, mac);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
