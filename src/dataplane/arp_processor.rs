//! ARP packet processor
//!
//! Handles ARP request/reply logic, table updates and active resolution.
//! Resolution is split in two: sending the request never blocks, waiting
//! for the answer does and belongs on a thread of its own.

use super::arp_table::{ArpTable, Lookup, PendingResolution};
use super::port::SwitchPort;
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::{EthernetFrame, MacAddr};
use crate::telemetry::MetricsRegistry;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An IP/MAC pair the switch answers for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LocalAddress {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// Result of processing an ARP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArpAction {
    /// Not addressed to the switch; keep forwarding
    Forward,
    /// Answer with this reply
    Reply(ArpPacket),
    /// Reply to one of our own requests; consumed here
    Consumed,
}

/// Process an incoming ARP packet
///
/// The sender binding is always learned, whether or not the packet
/// concerns one of `locals`.
pub fn process_arp(
    packet: &ArpPacket,
    table: &ArpTable,
    in_port: &Arc<SwitchPort>,
    locals: &[LocalAddress],
) -> ArpAction {
    // 0.0.0.0 senders are address probes and announce nothing
    if !packet.sender_ip.is_unspecified() {
        table.set_entry(packet.sender_ip, packet.sender_mac, Some(Arc::clone(in_port)));
        trace!(
            ip = %packet.sender_ip,
            mac = %packet.sender_mac,
            port = %in_port.name(),
            "learned ARP sender"
        );
    }

    let Some(local) = locals.iter().find(|l| l.ip == packet.target_ip) else {
        return ArpAction::Forward;
    };

    match packet.operation {
        ArpOp::Request => ArpAction::Reply(packet.answer(local.mac)),
        ArpOp::Reply => ArpAction::Consumed,
    }
}

/// Start resolving `target` unless it is cached or already underway.
///
/// Only the first caller for a given IP sends a request (through
/// `broadcast`), from `source` and tagged with `vlan`. Later callers get
/// [`Lookup::Wait`] on the same completion.
pub fn request_resolution(
    table: &ArpTable,
    source: &LocalAddress,
    target: Ipv4Addr,
    vlan: Option<u16>,
    metrics: &MetricsRegistry,
    broadcast: impl FnOnce(EthernetFrame),
) -> Lookup {
    let lookup = table.lookup_or_pend(target);
    if let Lookup::Resolve(_) = lookup {
        let request = ArpPacket::request(source.mac, source.ip, target);
        let mut frame = request.into_frame(MacAddr::BROADCAST);
        if let Some(vid) = vlan {
            frame.set_vlan(vid);
        }
        debug!(ip = %target, vlan = ?vlan, "sending ARP request");
        broadcast(frame);
        metrics.arp_requests_sent.inc();
    }
    lookup
}

/// Block until `pending` is answered, giving up after `timeout`
pub fn await_resolution(
    table: &ArpTable,
    target: Ipv4Addr,
    pending: &Arc<PendingResolution>,
    timeout: Duration,
    metrics: &MetricsRegistry,
) -> Option<MacAddr> {
    let answer = table.wait(target, pending, timeout);
    if answer.is_none() {
        warn!(ip = %target, "ARP resolution timed out");
        metrics.arp_resolve_timeouts.inc();
    }
    answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::PortMode;
    use crate::protocol::EtherType;
    use std::sync::Mutex;
    use std::thread;

    const LOCAL: LocalAddress = LocalAddress {
        ip: Ipv4Addr::new(10, 0, 0, 1),
        mac: MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
    };
    const HOST_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
    const HOST_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn port() -> Arc<SwitchPort> {
        SwitchPort::new(
            "eth0",
            PortMode::Access { vlan: 10 },
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[test]
    fn test_process_request_for_us() {
        let table = ArpTable::default();
        let request = ArpPacket::request(HOST_MAC, HOST_IP, LOCAL.ip);

        match process_arp(&request, &table, &port(), &[LOCAL]) {
            ArpAction::Reply(reply) => {
                assert_eq!(reply.operation, ArpOp::Reply);
                assert_eq!(reply.sender_mac, LOCAL.mac);
                assert_eq!(reply.sender_ip, LOCAL.ip);
                assert_eq!(reply.target_mac, HOST_MAC);
                assert_eq!(reply.target_ip, HOST_IP);
            }
            other => panic!("expected reply, got {:?}", other),
        }
        assert_eq!(table.lookup(&HOST_IP), Some(HOST_MAC));
    }

    #[test]
    fn test_process_reply_for_us_is_consumed() {
        let table = ArpTable::default();
        let reply = ArpPacket::reply(HOST_MAC, HOST_IP, LOCAL.mac, LOCAL.ip);

        assert_eq!(
            process_arp(&reply, &table, &port(), &[LOCAL]),
            ArpAction::Consumed
        );
        assert_eq!(table.lookup(&HOST_IP), Some(HOST_MAC));
    }

    #[test]
    fn test_reply_from_local_sender_is_forwarded() {
        let table = ArpTable::default();
        // Only the target decides; a reply announcing our own address to a host is switched
        let reply = ArpPacket::reply(LOCAL.mac, LOCAL.ip, HOST_MAC, HOST_IP);

        assert_eq!(
            process_arp(&reply, &table, &port(), &[LOCAL]),
            ArpAction::Forward
        );
    }

    #[test]
    fn test_process_foreign_packet_learns_and_forwards() {
        let table = ArpTable::default();
        let request = ArpPacket::request(HOST_MAC, HOST_IP, Ipv4Addr::new(10, 0, 0, 77));
        let in_port = port();

        assert_eq!(
            process_arp(&request, &table, &in_port, &[LOCAL]),
            ArpAction::Forward
        );
        let entry = table.entry(&HOST_IP).unwrap();
        assert!(Arc::ptr_eq(entry.port.as_ref().unwrap(), &in_port));
    }

    #[test]
    fn test_probe_is_not_learned() {
        let table = ArpTable::default();
        let probe = ArpPacket::request(HOST_MAC, Ipv4Addr::UNSPECIFIED, HOST_IP);

        process_arp(&probe, &table, &port(), &[LOCAL]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_resolve_cached() {
        let table = ArpTable::default();
        let metrics = MetricsRegistry::new();
        table.set_entry(HOST_IP, HOST_MAC, None);

        let lookup = request_resolution(&table, &LOCAL, HOST_IP, None, &metrics, |_| {
            panic!("no request expected")
        });
        assert!(matches!(lookup, Lookup::Hit(mac) if mac == HOST_MAC));
        assert_eq!(metrics.arp_requests_sent.get(), 0);
    }

    #[test]
    fn test_resolve_sends_one_tagged_request() {
        let table = Arc::new(ArpTable::default());
        let metrics = MetricsRegistry::new();
        let sent = Mutex::new(Vec::new());

        let first = request_resolution(&table, &LOCAL, HOST_IP, Some(10), &metrics, |frame| {
            sent.lock().unwrap().push(frame)
        });
        let second = request_resolution(&table, &LOCAL, HOST_IP, Some(10), &metrics, |frame| {
            sent.lock().unwrap().push(frame)
        });
        let (Lookup::Resolve(pending), Lookup::Wait(_)) = (first, second) else {
            panic!("expected one request and one waiter");
        };

        let answerer = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                table.set_entry(HOST_IP, HOST_MAC, None);
            })
        };
        let mac = await_resolution(&table, HOST_IP, &pending, Duration::from_secs(5), &metrics);
        answerer.join().unwrap();
        assert_eq!(mac, Some(HOST_MAC));

        let sent = sent.into_inner().unwrap();
        assert_eq!(sent.len(), 1);
        let frame = &sent[0];
        assert_eq!(frame.dst, MacAddr::BROADCAST);
        assert_eq!(frame.src, LOCAL.mac);
        assert_eq!(frame.vlan_id(), Some(10));
        assert!(frame.is_ethertype(EtherType::Arp));
        let request = ArpPacket::parse(&frame.payload).unwrap();
        assert_eq!(request.operation, ArpOp::Request);
        assert_eq!(request.target_ip, HOST_IP);
        assert_eq!(metrics.arp_requests_sent.get(), 1);
    }

    #[test]
    fn test_resolve_timeout() {
        let table = ArpTable::default();
        let metrics = MetricsRegistry::new();

        let Lookup::Resolve(pending) =
            request_resolution(&table, &LOCAL, HOST_IP, None, &metrics, |_| {})
        else {
            panic!("expected a fresh resolution");
        };
        let mac = await_resolution(&table, HOST_IP, &pending, Duration::from_millis(10), &metrics);
        assert_eq!(mac, None);
        assert_eq!(metrics.arp_resolve_timeouts.get(), 1);
        assert!(!table.is_pending(&HOST_IP));
    }
}
