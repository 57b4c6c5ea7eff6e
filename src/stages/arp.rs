//! ARP stage
//!
//! Ingress: learn every sender, answer requests for local addresses,
//! swallow replies to the switch's own requests.
//!
//! Egress: give IPv4 frames leaving through the switch a destination MAC.
//! A frame whose next hop is unknown is parked here while one request goes
//! out; a waiter thread per outstanding IP sends the parked frames on once
//! the reply is learned, or drops them when the resolution times out.

use crate::config::{load_stage_or_default, ArpConfig};
use crate::dataplane::{
    arp_aging, await_resolution, process_arp, request_resolution, ArpAction, ArpTable,
    LocalAddress, Lookup, PendingResolution, RESOLVE_TIMEOUT,
};
use crate::pipeline::{ControlMessage, NextHop, Resume, Stage, StageContext};
use crate::protocol::arp::ArpPacket;
use crate::protocol::ipv4::Ipv4Packet;
use crate::protocol::{EtherType, MacAddr};
use crate::telemetry::MetricsRegistry;
use crate::Result;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Frames waiting on a resolution, by next-hop IP
#[derive(Debug, Default)]
struct Parked {
    frames: Mutex<HashMap<Ipv4Addr, Vec<(ControlMessage, Resume)>>>,
}

impl Parked {
    fn lock(&self) -> MutexGuard<'_, HashMap<Ipv4Addr, Vec<(ControlMessage, Resume)>>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send on (or drop, without an answer) everything parked for `ip`
    fn release(&self, ip: Ipv4Addr, answer: Option<MacAddr>) {
        let frames = self.lock().remove(&ip).unwrap_or_default();
        trace!(ip = %ip, frames = frames.len(), resolved = answer.is_some(), "releasing parked frames");
        for (mut msg, resume) in frames {
            match answer {
                Some(mac) => {
                    msg.in_frame.frame.dst = mac;
                    resume.send(msg);
                }
                None => resume.discard(msg),
            }
        }
    }

    fn count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }
}

pub struct ArpStage {
    table: Arc<ArpTable>,
    parked: Arc<Parked>,
    locals: Vec<LocalAddress>,
    resolve_timeout: Duration,
    sweep_interval: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl ArpStage {
    pub fn new(locals: Vec<LocalAddress>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            table: Arc::new(ArpTable::new(arp_aging::DEFAULT_MAX_AGE)),
            parked: Arc::default(),
            locals,
            resolve_timeout: RESOLVE_TIMEOUT,
            sweep_interval: arp_aging::DEFAULT_SWEEP_INTERVAL,
            metrics,
        }
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_aging(mut self, max_age: Duration, sweep_interval: Duration) -> Self {
        self.table = Arc::new(ArpTable::new(max_age));
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn table(&self) -> &ArpTable {
        &self.table
    }

    /// Frames currently waiting on a resolution
    pub fn parked_count(&self) -> usize {
        self.parked.count()
    }

    fn is_local(&self, ip: Ipv4Addr) -> bool {
        self.locals.iter().any(|l| l.ip == ip)
    }

    /// Address a request for this frame's next hop is sent from
    fn request_source(&self, msg: &ControlMessage) -> Option<LocalAddress> {
        self.locals
            .iter()
            .find(|l| l.mac == msg.in_frame.frame.src)
            .or(self.locals.first())
            .copied()
    }

    fn spawn_waiter(&self, ip: Ipv4Addr, pending: Arc<PendingResolution>) {
        let table = Arc::clone(&self.table);
        let parked = Arc::clone(&self.parked);
        let metrics = Arc::clone(&self.metrics);
        let waiting = Arc::clone(&pending);
        let timeout = self.resolve_timeout;

        let spawned = thread::Builder::new()
            .name(format!("arp-{}", ip))
            .spawn(move || {
                let answer = await_resolution(&table, ip, &waiting, timeout, &metrics);
                parked.release(ip, answer);
            });

        if let Err(e) = spawned {
            // Nobody would ever clear the slot; give up now so the next frame retries
            warn!(ip = %ip, "cannot start ARP waiter: {}", e);
            let answer = await_resolution(&self.table, ip, &pending, Duration::ZERO, &self.metrics);
            self.parked.release(ip, answer);
        }
    }
}

impl Stage for ArpStage {
    fn ingress(&self, msg: &mut ControlMessage) {
        if !msg.in_frame.frame.is_ethertype(EtherType::Arp) {
            return;
        }

        let packet = match ArpPacket::parse(&msg.in_frame.frame.payload) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(port = %msg.in_port().name(), "malformed ARP packet: {}", e);
                msg.mark_dropped();
                return;
            }
        };

        let action = process_arp(&packet, &self.table, msg.in_port(), &self.locals);
        self.metrics.arp_table_size.set(self.table.len());

        match action {
            ArpAction::Forward => {}
            ArpAction::Consumed => {
                trace!(ip = %packet.sender_ip, "reply to our own request");
                msg.mark_dropped();
            }
            ArpAction::Reply(reply) => {
                debug!(
                    ip = %reply.sender_ip,
                    to = %reply.target_ip,
                    port = %msg.in_port().name(),
                    "answering ARP request"
                );
                let vlan = msg.vlan();
                let mut frame = reply.into_frame(msg.in_frame.frame.src);
                if let Some(vid) = vlan {
                    frame.set_vlan(vid);
                }

                msg.in_frame.frame = frame;
                msg.out_ports = vec![Arc::clone(msg.in_port())];
                msg.mark_finished();
                self.metrics.arp_replies_sent.inc();
            }
        }
    }

    fn egress(&self, msg: &mut ControlMessage) {
        if !msg.in_frame.frame.is_ethertype(EtherType::Ipv4) {
            return;
        }
        let Ok(packet) = Ipv4Packet::from_bytes(&msg.in_frame.frame.payload) else {
            return;
        };

        let src_local = self.locals.iter().find(|l| l.ip == packet.src_addr());
        if msg.next_hop.is_none() && src_local.is_none() {
            return;
        }
        // A routed frame already carries its interface's MAC
        let routed = msg
            .next_hop
            .as_ref()
            .is_some_and(|hop| hop.interface.is_some());
        if let (Some(local), false) = (src_local, routed) {
            msg.in_frame.frame.src = local.mac;
        }

        let target = msg
            .next_hop
            .as_ref()
            .map_or(packet.dst_addr(), |hop| hop.ip);
        if self.is_local(target) {
            msg.mark_dropped();
            return;
        }
        if self.request_source(msg).is_none() {
            debug!(ip = %target, "no local address to resolve from");
            msg.mark_dropped();
            return;
        }

        if msg.next_hop.is_none() {
            msg.next_hop = Some(NextHop {
                ip: target,
                interface: None,
            });
        }
        match self.table.lookup(&target) {
            Some(mac) => {
                trace!(ip = %target, mac = %mac, "next hop known");
                msg.in_frame.frame.dst = mac;
            }
            None => msg.mark_parked(),
        }
    }

    fn park(&self, mut msg: ControlMessage, resume: Resume) {
        let (Some(target), Some(source)) = (
            msg.next_hop.as_ref().map(|hop| hop.ip),
            self.request_source(&msg),
        ) else {
            resume.discard(msg);
            return;
        };

        let mut request = None;
        let mut parked = self.parked.lock();
        let lookup = request_resolution(
            &self.table,
            &source,
            target,
            msg.vlan(),
            &self.metrics,
            |frame| request = Some(frame),
        );

        match lookup {
            // Answered between egress and here
            Lookup::Hit(mac) => {
                drop(parked);
                msg.in_frame.frame.dst = mac;
                resume.send(msg);
            }
            Lookup::Wait(_) => {
                trace!(ip = %target, "joining pending ARP resolution");
                parked.entry(target).or_default().push((msg, resume));
            }
            Lookup::Resolve(pending) => {
                let switch = Arc::clone(&msg.switch);
                parked.entry(target).or_default().push((msg, resume));
                drop(parked);

                if let Some(request) = request {
                    let sent = switch.broadcast_blocking(&request);
                    trace!(ip = %target, ports = sent, "ARP request broadcast");
                }
                self.spawn_waiter(target, pending);
            }
        }
    }

    fn aging_interval(&self) -> Option<Duration> {
        Some(self.sweep_interval)
    }

    fn run_aging(&self) {
        let removed = self.table.age_out();
        self.metrics.arp_table_size.set(self.table.len());
        if removed > 0 {
            debug!(removed, remaining = self.table.len(), "ARP entries aged out");
        }
        let parked = self.parked_count();
        if parked > 0 {
            debug!(parked, "frames waiting on ARP resolution");
        }
    }
}

pub(super) fn build(ctx: &StageContext) -> Result<Arc<dyn Stage>> {
    let config: ArpConfig = load_stage_or_default(ctx.config_file.as_deref())?;
    for (name, local) in &config.local_addresses {
        info!(name = %name, ip = %local.ip, mac = %local.mac, "ARP local address");
    }

    let locals = config.local_addresses.into_values().collect();
    Ok(Arc::new(ArpStage::new(locals, Arc::clone(&ctx.metrics))))
}
