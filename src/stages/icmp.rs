use crate::config::{load_stage_or_default, IcmpConfig};
use crate::pipeline::{ControlMessage, LayerPayload, Stage, StageContext};
use crate::protocol::icmp::{build_echo_reply, IcmpPacket};
use crate::protocol::ipv4::{Protocol, DEFAULT_TTL};
use crate::telemetry::MetricsRegistry;
use crate::Result;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Answers echo requests sent to a local address.
///
/// The reply leaves through the port the request came in on. Other ICMP
/// messages for local addresses end here.
pub struct IcmpStage {
    locals: Vec<Ipv4Addr>,
    metrics: Arc<MetricsRegistry>,
}

impl IcmpStage {
    pub fn new(locals: Vec<Ipv4Addr>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { locals, metrics }
    }

    /// Echo reply for `data`, the ICMP message of a request to a local address
    fn answer(&self, data: &[u8]) -> Option<Vec<u8>> {
        let icmp = match IcmpPacket::parse(data) {
            Ok(icmp) => icmp,
            Err(e) => {
                debug!("malformed ICMP message: {}", e);
                return None;
            }
        };
        if !icmp.validate_checksum() {
            debug!("bad ICMP checksum");
            return None;
        }
        if !icmp.is_echo_request() {
            trace!(icmp_type = icmp.icmp_type(), "ICMP message consumed");
            return None;
        }
        build_echo_reply(data).ok()
    }
}

impl Stage for IcmpStage {
    fn ingress(&self, msg: &mut ControlMessage) {
        let (packet, data) = match &msg.payload {
            LayerPayload::Ipv4(packet) => (packet, packet.payload()),
            LayerPayload::Segment { ip, data } => (ip, data.as_slice()),
            _ => return,
        };
        if packet.protocol() != Protocol::Icmp as u8 || !self.locals.contains(&packet.dst_addr()) {
            return;
        }

        let Some(reply) = self.answer(data) else {
            msg.mark_dropped();
            return;
        };

        let mut ip = packet.clone();
        ip.swap_addresses();
        ip.set_ttl(DEFAULT_TTL);
        debug!(to = %ip.dst_addr(), port = %msg.in_port().name(), "echo reply");

        msg.payload = match msg.payload {
            LayerPayload::Segment { .. } => LayerPayload::Segment { ip, data: reply },
            _ => {
                ip.set_payload(&reply);
                LayerPayload::Ipv4(ip)
            }
        };

        let frame = &mut msg.in_frame.frame;
        std::mem::swap(&mut frame.src, &mut frame.dst);
        msg.out_ports = vec![Arc::clone(msg.in_port())];
        msg.mark_finished();
        self.metrics.icmp_echo_replies.inc();
    }
}

pub(super) fn build(ctx: &StageContext) -> Result<Arc<dyn Stage>> {
    let config: IcmpConfig = load_stage_or_default(ctx.config_file.as_deref())?;
    let locals = config.local_addresses.into_values().map(|l| l.address).collect();
    Ok(Arc::new(IcmpStage::new(locals, Arc::clone(&ctx.metrics))))
}
