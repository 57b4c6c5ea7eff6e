use crate::pipeline::{ControlMessage, LayerPayload, Stage, StageContext};
use crate::protocol::ipv4::Ipv4Packet;
use crate::protocol::EtherType;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, trace};

/// Decodes the raw link payload into an IPv4 packet and encodes it back
#[derive(Debug, Default)]
pub struct Ipv4Stage;

impl Stage for Ipv4Stage {
    fn ingress(&self, msg: &mut ControlMessage) {
        if !msg.in_frame.frame.is_ethertype(EtherType::Ipv4) {
            trace!(ethertype = msg.in_frame.frame.ethertype, "not IPv4");
            msg.mark_finished();
            return;
        }

        let LayerPayload::Raw(bytes) = &msg.payload else {
            debug!(payload = msg.payload.kind(), "IPv4 stage expects raw payload");
            msg.mark_dropped();
            return;
        };

        match Ipv4Packet::from_bytes(bytes) {
            Ok(packet) if packet.validate_checksum() => msg.payload = LayerPayload::Ipv4(packet),
            Ok(_) => {
                debug!(port = %msg.in_port().name(), "bad IPv4 header checksum");
                msg.mark_dropped();
            }
            Err(e) => {
                debug!(port = %msg.in_port().name(), "malformed IPv4 packet: {}", e);
                msg.mark_dropped();
            }
        }
    }

    fn egress(&self, msg: &mut ControlMessage) {
        // Non-IPv4 frames turned around here keep their raw payload
        msg.payload = match std::mem::take(&mut msg.payload) {
            LayerPayload::Ipv4(mut packet) => {
                packet.update_checksum();
                LayerPayload::Raw(packet.into_bytes())
            }
            other => other,
        };
    }
}

pub(super) fn build(_ctx: &StageContext) -> Result<Arc<dyn Stage>> {
    Ok(Arc::new(Ipv4Stage))
}
