use crate::pipeline::{ControlMessage, LayerPayload, Stage, StageContext};
use crate::Result;
use std::sync::Arc;

/// Hands the IPv4 data to upper layers, keeping the header to re-attach it
#[derive(Debug, Default)]
pub struct L3Adapter;

impl Stage for L3Adapter {
    fn ingress(&self, msg: &mut ControlMessage) {
        msg.payload = match std::mem::take(&mut msg.payload) {
            LayerPayload::Ipv4(ip) => LayerPayload::Segment {
                data: ip.payload().to_vec(),
                ip,
            },
            other => other,
        };
    }

    fn egress(&self, msg: &mut ControlMessage) {
        msg.payload = match std::mem::take(&mut msg.payload) {
            LayerPayload::Segment { mut ip, data } => {
                ip.set_payload(&data);
                LayerPayload::Ipv4(ip)
            }
            other => other,
        };
    }
}

pub(super) fn build(_ctx: &StageContext) -> Result<Arc<dyn Stage>> {
    Ok(Arc::new(L3Adapter))
}
