use crate::config::{load_stage_or_default, L2AdapterConfig};
use crate::pipeline::{ControlMessage, LayerPayload, Stage, StageContext};
use crate::protocol::MacAddr;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, trace};

/// Boundary between the switching and routing layers.
///
/// Frames addressed to one of `allowed` go up as raw link payload; all
/// others turn around here. On the way down the payload is written back
/// into the frame.
#[derive(Debug)]
pub struct L2Adapter {
    allowed: Vec<MacAddr>,
}

impl L2Adapter {
    pub fn new(allowed: Vec<MacAddr>) -> Self {
        Self { allowed }
    }
}

impl Stage for L2Adapter {
    fn ingress(&self, msg: &mut ControlMessage) {
        let frame = &msg.in_frame.frame;
        msg.payload = LayerPayload::Raw(frame.payload.clone());

        if !self.allowed.contains(&frame.dst) {
            msg.mark_finished();
        }
    }

    fn egress(&self, msg: &mut ControlMessage) {
        match std::mem::take(&mut msg.payload) {
            LayerPayload::Raw(bytes) => msg.in_frame.frame.payload = bytes,
            other => {
                debug!(payload = other.kind(), "payload not encoded for the link");
                msg.mark_dropped();
                return;
            }
        }

        // Still addressed to us: nothing above claimed it
        if self.allowed.contains(&msg.in_frame.frame.dst) {
            trace!(dst = %msg.in_frame.frame.dst, "unhandled frame for local address");
            msg.mark_dropped();
        }
    }
}

pub(super) fn build(ctx: &StageContext) -> Result<Arc<dyn Stage>> {
    let config: L2AdapterConfig = load_stage_or_default(ctx.config_file.as_deref())?;
    let allowed = config.allowed_addresses.into_values().map(|a| a.mac).collect();
    Ok(Arc::new(L2Adapter::new(allowed)))
}
