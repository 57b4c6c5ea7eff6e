use crate::pipeline::{ControlMessage, Stage, StageContext};
use crate::Result;
use std::sync::Arc;
use tracing::trace;

/// Repeats every frame on every other active port
#[derive(Debug, Default)]
pub struct Hub;

impl Stage for Hub {
    fn ingress(&self, msg: &mut ControlMessage) {
        let in_port = Arc::clone(msg.in_port());
        msg.out_ports = msg
            .switch
            .active_ports()
            .into_iter()
            .filter(|p| !Arc::ptr_eq(p, &in_port))
            .collect();

        msg.switch.metrics().frames_flooded.inc();
        trace!(port = %in_port.name(), count = msg.out_ports.len(), "hub repeat");
    }
}

pub(super) fn build(_ctx: &StageContext) -> Result<Arc<dyn Stage>> {
    Ok(Arc::new(Hub))
}
