use crate::config::{load_stage_or_default, MacFilterConfig};
use crate::dataplane::{Action, Direction, MacFilter, RuleSet};
use crate::pipeline::{ControlMessage, Stage, StageContext};
use crate::telemetry::MetricsRegistry;
use crate::Result;
use std::sync::Arc;
use tracing::{info, trace};

/// MAC ACL: drops denied frames on ingress, prunes denied output ports on egress
pub struct MacFilterStage {
    filter: MacFilter,
    metrics: Arc<MetricsRegistry>,
}

impl MacFilterStage {
    pub fn new(filter: MacFilter, metrics: Arc<MetricsRegistry>) -> Self {
        Self { filter, metrics }
    }

    pub fn from_config(config: MacFilterConfig, metrics: Arc<MetricsRegistry>) -> Self {
        let filter = MacFilter::new(
            RuleSet::new(config.ingress_filter.mode, config.ingress_rules),
            RuleSet::new(config.egress_filter.mode, config.egress_rules),
            config.local_addresses.into_values().map(|l| l.address).collect(),
        );
        Self::new(filter, metrics)
    }
}

impl Stage for MacFilterStage {
    fn ingress(&self, msg: &mut ControlMessage) {
        let frame = &msg.in_frame.frame;
        let port = msg.in_frame.in_port.name();

        if self.filter.evaluate(Direction::Ingress, &frame.src, &frame.dst, port) == Action::Deny {
            trace!(src = %frame.src, dst = %frame.dst, port = %port, "denied on ingress");
            self.metrics.filter_denied.inc();
            msg.mark_dropped();
        }
    }

    fn egress(&self, msg: &mut ControlMessage) {
        let frame = &msg.in_frame.frame;
        let before = msg.out_ports.len();

        msg.out_ports.retain(|port| {
            self.filter
                .evaluate(Direction::Egress, &frame.src, &frame.dst, port.name())
                == Action::Allow
        });

        let denied = before - msg.out_ports.len();
        if denied > 0 {
            trace!(src = %frame.src, dst = %frame.dst, denied, "ports denied on egress");
            self.metrics.filter_denied.add(denied as u64);
        }
    }
}

pub(super) fn build(ctx: &StageContext) -> Result<Arc<dyn Stage>> {
    let config: MacFilterConfig = load_stage_or_default(ctx.config_file.as_deref())?;
    info!(
        ingress = ?config.ingress_filter.mode,
        egress = ?config.egress_filter.mode,
        rules = config.ingress_rules.len() + config.egress_rules.len(),
        "MAC filter loaded"
    );
    Ok(Arc::new(MacFilterStage::from_config(config, Arc::clone(&ctx.metrics))))
}
