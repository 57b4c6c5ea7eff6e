//! Learning switch stage
//!
//! Learns source addresses per VLAN on ingress and picks output ports from
//! the MAC table. Frames re-addressed by layer 3 get their ports recomputed
//! on egress.

use crate::dataplane::{mac_aging, MacTable, Resolution};
use crate::pipeline::{ControlMessage, Stage, StageContext};
use crate::telemetry::MetricsRegistry;
use crate::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

pub struct LearningSwitch {
    table: Mutex<MacTable>,
    sweep_interval: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl LearningSwitch {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self::with_aging(mac_aging::DEFAULT_MAX_AGE, mac_aging::DEFAULT_SWEEP_INTERVAL, metrics)
    }

    pub fn with_aging(max_age: Duration, sweep_interval: Duration, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            table: Mutex::new(MacTable::new(max_age)),
            sweep_interval,
            metrics,
        }
    }

    fn table(&self) -> MutexGuard<'_, MacTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn table_size(&self) -> usize {
        self.table().len()
    }
}

impl Stage for LearningSwitch {
    fn ingress(&self, msg: &mut ControlMessage) {
        // Ports tag everything they accept
        let Some(vlan) = msg.vlan() else {
            msg.mark_dropped();
            return;
        };
        let in_port = Arc::clone(msg.in_port());
        let src = msg.in_frame.frame.src;
        let dst = msg.in_frame.frame.dst;
        let ports = msg.switch.active_ports();

        let resolution = {
            let mut table = self.table();
            table.learn(vlan, src, &in_port);
            self.metrics.mac_table_size.set(table.len());
            table.resolve_out_ports(vlan, &dst, Some(&in_port), &ports)
        };

        match &resolution {
            Resolution::Unicast(port) => {
                trace!(vlan, dst = %dst, port = %port.name(), "known destination");
            }
            Resolution::Filter => {
                trace!(vlan, dst = %dst, port = %in_port.name(), "destination on ingress port");
            }
            Resolution::Flood(ports) => {
                trace!(vlan, dst = %dst, count = ports.len(), "flooding");
                self.metrics.frames_flooded.inc();
            }
        }
        msg.out_ports = resolution.into_ports();
    }

    fn egress(&self, msg: &mut ControlMessage) {
        if msg.next_hop.is_none() {
            return;
        }
        let Some(vlan) = msg.vlan() else {
            return;
        };

        let dst = msg.in_frame.frame.dst;
        let ports = msg.switch.active_ports();
        let resolution = self.table().resolve_out_ports(vlan, &dst, None, &ports);
        if resolution.is_flood() {
            self.metrics.frames_flooded.inc();
        }
        msg.out_ports = resolution.into_ports();
        trace!(vlan, dst = %dst, count = msg.out_ports.len(), "output recomputed");
    }

    fn aging_interval(&self) -> Option<Duration> {
        Some(self.sweep_interval)
    }

    fn run_aging(&self) {
        let mut table = self.table();
        let removed = table.age_out();
        self.metrics.mac_table_size.set(table.len());
        if removed > 0 {
            debug!(removed, remaining = table.len(), "MAC entries aged out");
        }
    }
}

pub(super) fn build(ctx: &StageContext) -> Result<Arc<dyn Stage>> {
    Ok(Arc::new(LearningSwitch::new(Arc::clone(&ctx.metrics))))
}
