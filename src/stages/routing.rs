//! Routing stage
//!
//! Ingress accepts packets for a local interface address (delivered
//! upwards) and packets sent to an interface MAC (to be routed); anything
//! else was not meant for the router and is dropped.
//!
//! Egress re-addresses packets leaving through a VLAN interface: VLAN tag
//! and source MAC of the interface, destination MAC cleared for the ARP
//! stage to fill in from the next hop.

use crate::config::{load_stage_or_default, RoutingConfig};
use crate::dataplane::{Route, RoutingTable};
use crate::pipeline::{ControlMessage, NextHop, Stage, StageContext};
use crate::protocol::MacAddr;
use crate::telemetry::MetricsRegistry;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub struct RoutingStage {
    table: RoutingTable,
}

impl RoutingStage {
    pub fn new(table: RoutingTable) -> Self {
        Self { table }
    }

    /// Build the table from a stage file. Prefixes that do not parse are skipped.
    pub fn from_config(config: RoutingConfig, metrics: &MetricsRegistry) -> Self {
        let mut table = RoutingTable::new();

        for (name, iface) in config.vlan_ifaces {
            info!(iface = %name, ip = %iface.ip, mac = %iface.mac, vlan = iface.vlan, "VLAN interface");
            table.add_interface(&name, iface);
        }
        for (prefix, route) in config.routes {
            match Route::parse(&prefix, route.ports) {
                Ok(route) => {
                    for port in &route.ports {
                        if table.interface(&port.name).is_none() {
                            warn!(route = %prefix, iface = %port.name, "route names unknown interface");
                        }
                    }
                    table.add(route);
                }
                Err(e) => warn!(route = %prefix, "skipping route: {}", e),
            }
        }

        metrics.route_count.set(table.len());
        Self::new(table)
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }
}

impl Stage for RoutingStage {
    fn ingress(&self, msg: &mut ControlMessage) {
        let Some(packet) = msg.payload.ipv4() else {
            return;
        };
        let dst_ip = packet.dst_addr();

        if self.table.is_local_ip(dst_ip) {
            trace!(dst = %dst_ip, "local delivery");
            return;
        }
        if self.table.is_local_mac(&msg.in_frame.frame.dst) {
            trace!(dst = %dst_ip, "to be routed");
            msg.mark_finished();
            return;
        }

        trace!(dst = %dst_ip, mac = %msg.in_frame.frame.dst, "not for the router");
        msg.mark_dropped();
    }

    fn egress(&self, msg: &mut ControlMessage) {
        let Some(packet) = msg.payload.ipv4_mut() else {
            return;
        };
        let src_ip = packet.src_addr();
        let dst_ip = packet.dst_addr();

        if self.table.is_local_ip(dst_ip) {
            trace!(dst = %dst_ip, "no route back to ourselves");
            msg.mark_dropped();
            return;
        }

        let forwarding = !self.table.is_local_ip(src_ip);
        if forwarding && !packet.decrement_ttl() {
            debug!(src = %src_ip, dst = %dst_ip, "TTL expired");
            msg.mark_dropped();
            return;
        }

        let Some(decision) = self.table.decide(dst_ip) else {
            if forwarding {
                debug!(dst = %dst_ip, "no route");
                msg.mark_dropped();
            }
            return;
        };

        let frame = &mut msg.in_frame.frame;
        frame.set_vlan(decision.interface.vlan);
        frame.src = decision.interface.mac;
        frame.dst = MacAddr::ZERO;
        trace!(
            dst = %dst_ip,
            iface = %decision.interface_name,
            next_hop = %decision.next_hop,
            "routed"
        );

        msg.next_hop = Some(NextHop {
            ip: decision.next_hop,
            interface: Some(decision.interface_name),
        });
    }
}

pub(super) fn build(ctx: &StageContext) -> Result<Arc<dyn Stage>> {
    let config: RoutingConfig = load_stage_or_default(ctx.config_file.as_deref())?;
    Ok(Arc::new(RoutingStage::from_config(config, &ctx.metrics)))
}
