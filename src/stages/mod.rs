//! Built-in pipeline stages
//!
//! | Layer | Name | Role |
//! |---|---|---|
//! | 2 | `Hub` | repeat every frame on every other port |
//! | 2 | `LearningSwitch` | MAC learning and unicast/flood decision |
//! | 2 | `ARP` | ARP table, replies for local addresses, next-hop resolution |
//! | 2 | `MACFilter` | ingress/egress MAC ACL |
//! | 2 | `L2Adapter` | hands frames for local MACs up to layer 3 |
//! | 3 | `IPv4` | IPv4 decode/encode |
//! | 3 | `Routing` | local delivery and routed forwarding between VLAN interfaces |
//! | 3 | `ICMP` | echo replies for local addresses |
//! | 3 | `L3Adapter` | splits IPv4 data from its header for upper layers |

mod arp;
mod hub;
mod icmp;
mod ipv4;
mod l2_adapter;
mod l3_adapter;
mod learning;
mod mac_filter;
mod routing;

pub use arp::ArpStage;
pub use hub::Hub;
pub use icmp::IcmpStage;
pub use ipv4::Ipv4Stage;
pub use l2_adapter::L2Adapter;
pub use l3_adapter::L3Adapter;
pub use learning::LearningSwitch;
pub use mac_filter::MacFilterStage;
pub use routing::RoutingStage;

use crate::pipeline::StageRegistry;

/// Register every built-in stage
pub fn register_builtin(registry: &mut StageRegistry) {
    registry.register(2, "Hub", hub::build);
    registry.register(2, "LearningSwitch", learning::build);
    registry.register(2, "ARP", arp::build);
    registry.register(2, "MACFilter", mac_filter::build);
    registry.register(2, "L2Adapter", l2_adapter::build);
    registry.register(3, "IPv4", ipv4::build);
    registry.register(3, "Routing", routing::build);
    registry.register(3, "ICMP", icmp::build);
    registry.register(3, "L3Adapter", l3_adapter::build);
}
