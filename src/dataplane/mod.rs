//! Data plane components
//!
//! Ports and the tables the pipeline stages consult to forward frames.

mod arp_processor;
mod arp_table;
mod fdb;
mod filter;
mod port;
mod routing;

pub use arp_processor::{
    await_resolution, process_arp, request_resolution, ArpAction, LocalAddress,
};
pub use arp_table::{ArpEntry, ArpTable, Lookup, PendingResolution, RESOLVE_TIMEOUT};
pub use fdb::{flood_ports, FdbEntry, MacTable, Resolution};
pub use filter::{Action, Direction, FilterRule, MacFilter, RuleSet};
pub use port::{
    IncomingFrame, PortMode, PortStatus, SwitchPort, PORT_QUEUE_CAPACITY, RECV_BUFFER_SIZE,
};
pub use routing::{parse_prefix, Route, RouteDecision, RoutePort, RoutingTable, VlanInterface};

/// Aging parameters of the MAC table
pub mod mac_aging {
    pub use super::fdb::{DEFAULT_MAX_AGE, DEFAULT_SWEEP_INTERVAL};
}

/// Aging parameters of the ARP table
pub mod arp_aging {
    pub use super::arp_table::{DEFAULT_MAX_AGE, DEFAULT_SWEEP_INTERVAL};
}
