//! Configuration types

use crate::dataplane::{Action, FilterRule, LocalAddress, RoutePort, VlanInterface};
use crate::protocol::MacAddr;
use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

fn default_name() -> String {
    "pipeswitch".to_string()
}

/// Switch configuration (switch.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub logging: Option<LogConfig>,
    #[serde(default)]
    pub switch_ports: BTreeMap<String, PortConfig>,
    /// Pipeline stages in traversal order
    #[serde(default)]
    pub control_process: Vec<StageConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortConfig {
    #[serde(default)]
    pub trunk: bool,
    /// Allowed VLANs of a trunk, or the single VLAN of an access port
    #[serde(default)]
    pub allowed_vlans: Vec<u16>,
    /// Activate when the switch starts
    #[serde(default)]
    pub up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StageConfig {
    pub layer: u8,
    pub name: String,
    #[serde(default)]
    pub config_file: Option<PathBuf>,
}

// ============================================================================
// Stage files
// ============================================================================

/// ARP stage: addresses the switch answers for
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArpConfig {
    #[serde(default)]
    pub local_addresses: BTreeMap<String, LocalAddress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LocalIp {
    pub address: Ipv4Addr,
}

/// ICMP stage: addresses that answer echo requests
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IcmpConfig {
    #[serde(default)]
    pub local_addresses: BTreeMap<String, LocalIp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LocalMac {
    pub address: MacAddr,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FilterMode {
    #[serde(default)]
    pub mode: Action,
}

/// MAC filter stage
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MacFilterConfig {
    #[serde(default)]
    pub ingress_filter: FilterMode,
    #[serde(default)]
    pub egress_filter: FilterMode,
    #[serde(default)]
    pub ingress_rules: Vec<FilterRule>,
    #[serde(default)]
    pub egress_rules: Vec<FilterRule>,
    #[serde(default)]
    pub local_addresses: BTreeMap<String, LocalMac>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteConfig {
    #[serde(default)]
    pub ports: Vec<RoutePort>,
}

/// Routing stage
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub vlan_ifaces: BTreeMap<String, VlanInterface>,
    /// Keyed by "network/cidr"
    #[serde(default)]
    pub routes: BTreeMap<String, RouteConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AllowedMac {
    pub mac: MacAddr,
}

/// L2 adapter stage: destination MACs handed up to layer 3
#[derive(Debug, Clone, Default, Deserialize)]
pub struct L2AdapterConfig {
    #[serde(default)]
    pub allowed_addresses: BTreeMap<String, AllowedMac>,
}
