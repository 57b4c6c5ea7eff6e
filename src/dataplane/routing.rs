//! Routing table
//!
//! Prefix routes toward named egress interfaces, plus the switch's own
//! VLAN interfaces. Lookup is longest prefix match. Distinct prefixes of
//! equal length never overlap, so at most one route per length matches.

use crate::protocol::MacAddr;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// A local routable identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VlanInterface {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub vlan: u16,
}

/// One candidate egress of a route
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoutePort {
    /// VLAN interface name
    pub name: String,
    /// Gateway; `None` for directly connected networks
    #[serde(default)]
    pub next_hop: Option<Ipv4Addr>,
}

/// Route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
    pub ports: Vec<RoutePort>,
}

impl Route {
    /// Build from a "network/cidr" prefix string
    pub fn parse(prefix: &str, ports: Vec<RoutePort>) -> Result<Self> {
        let (network, prefix_len) = parse_prefix(prefix)?;
        Ok(Self {
            network,
            prefix_len,
            ports,
        })
    }

    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        let mask = prefix_mask(self.prefix_len);
        (u32::from(addr) & mask) == (u32::from(self.network) & mask)
    }
}

/// Parse "a.b.c.d/n"
pub fn parse_prefix(prefix: &str) -> Result<(Ipv4Addr, u8)> {
    let (network, cidr) = prefix
        .split_once('/')
        .ok_or_else(|| Error::Parse(format!("missing prefix length in {}", prefix)))?;

    let network: Ipv4Addr = network
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("invalid network address in {}", prefix)))?;
    let prefix_len: u8 = cidr
        .trim()
        .parse()
        .ok()
        .filter(|len| *len <= 32)
        .ok_or_else(|| Error::Parse(format!("invalid prefix length in {}", prefix)))?;

    Ok((network, prefix_len))
}

fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        !0u32 << (32 - u32::from(prefix_len.min(32)))
    }
}

/// Where a routed packet leaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub interface_name: String,
    pub interface: VlanInterface,
    /// Address to resolve on the egress VLAN
    pub next_hop: Ipv4Addr,
}

/// Routing table using longest prefix match
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
    interfaces: BTreeMap<String, VlanInterface>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, replacing one with the same prefix
    pub fn add(&mut self, route: Route) {
        self.routes
            .retain(|r| r.network != route.network || r.prefix_len != route.prefix_len);

        self.routes.push(route);
        self.routes.sort_by(|a, b| b.prefix_len.cmp(&a.prefix_len));
    }

    /// Routes covering `addr`, longest prefix first
    pub fn matching(&self, addr: Ipv4Addr) -> impl Iterator<Item = &Route> {
        self.routes.iter().filter(move |route| route.matches(addr))
    }

    /// Pick the egress for `dst`: the first candidate, longest prefix first,
    /// whose VLAN interface exists. A route whose candidates all name
    /// unknown interfaces gives way to the next shorter match.
    pub fn decide(&self, dst: Ipv4Addr) -> Option<RouteDecision> {
        self.matching(dst)
            .flat_map(|route| &route.ports)
            .find_map(|port| {
                let interface = self.interfaces.get(&port.name)?;
                Some(RouteDecision {
                    interface_name: port.name.clone(),
                    interface: *interface,
                    next_hop: port.next_hop.unwrap_or(dst),
                })
            })
    }

    pub fn add_interface(&mut self, name: &str, interface: VlanInterface) {
        self.interfaces.insert(name.to_string(), interface);
    }

    pub fn interface(&self, name: &str) -> Option<&VlanInterface> {
        self.interfaces.get(name)
    }

    pub fn is_local_ip(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.values().any(|i| i.ip == addr)
    }

    pub fn is_local_mac(&self, mac: &MacAddr) -> bool {
        self.interfaces.values().any(|i| i.mac == *mac)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
