//! Wire formats handled by the switch
//!
//! Ethernet with 802.1Q tagging, ARP, IPv4 and the ICMP echo exchange.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod types;

pub use ethernet::EthernetFrame;
pub use types::*;
