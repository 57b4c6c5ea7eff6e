//! Pipeswitch - layered software switch/router
//!
//! Frames received on a port are walked up through a configurable chain of
//! protocol stages and back down, then written out of the ports the stages
//! selected. Switching, ARP, filtering, IPv4 routing and ICMP echo are all
//! stages; ports handle 802.1Q trunk/access tagging.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod stages;
pub mod switch;
pub mod telemetry;

pub use error::{Error, Result};
pub use switch::{Switch, SwitchContext};
