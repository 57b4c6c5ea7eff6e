//! Link backends
//!
//! A switch port drives one link through the [`Link`] trait:
//! - AF_PACKET: raw socket on a host interface
//! - Memory: in-process channel pair, used for tests and simulation

mod af_packet;
mod memory;

pub use af_packet::{AfPacketBackend, AfPacketSocket};
pub use memory::{MemoryBackend, MemoryLink, MemoryPeer};

use crate::Result;
use std::future::Future;
use std::sync::Arc;

/// Information about a received frame
#[derive(Debug, Clone)]
pub struct RxInfo {
    /// Number of bytes written to the buffer
    pub len: usize,
    /// The frame was longer than the buffer and was cut to `len`
    pub truncated: bool,
}

/// Teardown half of a link, usable without knowing the backend type.
pub trait LinkControl: Send + Sync {
    /// Release the link. Pending I/O may still complete.
    fn close(&self) -> Result<()>;
}

/// A frame-oriented link shared by a port's send and receive loops.
pub trait Link: LinkControl + 'static {
    /// Receive a frame into the provided buffer
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<RxInfo>> + Send;

    /// Send a frame
    fn send(&self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;
}

/// Opens links by port name.
pub trait Backend: Send + Sync + 'static {
    type Link: Link;

    fn open(&self, name: &str) -> Result<Arc<Self::Link>>;
}
