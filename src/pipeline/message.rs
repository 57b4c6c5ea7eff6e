//! Message carried through one pipeline traversal

use crate::dataplane::{IncomingFrame, SwitchPort};
use crate::protocol::ipv4::Ipv4Packet;
use crate::switch::SwitchContext;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Outcome a stage leaves on the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verdict {
    /// Keep going
    #[default]
    Continue,
    /// Skip the remaining ingress stages and start unwinding
    Finished,
    /// Discard the frame; no further stage runs
    Drop,
    /// The stage keeps the message and hands it on later through a
    /// [`Resume`](super::Resume)
    Parked,
}

/// The payload as decoded by the layers traversed so far
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LayerPayload {
    #[default]
    Empty,
    /// Link payload, produced by the L2 adapter
    Raw(Vec<u8>),
    /// Decoded IPv4 packet
    Ipv4(Ipv4Packet),
    /// IPv4 data handed to layer-4 handlers; the header is kept for re-encoding
    Segment { ip: Ipv4Packet, data: Vec<u8> },
}

impl LayerPayload {
    /// The IPv4 header, whichever IP-level form the payload is in
    pub fn ipv4(&self) -> Option<&Ipv4Packet> {
        match self {
            LayerPayload::Ipv4(ip) | LayerPayload::Segment { ip, .. } => Some(ip),
            _ => None,
        }
    }

    pub fn ipv4_mut(&mut self) -> Option<&mut Ipv4Packet> {
        match self {
            LayerPayload::Ipv4(ip) | LayerPayload::Segment { ip, .. } => Some(ip),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LayerPayload::Empty => "empty",
            LayerPayload::Raw(_) => "raw",
            LayerPayload::Ipv4(_) => "ipv4",
            LayerPayload::Segment { .. } => "segment",
        }
    }
}

/// Routing decision attached to a re-addressed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHop {
    /// Address whose MAC the frame must be sent to
    pub ip: Ipv4Addr,
    /// VLAN interface the frame leaves through, if routed
    pub interface: Option<String>,
}

/// Per-frame envelope
#[derive(Debug)]
pub struct ControlMessage {
    pub in_frame: IncomingFrame,
    pub out_ports: Vec<Arc<SwitchPort>>,
    pub switch: Arc<SwitchContext>,
    pub payload: LayerPayload,
    /// Set when the frame was re-addressed at L3; output ports are then recomputed on egress
    pub next_hop: Option<NextHop>,
    /// VLAN the frame arrived on
    pub ingress_vlan: Option<u16>,
    pub verdict: Verdict,
}

impl ControlMessage {
    pub fn new(in_frame: IncomingFrame, switch: Arc<SwitchContext>) -> Self {
        let ingress_vlan = in_frame.frame.vlan_id();
        Self {
            in_frame,
            out_ports: Vec::new(),
            switch,
            payload: LayerPayload::Empty,
            next_hop: None,
            ingress_vlan,
            verdict: Verdict::Continue,
        }
    }

    pub fn mark_finished(&mut self) {
        if self.verdict == Verdict::Continue {
            self.verdict = Verdict::Finished;
        }
    }

    pub fn mark_dropped(&mut self) {
        self.verdict = Verdict::Drop;
    }

    /// Hold the message back; see [`Stage::park`](super::Stage::park)
    pub fn mark_parked(&mut self) {
        if self.verdict != Verdict::Drop {
            self.verdict = Verdict::Parked;
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.verdict == Verdict::Drop
    }

    pub fn in_port(&self) -> &Arc<SwitchPort> {
        &self.in_frame.in_port
    }

    /// VLAN of the frame as it currently stands
    pub fn vlan(&self) -> Option<u16> {
        self.in_frame.frame.vlan_id()
    }
}
