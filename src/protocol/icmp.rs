//! ICMP echo (RFC 792)
//!
//! The switch answers pings addressed to it. Every other message type is
//! only classified so the ICMP stage can drop it.

use super::ipv4::checksum;
use crate::{Error, Result};

/// Type, code, checksum, identifier, sequence
pub const ICMP_HEADER_SIZE: usize = 8;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_ECHO_REQUEST: u8 = 8;

/// Borrowed view of an ICMP message
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < ICMP_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "ICMP message of {} bytes",
                buffer.len()
            )));
        }
        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    /// Echo identifier
    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// Echo sequence number
    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[ICMP_HEADER_SIZE..]
    }

    pub fn validate_checksum(&self) -> bool {
        checksum(self.buffer) == 0
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == TYPE_ECHO_REQUEST
    }

    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type() == TYPE_ECHO_REPLY
    }
}

fn seal(message: &mut [u8]) {
    message[2..4].fill(0);
    let sum = checksum(message);
    message[2..4].copy_from_slice(&sum.to_be_bytes());
}

/// Turn an echo request into its reply. Identifier, sequence and data are
/// echoed back unchanged.
pub fn build_echo_reply(request: &[u8]) -> Result<Vec<u8>> {
    let parsed = IcmpPacket::parse(request)?;
    if !parsed.is_echo_request() {
        return Err(Error::InvalidPacket(format!(
            "ICMP type {} is not an echo request",
            parsed.icmp_type()
        )));
    }

    let mut reply = request.to_vec();
    reply[0] = TYPE_ECHO_REPLY;
    seal(&mut reply);
    Ok(reply)
}

/// Echo request, as sent by the hosts in tests and demos
#[derive(Debug, Clone)]
pub struct EchoRequestBuilder {
    identifier: u16,
    sequence: u16,
    payload: Vec<u8>,
}

impl EchoRequestBuilder {
    pub fn new(identifier: u16, sequence: u16) -> Self {
        Self {
            identifier,
            sequence,
            payload: Vec::new(),
        }
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut message = Vec::with_capacity(ICMP_HEADER_SIZE + self.payload.len());
        message.extend_from_slice(&[TYPE_ECHO_REQUEST, 0, 0, 0]);
        message.extend_from_slice(&self.identifier.to_be_bytes());
        message.extend_from_slice(&self.sequence.to_be_bytes());
        message.extend_from_slice(&self.payload);
        seal(&mut message);
        message
    }
}
