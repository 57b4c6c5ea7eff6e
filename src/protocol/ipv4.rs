//! IPv4 (RFC 791)

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Header without options
pub const MIN_HEADER_SIZE: usize = 20;

/// TTL for datagrams the switch originates
pub const DEFAULT_TTL: u8 = 64;

const TOTAL_LENGTH: usize = 2;
const TTL: usize = 8;
const PROTOCOL: usize = 9;
const CHECKSUM: usize = 10;
const SRC: usize = 12;
const DST: usize = 16;

/// Protocol numbers the switch recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Udp = 17,
}

/// RFC 1071 one's complement sum, shared by the IPv4 header and ICMP.
/// Running it over data that embeds a valid checksum yields zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = data
        .chunks(2)
        .map(|pair| match *pair {
            [hi, lo] => u32::from(u16::from_be_bytes([hi, lo])),
            [hi] => u32::from(hi) << 8,
            _ => 0,
        })
        .fold(0u32, u32::wrapping_add);

    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Owned IPv4 datagram, decoded once at L3 ingress and mutated in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Packet {
    buffer: Vec<u8>,
    header_len: usize,
}

impl Ipv4Packet {
    /// Decode from a link payload. Ethernet padding past the total length is discarded.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let malformed = |what: &str| Error::InvalidPacket(format!("IPv4: {}", what));

        let first = *data.first().ok_or_else(|| malformed("empty"))?;
        if first >> 4 != 4 {
            return Err(malformed("version is not 4"));
        }
        let header_len = usize::from(first & 0x0f) * 4;
        if header_len < MIN_HEADER_SIZE || data.len() < header_len {
            return Err(malformed("header truncated"));
        }

        let total_length = usize::from(u16::from_be_bytes([
            data[TOTAL_LENGTH],
            data[TOTAL_LENGTH + 1],
        ]));
        if !(header_len..=data.len()).contains(&total_length) {
            return Err(malformed(&format!(
                "total length {} with {} bytes at hand",
                total_length,
                data.len()
            )));
        }

        Ok(Self {
            buffer: data[..total_length].to_vec(),
            header_len,
        })
    }

    fn addr_at(&self, offset: usize) -> Ipv4Addr {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&self.buffer[offset..offset + 4]);
        Ipv4Addr::from(octets)
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        self.addr_at(SRC)
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        self.addr_at(DST)
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[PROTOCOL]
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[TTL]
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer[TTL] = ttl;
        self.update_checksum();
    }

    /// Count one hop. Returns false, leaving the packet untouched, when
    /// the TTL would reach zero.
    pub fn decrement_ttl(&mut self) -> bool {
        match self.ttl() {
            0 | 1 => false,
            ttl => {
                self.set_ttl(ttl - 1);
                true
            }
        }
    }

    /// Answer direction: source and destination trade places
    pub fn swap_addresses(&mut self) {
        let (src, dst) = self.buffer[SRC..DST + 4].split_at_mut(4);
        src.swap_with_slice(dst);
        self.update_checksum();
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[TOTAL_LENGTH], self.buffer[TOTAL_LENGTH + 1]])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }

    /// Replace the data portion, fixing up total length and checksum
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.buffer.truncate(self.header_len);
        self.buffer.extend_from_slice(payload);
        let total_length = self.buffer.len() as u16;
        self.buffer[TOTAL_LENGTH..TOTAL_LENGTH + 2].copy_from_slice(&total_length.to_be_bytes());
        self.update_checksum();
    }

    pub fn update_checksum(&mut self) {
        self.buffer[CHECKSUM..CHECKSUM + 2].fill(0);
        let sum = checksum(&self.buffer[..self.header_len]);
        self.buffer[CHECKSUM..CHECKSUM + 2].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn validate_checksum(&self) -> bool {
        checksum(&self.buffer[..self.header_len]) == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Option-less datagram with DF set, for hosts in tests and demos
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    ttl: u8,
    protocol: u8,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            protocol: 0,
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut header = [0u8; MIN_HEADER_SIZE];
        header[0] = 0x45;
        let total_length = (MIN_HEADER_SIZE + self.payload.len()) as u16;
        header[TOTAL_LENGTH..TOTAL_LENGTH + 2].copy_from_slice(&total_length.to_be_bytes());
        header[6] = 0x40;
        header[TTL] = self.ttl;
        header[PROTOCOL] = self.protocol;
        header[SRC..SRC + 4].copy_from_slice(&self.src.octets());
        header[DST..DST + 4].copy_from_slice(&self.dst.octets());
        let sum = checksum(&header);
        header[CHECKSUM..CHECKSUM + 2].copy_from_slice(&sum.to_be_bytes());

        let mut datagram = header.to_vec();
        datagram.extend_from_slice(&self.payload);
        datagram
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const PEER: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 5);

    fn datagram() -> Vec<u8> {
        Ipv4Builder::new()
            .protocol(Protocol::Icmp as u8)
            .src_addr(HOST)
            .dst_addr(PEER)
            .payload(&[8, 0, 0, 0, 0, 1, 0, 1])
            .build()
    }

    #[test]
    fn test_decode_built_datagram() {
        let pkt = Ipv4Packet::from_bytes(&datagram()).unwrap();

        assert_eq!((pkt.src_addr(), pkt.dst_addr()), (HOST, PEER));
        assert_eq!(pkt.protocol(), Protocol::Icmp as u8);
        assert_eq!(pkt.ttl(), DEFAULT_TTL);
        assert_eq!(pkt.total_length(), 28);
        assert!(pkt.validate_checksum());
    }

    #[test]
    fn test_link_padding_is_discarded() {
        let mut data = datagram();
        data.extend_from_slice(&[0u8; 18]);

        let pkt = Ipv4Packet::from_bytes(&data).unwrap();
        assert_eq!(pkt.as_bytes().len(), 28);
        assert_eq!(pkt.payload().len(), 8);
    }

    #[test]
    fn test_malformed_datagrams() {
        assert!(Ipv4Packet::from_bytes(&[]).is_err());
        assert!(Ipv4Packet::from_bytes(&[0x45; 10]).is_err());

        let mutate = |offset: usize, bytes: &[u8]| {
            let mut data = datagram();
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
            Ipv4Packet::from_bytes(&data)
        };
        // IPv6 version nibble
        assert!(mutate(0, &[0x65]).is_err());
        // 60-byte header in a 28-byte datagram
        assert!(mutate(0, &[0x4f]).is_err());
        assert!(mutate(2, &100u16.to_be_bytes()).is_err());
        assert!(mutate(2, &10u16.to_be_bytes()).is_err());
    }

    #[test]
    fn test_hop_counting() {
        let mut pkt = Ipv4Packet::from_bytes(&datagram()).unwrap();
        assert!(pkt.decrement_ttl());
        assert_eq!(pkt.ttl(), 63);
        assert!(pkt.validate_checksum());

        pkt.set_ttl(1);
        assert!(!pkt.decrement_ttl());
        assert_eq!(pkt.ttl(), 1);
    }

    #[test]
    fn test_swap_addresses() {
        let mut pkt = Ipv4Packet::from_bytes(&datagram()).unwrap();
        pkt.swap_addresses();

        assert_eq!((pkt.src_addr(), pkt.dst_addr()), (PEER, HOST));
        assert!(pkt.validate_checksum());
    }

    #[test]
    fn test_set_payload_updates_length() {
        let mut pkt = Ipv4Packet::from_bytes(&datagram()).unwrap();
        pkt.set_payload(&[0xaa; 12]);

        assert_eq!(pkt.total_length(), 32);
        assert_eq!(pkt.payload(), &[0xaa; 12]);
        assert!(pkt.validate_checksum());
        assert_eq!(Ipv4Packet::from_bytes(pkt.as_bytes()).unwrap(), pkt);
    }

    #[test]
    fn test_checksum_odd_length() {
        assert_eq!(checksum(&[0xff]), !0xff00u16);
    }
}
