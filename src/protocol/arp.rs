//! ARP (RFC 826)

use super::{EtherType, EthernetFrame, MacAddr};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Ethernet/IPv4 ARP body length
pub const ARP_PACKET_SIZE: usize = 28;

/// htype 1 (Ethernet), ptype 0x0800, hlen 6, plen 4
const ETHERNET_IPV4_PREAMBLE: [u8; 6] = [0x00, 0x01, 0x08, 0x00, 6, 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

impl ArpOp {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(ArpOp::Request),
            2 => Some(ArpOp::Reply),
            _ => None,
        }
    }
}

/// ARP for IPv4 over Ethernet, the only kind the switch speaks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

fn mac_at(buffer: &[u8], offset: usize) -> MacAddr {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buffer[offset..offset + 6]);
    MacAddr(mac)
}

fn ip_at(buffer: &[u8], offset: usize) -> Ipv4Addr {
    let mut ip = [0u8; 4];
    ip.copy_from_slice(&buffer[offset..offset + 4]);
    Ipv4Addr::from(ip)
}

impl ArpPacket {
    /// Decode an ARP body. Trailing padding is ignored.
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ARP_PACKET_SIZE {
            return Err(Error::InvalidPacket(format!(
                "ARP body of {} bytes",
                buffer.len()
            )));
        }
        if buffer[..6] != ETHERNET_IPV4_PREAMBLE {
            return Err(Error::InvalidPacket(
                "ARP is not IPv4 over Ethernet".into(),
            ));
        }
        let op = u16::from_be_bytes([buffer[6], buffer[7]]);
        let operation = ArpOp::from_u16(op)
            .ok_or_else(|| Error::InvalidPacket(format!("ARP operation {}", op)))?;

        Ok(Self {
            operation,
            sender_mac: mac_at(buffer, 8),
            sender_ip: ip_at(buffer, 14),
            target_mac: mac_at(buffer, 18),
            target_ip: ip_at(buffer, 24),
        })
    }

    pub fn to_bytes(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        buf[..6].copy_from_slice(&ETHERNET_IPV4_PREAMBLE);
        buf[6..8].copy_from_slice(&(self.operation as u16).to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..].copy_from_slice(&self.target_ip.octets());
        buf
    }

    /// Who-has `target_ip`, with the target MAC left zero
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            operation: ArpOp::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Build the reply announcing `local_mac` as the owner of this request's target IP
    pub fn answer(&self, local_mac: MacAddr) -> Self {
        Self::reply(local_mac, self.target_ip, self.sender_mac, self.sender_ip)
    }

    /// Wrap the packet in an Ethernet frame from its sender MAC
    pub fn into_frame(self, dst: MacAddr) -> EthernetFrame {
        EthernetFrame::new(
            dst,
            self.sender_mac,
            EtherType::Arp as u16,
            self.to_bytes().to_vec(),
        )
    }
}
