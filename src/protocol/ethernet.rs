//! Ethernet II framing with optional 802.1Q tag

use super::{EtherType, MacAddr, VlanTag};
use crate::{Error, Result};

/// Destination, source, EtherType
pub const HEADER_SIZE: usize = 14;
/// TPID + TCI
pub const VLAN_TAG_SIZE: usize = 4;

/// Owned Ethernet frame as it travels through the switch.
///
/// The 802.1Q tag is held apart from the header so ports can stamp or strip
/// it without re-slicing the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub vlan: Option<VlanTag>,
    pub ethertype: u16,
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn new(dst: MacAddr, src: MacAddr, ethertype: u16, payload: Vec<u8>) -> Self {
        Self {
            dst,
            src,
            vlan: None,
            ethertype,
            payload,
        }
    }

    /// Decode a frame read off a link
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Ethernet frame of {} bytes",
                buffer.len()
            )));
        }
        let word = |at: usize| u16::from_be_bytes([buffer[at], buffer[at + 1]]);
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&buffer[..6]);
        src.copy_from_slice(&buffer[6..12]);

        let mut offset = 12;
        let mut vlan = None;
        if word(offset) == EtherType::Vlan as u16 {
            if buffer.len() < HEADER_SIZE + VLAN_TAG_SIZE {
                return Err(Error::InvalidPacket("truncated 802.1Q header".into()));
            }
            vlan = Some(VlanTag::from_bytes([buffer[14], buffer[15]]));
            offset += VLAN_TAG_SIZE;
        }

        Ok(Self {
            dst: MacAddr(dst),
            src: MacAddr(src),
            vlan,
            ethertype: word(offset),
            payload: buffer[offset + 2..].to_vec(),
        })
    }

    /// Encode for transmission, inserting the 802.1Q header when tagged
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&self.dst.0);
        out.extend_from_slice(&self.src.0);
        if let Some(tag) = self.vlan {
            out.extend_from_slice(&(EtherType::Vlan as u16).to_be_bytes());
            out.extend_from_slice(&tag.to_bytes());
        }
        out.extend_from_slice(&self.ethertype.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn with_vlan(mut self, vid: u16) -> Self {
        self.set_vlan(vid);
        self
    }

    pub fn vlan_id(&self) -> Option<u16> {
        self.vlan.map(|tag| tag.vid)
    }

    /// Tag the frame, keeping the priority bits of an existing tag
    pub fn set_vlan(&mut self, vid: u16) {
        let tag = self.vlan.get_or_insert_with(|| VlanTag::new(vid));
        tag.vid = VlanTag::new(vid).vid;
    }

    pub fn strip_vlan(&mut self) -> Option<VlanTag> {
        self.vlan.take()
    }

    pub fn is_ethertype(&self, ethertype: EtherType) -> bool {
        self.ethertype == ethertype as u16
    }

    /// Length of the encoded frame
    pub fn wire_len(&self) -> usize {
        let tag = self.vlan.map_or(0, |_| VLAN_TAG_SIZE);
        HEADER_SIZE + tag + self.payload.len()
    }
}
