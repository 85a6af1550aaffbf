use std::net::Ipv4Addr;

use crate::err::Error;

use super::EthernetAddress;

pub const OPCODE_REQUEST: u16 = 1;
pub const OPCODE_REPLY: u16 = 2;

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;
const HLEN_ETHERNET: u8 = 6;
const PLEN_IPV4: u8 = 4;

/// ARP packets are a fixed 28 bytes for Ethernet/IPv4.
const ARP_LEN: usize = 28;

/// An ARP packet for Ethernet hardware and IPv4 protocol addresses. Only
/// request and reply opcodes exist as far as this stack is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpMessage {
    pub opcode: u16,
    pub sender_ethernet_address: EthernetAddress,
    pub sender_ip_address: Ipv4Addr,
    pub target_ethernet_address: EthernetAddress,
    pub target_ip_address: Ipv4Addr,
}

impl ArpMessage {
    /// A broadcast question: who has `target_ip`? The target hardware
    /// address is left unspecified.
    pub fn request(
        sender_mac: EthernetAddress,
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpMessage {
            opcode: OPCODE_REQUEST,
            sender_ethernet_address: sender_mac,
            sender_ip_address: sender_ip,
            target_ethernet_address: [0; 6],
            target_ip_address: target_ip,
        }
    }

    pub fn reply(
        sender_mac: EthernetAddress,
        sender_ip: Ipv4Addr,
        target_mac: EthernetAddress,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpMessage {
            opcode: OPCODE_REPLY,
            sender_ethernet_address: sender_mac,
            sender_ip_address: sender_ip,
            target_ethernet_address: target_mac,
            target_ip_address: target_ip,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        if data.len() < ARP_LEN {
            return Err(Error::Malformed("arp"));
        }

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        let opcode = u16::from_be_bytes([data[6], data[7]]);

        if htype != HTYPE_ETHERNET
            || ptype != PTYPE_IPV4
            || data[4] != HLEN_ETHERNET
            || data[5] != PLEN_IPV4
        {
            return Err(Error::Malformed("arp"));
        }

        if opcode != OPCODE_REQUEST && opcode != OPCODE_REPLY {
            return Err(Error::Malformed("arp"));
        }

        let mut sender_mac = [0u8; 6];
        sender_mac.copy_from_slice(&data[8..14]);
        let mut target_mac = [0u8; 6];
        target_mac.copy_from_slice(&data[18..24]);

        Ok(ArpMessage {
            opcode,
            sender_ethernet_address: sender_mac,
            sender_ip_address: Ipv4Addr::new(data[14], data[15], data[16], data[17]),
            target_ethernet_address: target_mac,
            target_ip_address: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ARP_LEN);
        buf.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        buf.extend_from_slice(&PTYPE_IPV4.to_be_bytes());
        buf.push(HLEN_ETHERNET);
        buf.push(PLEN_IPV4);
        buf.extend_from_slice(&self.opcode.to_be_bytes());
        buf.extend_from_slice(&self.sender_ethernet_address);
        buf.extend_from_slice(&self.sender_ip_address.octets());
        buf.extend_from_slice(&self.target_ethernet_address);
        buf.extend_from_slice(&self.target_ip_address.octets());
        buf
    }
}
