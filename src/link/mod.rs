use etherparse::{Ethernet2Header, Ipv4Header, Ipv4HeaderSlice};

use crate::err::Error;

mod arp;
mod iface;

pub use arp::{ArpMessage, OPCODE_REPLY, OPCODE_REQUEST};
pub use iface::{NetworkInterface, ARP_CACHE_TTL, ARP_PENDING_TTL};

pub type EthernetAddress = [u8; 6];

pub const ETHERNET_BROADCAST: EthernetAddress = [0xff; 6];

/// EtherType value for IPv4 frames.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// EtherType value for ARP frames.
pub const ETHERTYPE_ARP: u16 = 0x0806;

const ETH_HEADER_LEN: usize = 14;

/// An Ethernet II frame: 14-byte header plus an opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EthernetFrame {
    pub header: Ethernet2Header,
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn new(
        dst: EthernetAddress,
        src: EthernetAddress,
        ether_type: u16,
        payload: Vec<u8>,
    ) -> Self {
        EthernetFrame {
            header: Ethernet2Header {
                destination: dst,
                source: src,
                ether_type,
            },
            payload,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        let (header, payload) = Ethernet2Header::from_slice(buf)?;

        Ok(EthernetFrame {
            header,
            payload: payload.to_vec(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ETH_HEADER_LEN + self.payload.len());
        self.header.write(&mut buf).unwrap();
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// An IPv4 datagram. The TCP core treats it as opaque cargo; only the
/// network interface and the framing layer look inside.
#[derive(Debug, Clone, PartialEq)]
pub struct InternetDatagram {
    pub header: Ipv4Header,
    pub payload: Vec<u8>,
}

impl InternetDatagram {
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        let slice = Ipv4HeaderSlice::from_slice(buf)?;

        let header_len = (slice.ihl() * 4) as usize;
        let total_len = header_len + slice.payload_len() as usize;
        if buf.len() < total_len {
            return Err(Error::Malformed("ipv4"));
        }

        Ok(InternetDatagram {
            header: slice.to_header(),
            payload: buf[header_len..total_len].to_vec(),
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 20);
        self.header.write(&mut buf).unwrap();
        buf.extend_from_slice(&self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ethernet_frame_roundtrips() {
        let frame = EthernetFrame::new(
            [0xbb; 6],
            [0xaa; 6],
            ETHERTYPE_IPV4,
            b"payload".to_vec(),
        );

        let bytes = frame.serialize();
        assert_eq!(bytes.len(), 14 + 7);
        assert_eq!(&bytes[..6], &[0xbb; 6]);
        assert_eq!(&bytes[6..12], &[0xaa; 6]);
        assert_eq!(&bytes[12..14], &[0x08, 0x00]);

        let parsed = EthernetFrame::parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert!(EthernetFrame::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn datagram_roundtrips() {
        let dgram = InternetDatagram {
            header: Ipv4Header::new(4, 64, 17, [10, 0, 0, 1], [10, 0, 0, 2]),
            payload: b"data".to_vec(),
        };

        let bytes = dgram.serialize();
        let parsed = InternetDatagram::parse(&bytes).unwrap();
        assert_eq!(parsed.payload, b"data");
        assert_eq!(parsed.header.source, [10, 0, 0, 1]);
        assert_eq!(parsed.header.destination, [10, 0, 0, 2]);
    }
}
