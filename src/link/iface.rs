use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use tracing::{debug, trace};

use super::arp::{self, ArpMessage};
use super::{EthernetAddress, EthernetFrame, InternetDatagram};
use super::{ETHERNET_BROADCAST, ETHERTYPE_ARP, ETHERTYPE_IPV4};

/// How long a learned IP-to-Ethernet mapping stays valid.
pub const ARP_CACHE_TTL: u64 = 30_000;
/// How long an unanswered ARP request suppresses duplicates.
pub const ARP_PENDING_TTL: u64 = 5_000;

#[derive(Debug)]
struct ArpEntry {
    eth_addr: EthernetAddress,
    ttl: u64,
}

/// Datagrams parked while their next hop resolves.
#[derive(Debug)]
struct ArpPending {
    datagrams: Vec<InternetDatagram>,
    ttl: u64,
}

/// Connects the internet layer to Ethernet: wraps outbound datagrams into
/// frames, resolving next-hop hardware addresses over ARP, and unwraps
/// inbound frames, learning mappings and answering requests along the way.
///
/// Outbound frames pile up in an internal queue for the embedder to drain;
/// nothing is transmitted directly.
#[derive(Debug)]
pub struct NetworkInterface {
    ethernet_address: EthernetAddress,
    ip_address: Ipv4Addr,
    frames_out: VecDeque<EthernetFrame>,
    arp_cache: HashMap<Ipv4Addr, ArpEntry>,
    pending: HashMap<Ipv4Addr, ArpPending>,
}

impl NetworkInterface {
    pub fn new(ethernet_address: EthernetAddress, ip_address: Ipv4Addr) -> Self {
        NetworkInterface {
            ethernet_address,
            ip_address,
            frames_out: VecDeque::new(),
            arp_cache: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Queue `dgram` for transmission to `next_hop`. If the hardware address
    /// of the next hop is unknown, the datagram waits behind a single ARP
    /// request; further datagrams for the same hop coalesce onto it.
    pub fn send_datagram(&mut self, dgram: InternetDatagram, next_hop: Ipv4Addr) {
        if let Some(entry) = self.arp_cache.get(&next_hop) {
            self.frames_out.push_back(EthernetFrame::new(
                entry.eth_addr,
                self.ethernet_address,
                ETHERTYPE_IPV4,
                dgram.serialize(),
            ));
            return;
        }

        if let Some(pending) = self.pending.get_mut(&next_hop) {
            // A request for this hop is already in flight.
            pending.datagrams.push(dgram);
            return;
        }

        trace!(%next_hop, "sending ARP request");
        let request = ArpMessage::request(self.ethernet_address, self.ip_address, next_hop);
        self.frames_out.push_back(EthernetFrame::new(
            ETHERNET_BROADCAST,
            self.ethernet_address,
            ETHERTYPE_ARP,
            request.serialize(),
        ));

        self.pending.insert(
            next_hop,
            ArpPending {
                datagrams: vec![dgram],
                ttl: ARP_PENDING_TTL,
            },
        );
    }

    /// Process one inbound frame. Frames addressed to neither us nor the
    /// broadcast address are dropped, ARP traffic is consumed, and an IPv4
    /// payload is handed back up the stack.
    pub fn recv_frame(&mut self, frame: &EthernetFrame) -> Option<InternetDatagram> {
        if frame.header.destination != ETHERNET_BROADCAST
            && frame.header.destination != self.ethernet_address
        {
            return None;
        }

        match frame.header.ether_type {
            ETHERTYPE_ARP => {
                let Ok(message) = ArpMessage::parse(&frame.payload) else {
                    return None;
                };

                if message.target_ip_address != self.ip_address {
                    return None;
                }

                self.learn(message.sender_ip_address, message.sender_ethernet_address);

                match message.opcode {
                    arp::OPCODE_REPLY => {
                        // The hop resolved; everything parked behind the
                        // request goes out at once, in submission order.
                        if let Some(pending) = self.pending.remove(&message.sender_ip_address) {
                            for dgram in pending.datagrams {
                                self.frames_out.push_back(EthernetFrame::new(
                                    message.sender_ethernet_address,
                                    self.ethernet_address,
                                    ETHERTYPE_IPV4,
                                    dgram.serialize(),
                                ));
                            }
                        }
                    }
                    arp::OPCODE_REQUEST => {
                        trace!(sender = %message.sender_ip_address, "answering ARP request");
                        let reply = ArpMessage::reply(
                            self.ethernet_address,
                            self.ip_address,
                            message.sender_ethernet_address,
                            message.sender_ip_address,
                        );
                        self.frames_out.push_back(EthernetFrame::new(
                            message.sender_ethernet_address,
                            self.ethernet_address,
                            ETHERTYPE_ARP,
                            reply.serialize(),
                        ));
                    }
                    _ => {}
                }

                None
            }
            ETHERTYPE_IPV4 => InternetDatagram::parse(&frame.payload).ok(),
            _ => None,
        }
    }

    /// Expire ARP state. A pending request that times out is simply
    /// forgotten along with its datagrams; the next send reissues one.
    pub fn tick(&mut self, ms: u64) {
        self.arp_cache.retain(|ip, entry| {
            if entry.ttl <= ms {
                debug!(%ip, "ARP cache entry expired");
                false
            } else {
                entry.ttl -= ms;
                true
            }
        });

        self.pending.retain(|ip, pending| {
            if pending.ttl <= ms {
                debug!(%ip, dropped = pending.datagrams.len(), "ARP request expired");
                false
            } else {
                pending.ttl -= ms;
                true
            }
        });
    }

    pub fn frames_out_mut(&mut self) -> &mut VecDeque<EthernetFrame> {
        &mut self.frames_out
    }

    fn learn(&mut self, ip: Ipv4Addr, eth_addr: EthernetAddress) {
        self.arp_cache.insert(
            ip,
            ArpEntry {
                eth_addr,
                ttl: ARP_CACHE_TTL,
            },
        );
    }
}
