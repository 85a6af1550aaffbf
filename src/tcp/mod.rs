use std::net::Ipv4Addr;

mod connection;
mod reassembler;
mod receiver;
mod segment;
mod sender;
mod seq;
mod stream;

pub use connection::TcpConnection;
pub use reassembler::Reassembler;
pub use receiver::TcpReceiver;
pub use segment::{SegmentHeader, TcpSegment};
pub use sender::TcpSender;
pub use seq::SeqNo;
pub use stream::ByteStream;

/// Default capacity of the inbound and outbound byte streams.
pub const DEFAULT_CAPACITY: usize = 64_000;

/// Most payload bytes the sender will put in a single segment.
pub const MAX_PAYLOAD_SIZE: usize = 1_000;

/// Hard ceiling on segment payload imposed by the 16-bit IPv4 total length
/// (65535 minus a 20-byte IPv4 header and a 20-byte TCP header).
pub const MAX_SEGMENT_PAYLOAD: usize = 65_495;

/// Initial retransmission timeout in milliseconds.
pub const TIMEOUT_DFLT: u64 = 1_000;

/// Retransmissions of the same segment tolerated before the connection aborts.
pub const MAX_RETX_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dual {
    pub ipv4: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    pub src: Dual,
    pub dst: Dual,
}

impl Quad {
    /// The same connection seen from the other endpoint.
    pub fn flip(self) -> Quad {
        Quad {
            src: self.dst,
            dst: self.src,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Capacity of both the inbound and the outbound byte stream, in bytes.
    pub capacity: usize,
    /// Initial value of the retransmission timeout, in milliseconds.
    pub rt_timeout: u64,
    /// Consecutive retransmissions tolerated before aborting.
    pub max_retx_attempts: u32,
    /// Initial sequence number to use instead of a random one.
    pub fixed_isn: Option<SeqNo>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            capacity: DEFAULT_CAPACITY,
            rt_timeout: TIMEOUT_DFLT,
            max_retx_attempts: MAX_RETX_ATTEMPTS,
            fixed_isn: None,
        }
    }
}
