use std::cmp;
use std::collections::VecDeque;

use tracing::debug;

use super::segment::TcpSegment;
use super::seq::SeqNo;
use super::stream::ByteStream;
use super::{MAX_PAYLOAD_SIZE, MAX_SEGMENT_PAYLOAD};

/// The sending half of a TCP connection: slices the outbound byte stream
/// into segments, keeps every unacknowledged segment for retransmission, and
/// backs the timeout off exponentially while the oldest one stays unacked.
///
/// Segments leave through `segments_out`; the connection stamps ack and
/// window fields on them. Segments also enter `outstanding` in send order and
/// stay there until an acknowledgment covers their last sequence number.
#[derive(Debug)]
pub struct TcpSender {
    isn: SeqNo,
    stream: ByteStream,
    segments_out: VecDeque<TcpSegment>,
    outstanding: VecDeque<TcpSegment>,

    /// Absolute sequence number of the next byte to be sent.
    next_seqno: u64,
    /// Absolute sequence number up to which segments have been retired.
    retired_seqno: u64,
    /// Receiver's advertised window from the last acceptable acknowledgment.
    window: u16,
    in_flight: u64,

    syn_sent: bool,
    fin_sent: bool,
    /// Whether any acceptable acknowledgment has arrived since the SYN.
    syn_acked: bool,

    initial_rto: u64,
    rto: u64,
    elapsed: u64,
    retransmissions: u32,
}

impl TcpSender {
    pub fn new(capacity: usize, retx_timeout: u64, fixed_isn: Option<SeqNo>) -> Self {
        TcpSender {
            isn: fixed_isn.unwrap_or_else(|| SeqNo::new(rand::random())),
            stream: ByteStream::new(capacity),
            segments_out: VecDeque::new(),
            outstanding: VecDeque::new(),
            next_seqno: 0,
            retired_seqno: 0,
            window: 1,
            in_flight: 0,
            syn_sent: false,
            fin_sent: false,
            syn_acked: false,
            initial_rto: retx_timeout,
            rto: retx_timeout,
            elapsed: 0,
            retransmissions: 0,
        }
    }

    /// Emit as many segments as the receiver's window permits: first the
    /// SYN, then payload sliced off the outbound stream, finally the FIN
    /// once the stream ends and the window has room for it.
    pub fn fill_window(&mut self) {
        if !self.syn_sent {
            let mut seg = TcpSegment::default();
            seg.header.syn = true;
            self.syn_sent = true;
            self.send(seg);
            return;
        }

        // No data until the SYN itself has been acknowledged.
        if !self.syn_acked {
            return;
        }

        /*
        From RFC 9293 S3.8.6.1:
            The sending TCP peer must regularly transmit at least one octet
            of new data (if available), or retransmit to the receiving TCP
            peer even if the send window is zero, in order to "probe" the
            window.

        A zero window therefore counts as one for filling purposes; the one
        byte that goes out draws the window update out of the peer.
        */
        let window = cmp::max(self.window as u64, 1);

        while self.in_flight < window && !self.fin_sent {
            let room = window - self.in_flight;
            let take = cmp::min(room, cmp::min(MAX_PAYLOAD_SIZE, MAX_SEGMENT_PAYLOAD) as u64);

            let mut seg = TcpSegment::new(self.stream.read(take as usize));

            if self.stream.eof() && (seg.payload.len() as u64) < room {
                seg.header.fin = true;
                self.fin_sent = true;
            }

            if seg.length_in_sequence_space() == 0 {
                return;
            }

            self.send(seg);
        }
    }

    /// Process an acknowledgment. Returns `false` if `ackno` acknowledges
    /// sequence numbers this sender has never sent.
    pub fn ack_received(&mut self, ackno: SeqNo, window: u16) -> bool {
        let abs_ackno = ackno.unwrap(self.isn, self.next_seqno);
        if abs_ackno > self.next_seqno {
            return false;
        }

        self.window = window;

        if abs_ackno <= self.retired_seqno {
            // Duplicate acknowledgment; the window update above still counts.
            return true;
        }

        self.syn_acked = true;

        while let Some(seg) = self.outstanding.front() {
            let seg_abs = seg.header.seqno.unwrap(self.isn, self.next_seqno);
            let end = seg_abs + seg.length_in_sequence_space() as u64;
            if end > abs_ackno {
                break;
            }

            self.in_flight -= seg.length_in_sequence_space() as u64;
            self.retired_seqno = end;
            self.outstanding.pop_front();
        }

        self.fill_window();

        self.elapsed = 0;
        self.retransmissions = 0;
        self.rto = self.initial_rto;

        true
    }

    /// Advance the retransmission timer. When it expires with segments still
    /// outstanding, resend the oldest one and double the timeout.
    pub fn tick(&mut self, ms: u64) {
        self.elapsed += ms;

        if self.elapsed < self.rto {
            return;
        }

        if let Some(seg) = self.outstanding.front() {
            debug!(
                seqno = %seg.header.seqno,
                rto = self.rto,
                retransmissions = self.retransmissions + 1,
                "retransmitting oldest outstanding segment"
            );

            self.segments_out.push_back(seg.clone());
            self.retransmissions += 1;
            self.rto = self.rto.saturating_mul(2);
            self.elapsed = 0;
        }
    }

    /// Emit a zero-length segment carrying the current seqno. It occupies no
    /// sequence space and is never retransmitted; the connection uses it for
    /// bare acknowledgments.
    pub fn send_empty_segment(&mut self) {
        let mut seg = TcpSegment::default();
        seg.header.seqno = SeqNo::wrap(self.next_seqno, self.isn);
        self.segments_out.push_back(seg);
    }

    fn send(&mut self, mut seg: TcpSegment) {
        seg.header.seqno = SeqNo::wrap(self.next_seqno, self.isn);

        let len = seg.length_in_sequence_space() as u64;
        self.next_seqno += len;
        self.in_flight += len;

        // The timer tracks the oldest outstanding segment; starting a fresh
        // flight restarts it.
        if self.outstanding.is_empty() {
            self.elapsed = 0;
        }

        self.segments_out.push_back(seg.clone());
        self.outstanding.push_back(seg);
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.in_flight
    }

    pub fn consecutive_retransmissions(&self) -> u32 {
        self.retransmissions
    }

    pub fn next_seqno_absolute(&self) -> u64 {
        self.next_seqno
    }

    pub fn next_seqno(&self) -> SeqNo {
        SeqNo::wrap(self.next_seqno, self.isn)
    }

    pub fn syn_sent(&self) -> bool {
        self.syn_sent
    }

    pub fn fin_sent(&self) -> bool {
        self.fin_sent
    }

    pub fn syn_acked(&self) -> bool {
        self.syn_acked
    }

    pub fn stream_in(&self) -> &ByteStream {
        &self.stream
    }

    pub fn stream_in_mut(&mut self) -> &mut ByteStream {
        &mut self.stream
    }

    pub fn segments_out_mut(&mut self) -> &mut VecDeque<TcpSegment> {
        &mut self.segments_out
    }
}
