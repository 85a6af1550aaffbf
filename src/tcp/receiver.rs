use std::cmp;

use super::reassembler::Reassembler;
use super::segment::TcpSegment;
use super::seq::SeqNo;
use super::stream::ByteStream;

/// The receiving half of a TCP connection: validates inbound sequence
/// numbers, feeds payloads to the reassembler, and keeps the acknowledgment
/// number and advertised window up to date.
#[derive(Debug)]
pub struct TcpReceiver {
    reassembler: Reassembler,
    isn: SeqNo,
    syn_received: bool,
    fin_received: bool,
    ackno: SeqNo,
    /// Absolute sequence number of the last accepted segment, anchoring
    /// `unwrap` near the live part of the stream.
    checkpoint: u64,
}

impl TcpReceiver {
    pub fn new(capacity: usize) -> Self {
        TcpReceiver {
            reassembler: Reassembler::new(capacity),
            isn: SeqNo::default(),
            syn_received: false,
            fin_received: false,
            ackno: SeqNo::default(),
            checkpoint: 0,
        }
    }

    /// Process one inbound segment. Returns whether the segment occupied any
    /// sequence space inside the receive window or carried a SYN or FIN not
    /// seen before; everything else is dropped without effect.
    pub fn segment_received(&mut self, seg: &TcpSegment) -> bool {
        let mut new_syn = false;

        if seg.header.syn {
            if self.syn_received {
                // A second SYN neither resets nor re-handshakes.
                return false;
            }
            self.syn_received = true;
            self.isn = seg.header.seqno;
            self.ackno = self.isn + 1;
            new_syn = true;
        } else if !self.syn_received {
            return false;
        }

        /*
        From RFC 9293 S3.10.7.4, the acceptability test boils down to: does
        the segment occupy sequence numbers inside

            [RCV.NXT, RCV.NXT + RCV.WND)

        A zero receive window still admits the segment that sits exactly at
        RCV.NXT, so the window is at least one wide for this test.
        */
        let win_start = self.ackno.unwrap(self.isn, self.checkpoint);
        let win_size = cmp::max(self.window_size(), 1) as u64;

        let seg_abs = seg.header.seqno.unwrap(self.isn, self.checkpoint);
        let seg_len = cmp::max(seg.length_in_sequence_space(), 1) as u64;

        let inbound = seg_abs < win_start + win_size && seg_abs + seg_len > win_start;

        if !inbound && !new_syn {
            return false;
        }

        // A dataless segment claiming the ISN slot occupies nothing.
        if !seg.header.syn && seg_abs == 0 {
            return false;
        }

        let mut new_fin = false;
        if inbound {
            // The SYN holds the first sequence number, so payload index `i`
            // in the stream sits at absolute seqno `i + 1`.
            let index = if seg.header.syn { seg_abs } else { seg_abs - 1 };
            self.reassembler
                .push_substring(&seg.payload, index, seg.header.fin);

            if seg.header.fin && !self.fin_received {
                self.fin_received = true;
                new_fin = true;
            }

            self.checkpoint = seg_abs;
        }

        // ackno covers the SYN plus everything assembled, plus the FIN once
        // nothing is left waiting in front of it.
        let mut ack_abs = self.reassembler.first_unassembled_byte() + 1;
        if self.fin_received && self.reassembler.empty() {
            ack_abs += 1;
        }
        self.ackno = SeqNo::wrap(ack_abs, self.isn);

        inbound || new_syn || new_fin
    }

    /// `None` until a SYN has been received.
    pub fn ackno(&self) -> Option<SeqNo> {
        self.syn_received.then_some(self.ackno)
    }

    /// Free space in the inbound byte stream, advertised to the peer.
    pub fn window_size(&self) -> usize {
        self.reassembler.stream_out().remaining_capacity()
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.reassembler.unassembled_bytes()
    }

    pub fn syn_received(&self) -> bool {
        self.syn_received
    }

    pub fn fin_received(&self) -> bool {
        self.fin_received
    }

    pub fn stream_out(&self) -> &ByteStream {
        self.reassembler.stream_out()
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        self.reassembler.stream_out_mut()
    }
}
