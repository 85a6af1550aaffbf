use std::cmp;
use std::collections::VecDeque;

use tracing::{debug, warn};

use super::receiver::TcpReceiver;
use super::segment::TcpSegment;
use super::sender::TcpSender;
use super::stream::ByteStream;
use super::TcpConfig;

/*
                     RFC 9293 - S3.3.2 - Fig 5

                            +---------+ ---------\      active OPEN
                            |  CLOSED |            \    -----------
                            +---------+<---------\   \   create TCB
                              |     ^              \   \  snd SYN
                 passive OPEN |     |   CLOSE        \   \
                 ------------ |     | ----------       \   \
                  create TCB  |     | delete TCB         \   \
                              V     |                      \   \
          rcv RST (note 1)  +---------+            CLOSE    |    \
       -------------------->|  LISTEN |          ---------- |     |
      /                     +---------+          delete TCB |     |
     /           rcv SYN      |     |     SEND              |     |
    /           -----------   |     |    -------            |     V
+--------+      snd SYN,ACK  /       \   snd SYN          +--------+
|        |<-----------------           ------------------>|        |
|  SYN   |                    rcv SYN                     |  SYN   |
|  RCVD  |<-----------------------------------------------|  SENT  |
|        |                  snd SYN,ACK                   |        |
|        |------------------           -------------------|        |
+--------+   rcv ACK of SYN  \       /  rcv SYN,ACK       +--------+
   |         --------------   |     |   -----------
   |                x         |     |     snd ACK
   |                          V     V
   |  CLOSE                 +---------+
   | -------                |  ESTAB  |
   | snd FIN                +---------+
   |                 CLOSE    |     |    rcv FIN
   V                -------   |     |    -------
+---------+         snd FIN  /       \   snd ACK         +---------+
|  FIN    |<----------------          ------------------>|  CLOSE  |
| WAIT-1  |------------------                            |   WAIT  |
+---------+          rcv FIN  \                          +---------+
  | rcv ACK of FIN   -------   |                          CLOSE  |
  | --------------   snd ACK   |                         ------- |
  V        x                   V                         snd FIN V
+---------+               +---------+                    +---------+
|FINWAIT-2|               | CLOSING |                    | LAST-ACK|
+---------+               +---------+                    +---------+
  |              rcv ACK of FIN |                 rcv ACK of FIN |
  |  rcv FIN     -------------- |    Timeout=2MSL -------------- |
  |  -------            x       V    ------------        x       V
   \ snd ACK              +---------+delete TCB          +---------+
     -------------------->|TIME-WAIT|------------------->| CLOSED  |
                          +---------+                    +---------+
*/

/// A full-duplex TCP connection: one [`TcpSender`] and one [`TcpReceiver`]
/// stitched together. The diagram's states are never stored; they are all
/// derivable from the flags the two halves keep, and `active` is the summary
/// the outside world sees.
///
/// Outbound segments accumulate in `segments_out` for the embedder to drain;
/// each one is stamped with the acknowledgment number and window the
/// receiver holds at that moment.
#[derive(Debug)]
pub struct TcpConnection {
    cfg: TcpConfig,
    sender: TcpSender,
    receiver: TcpReceiver,
    segments_out: VecDeque<TcpSegment>,
    time_since_last_segment_received: u64,
    active: bool,
    /// Whether to stay around after both streams finish, absorbing a
    /// retransmitted FIN from the peer. True for the side that closed
    /// actively, false for the side whose peer finished first.
    linger_after_streams_finish: bool,
}

impl TcpConnection {
    pub fn new(cfg: TcpConfig) -> Self {
        let sender = TcpSender::new(cfg.capacity, cfg.rt_timeout, cfg.fixed_isn);
        let receiver = TcpReceiver::new(cfg.capacity);

        TcpConnection {
            cfg,
            sender,
            receiver,
            segments_out: VecDeque::new(),
            time_since_last_segment_received: 0,
            active: true,
            linger_after_streams_finish: true,
        }
    }

    /// Begin the handshake by emitting the initial SYN.
    pub fn connect(&mut self) {
        self.sender.fill_window();
        self.flush_sender();
    }

    /// Hand bytes to the outbound stream and send whatever the window allows.
    /// Returns how many bytes the stream accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let len = self.sender.stream_in_mut().write(data);
        self.sender.fill_window();
        self.flush_sender();
        len
    }

    /// Close the outbound stream; the FIN follows the remaining data out.
    pub fn end_input_stream(&mut self) {
        self.sender.stream_in_mut().end_input();
        self.sender.fill_window();
        self.flush_sender();
    }

    pub fn segment_received(&mut self, seg: &TcpSegment) {
        self.time_since_last_segment_received = 0;

        let accepted = self.receiver.segment_received(seg);

        if seg.header.rst {
            if !self.sender.syn_sent() {
                // Reset against LISTEN: nothing of ours to tear down.
                return;
            }

            if self.in_syn_sent() {
                if !seg.header.ack {
                    // A reset that acknowledges nothing cannot belong to our
                    // handshake; likely a reflection of somebody else's.
                    return;
                }

                debug!("connection refused while in SYN_SENT");
                self.sender.segments_out_mut().clear();
                self.abort();
                return;
            }

            // Resets falling outside the receive window are dropped, in the
            // spirit of the RFC 5961 blind-reset mitigation.
            if !accepted {
                return;
            }

            debug!("connection reset by peer");
            self.send_reset();
            return;
        }

        // The peer finishing first means a passive close on our side: once
        // our own FIN is acknowledged there is nothing left to wait for.
        if self.receiver.stream_out().eof()
            && !self.sender.stream_in().eof()
            && self.sender.syn_sent()
        {
            self.linger_after_streams_finish = false;
        }

        if seg.header.ack {
            if !self.sender.syn_sent() {
                // Acknowledgments mean nothing before our SYN exists.
                return;
            }

            if self.sender.ack_received(seg.header.ackno, seg.header.win) {
                self.sender.fill_window();
                self.flush_sender();
            } else {
                // An acknowledgment from the future. Before the handshake
                // completes it is part of the same reflection games as the
                // RST case above; afterwards, answer with a bare ACK so the
                // peer can resynchronize.
                if !self.sender.syn_acked() {
                    return;
                }
                self.sender.send_empty_segment();
                self.flush_sender();
            }
        }

        if seg.length_in_sequence_space() > 0 {
            // Anything occupying sequence space deserves an acknowledgment,
            // piggybacked if the sender has data, bare otherwise.
            self.sender.fill_window();
            if self.sender.segments_out_mut().is_empty() {
                self.sender.send_empty_segment();
            }
            self.flush_sender();
        }
    }

    /// Drive the clocks: the sender's retransmission timer and the linger
    /// countdown. `ms` is the time elapsed since the previous call.
    pub fn tick(&mut self, ms: u64) {
        self.time_since_last_segment_received += ms;

        self.sender.tick(ms);

        // A retransmission came out of the timer. Give up and reset the
        // peer once too many retries have gone unanswered.
        if let Some(mut seg) = self.sender.segments_out_mut().pop_front() {
            self.stamp(&mut seg);

            if self.sender.consecutive_retransmissions() > self.cfg.max_retx_attempts {
                warn!(
                    retransmissions = self.sender.consecutive_retransmissions(),
                    "retransmission limit exceeded, aborting connection"
                );
                self.abort();
                seg.header.rst = true;
            }

            self.segments_out.push_back(seg);
        }

        // Passive close finishes the moment our FIN is acknowledged.
        if !self.linger_after_streams_finish
            && self.sender.fin_sent()
            && self.sender.bytes_in_flight() == 0
        {
            self.active = false;
        }

        // Active close lingers long enough for a retransmitted FIN from the
        // peer to still get its acknowledgment.
        if self.receiver.stream_out().eof()
            && self.sender.stream_in().eof()
            && self.sender.fin_sent()
            && self.sender.bytes_in_flight() == 0
            && self.linger_after_streams_finish
            && self.time_since_last_segment_received >= 10 * self.cfg.rt_timeout
        {
            self.active = false;
        }
    }

    /// False once the connection has finished or aborted; never true again.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Both handshakes have completed.
    pub fn established(&self) -> bool {
        self.sender.syn_acked() && self.receiver.ackno().is_some()
    }

    pub fn remaining_outbound_capacity(&self) -> usize {
        self.sender.stream_in().remaining_capacity()
    }

    pub fn outbound_bytes_buffered(&self) -> usize {
        self.sender.stream_in().buffer_size()
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.sender.bytes_in_flight()
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.receiver.unassembled_bytes()
    }

    pub fn time_since_last_segment_received(&self) -> u64 {
        self.time_since_last_segment_received
    }

    /// The inbound byte stream, read side.
    pub fn inbound_stream(&self) -> &ByteStream {
        self.receiver.stream_out()
    }

    pub fn inbound_stream_mut(&mut self) -> &mut ByteStream {
        self.receiver.stream_out_mut()
    }

    /// Stamped segments waiting for the embedder to put on the wire.
    pub fn segments_out_mut(&mut self) -> &mut VecDeque<TcpSegment> {
        &mut self.segments_out
    }

    /// SYN sent but nothing acknowledged yet: the lone SYN is the only
    /// sequence number in flight.
    fn in_syn_sent(&self) -> bool {
        self.sender.next_seqno_absolute() == 1 && self.sender.bytes_in_flight() == 1
    }

    /// Fill in the fields only the connection knows: whether an ackno exists
    /// yet, its value, and the receive window clamped to the header field.
    fn stamp(&self, seg: &mut TcpSegment) {
        if let Some(ackno) = self.receiver.ackno() {
            seg.header.ack = true;
            seg.header.ackno = ackno;
        }

        seg.header.win = cmp::min(self.receiver.window_size(), u16::MAX as usize) as u16;
    }

    fn flush_sender(&mut self) {
        while let Some(mut seg) = self.sender.segments_out_mut().pop_front() {
            self.stamp(&mut seg);
            self.segments_out.push_back(seg);
        }
    }

    /// Tear down both streams and emit a single RST in place of whatever the
    /// sender had queued.
    fn send_reset(&mut self) {
        self.sender.segments_out_mut().clear();
        self.sender.send_empty_segment();

        if let Some(mut seg) = self.sender.segments_out_mut().pop_front() {
            seg.header.rst = true;
            self.stamp(&mut seg);
            self.segments_out.push_back(seg);
        }

        self.abort();
    }

    fn abort(&mut self) {
        self.sender.stream_in_mut().set_error();
        self.receiver.stream_out_mut().set_error();
        self.active = false;
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if self.active {
            warn!("unclean shutdown of an active connection");
            self.send_reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::{SegmentHeader, SeqNo, TcpSegment};

    const RTO: u64 = 1_000;

    fn conn(isn: u32) -> TcpConnection {
        TcpConnection::new(TcpConfig {
            rt_timeout: RTO,
            fixed_isn: Some(SeqNo::new(isn)),
            ..Default::default()
        })
    }

    fn pop(c: &mut TcpConnection) -> TcpSegment {
        c.segments_out_mut().pop_front().expect("segment expected")
    }

    #[test]
    fn connect_emits_a_syn() {
        let mut a = conn(100);

        a.connect();
        let syn = pop(&mut a);
        assert!(syn.header.syn);
        assert!(!syn.header.ack);
        assert_eq!(syn.header.seqno, SeqNo::new(100));
        assert!(a.segments_out_mut().is_empty());
    }

    #[test]
    fn passive_side_answers_with_syn_ack() {
        let mut a = conn(100);
        let mut b = conn(500);

        a.connect();
        let syn = pop(&mut a);
        b.segment_received(&syn);

        let syn_ack = pop(&mut b);
        assert!(syn_ack.header.syn);
        assert!(syn_ack.header.ack);
        assert_eq!(syn_ack.header.seqno, SeqNo::new(500));
        assert_eq!(syn_ack.header.ackno, SeqNo::new(101));
    }

    #[test]
    fn handshake_establishes_both_sides() {
        let mut a = conn(100);
        let mut b = conn(500);

        a.connect();
        b.segment_received(&pop(&mut a));
        a.segment_received(&pop(&mut b));
        assert!(a.established());

        // the bare ACK completing the handshake
        let ack = pop(&mut a);
        assert!(ack.header.ack);
        assert!(!ack.header.syn);
        assert_eq!(ack.header.ackno, SeqNo::new(501));

        b.segment_received(&ack);
        assert!(b.established());
        assert!(b.segments_out_mut().is_empty());
    }

    #[test]
    fn stamped_segments_carry_ackno_and_window() {
        let mut a = conn(100);
        let mut b = conn(500);

        a.connect();
        b.segment_received(&pop(&mut a));
        a.segment_received(&pop(&mut b));
        let ack = pop(&mut a);
        assert_eq!(ack.header.win as usize, a.remaining_outbound_capacity().min(u16::MAX as usize));
        b.segment_received(&ack);

        a.write(b"x");
        let data = pop(&mut a);
        assert_eq!(data.payload, b"x");
        assert_eq!(data.header.seqno, SeqNo::new(101));
        assert!(data.header.ack);
        assert_eq!(data.header.ackno, SeqNo::new(501));

        b.segment_received(&data);
        assert_eq!(b.inbound_stream_mut().read(4), b"x");
        let ack = pop(&mut b);
        assert_eq!(ack.header.ackno, SeqNo::new(102));
    }

    #[test]
    fn inbound_data_gets_a_bare_ack() {
        let mut a = conn(100);
        let mut b = conn(500);

        a.connect();
        b.segment_received(&pop(&mut a));
        a.segment_received(&pop(&mut b));
        b.segment_received(&pop(&mut a));

        b.write(b"hello");
        a.segment_received(&pop(&mut b));

        let ack = pop(&mut a);
        assert!(ack.header.ack);
        assert!(ack.payload.is_empty());
        assert_eq!(ack.header.ackno, SeqNo::new(506));
        assert_eq!(a.inbound_stream_mut().read(8), b"hello");
    }

    #[test]
    fn reset_received_errors_both_streams() {
        let mut a = conn(100);
        let mut b = conn(500);

        a.connect();
        b.segment_received(&pop(&mut a));
        a.segment_received(&pop(&mut b));
        pop(&mut a);

        // a RST at the receiver's exact expected seqno
        let rst = TcpSegment {
            header: SegmentHeader {
                seqno: SeqNo::new(501),
                rst: true,
                ..Default::default()
            },
            payload: Vec::new(),
        };
        a.segment_received(&rst);

        assert!(!a.active());
        assert!(a.inbound_stream().error());
        // our own RST goes out in response
        let out = pop(&mut a);
        assert!(out.header.rst);
    }

    #[test]
    fn out_of_window_reset_is_ignored() {
        let mut a = conn(100);
        let mut b = conn(500);

        a.connect();
        b.segment_received(&pop(&mut a));
        a.segment_received(&pop(&mut b));
        pop(&mut a);

        let rst = TcpSegment {
            header: SegmentHeader {
                seqno: SeqNo::new(490),
                rst: true,
                ..Default::default()
            },
            payload: Vec::new(),
        };
        a.segment_received(&rst);

        assert!(a.active());
        assert!(!a.inbound_stream().error());
        assert!(a.segments_out_mut().is_empty());
    }

    #[test]
    fn ackless_reset_in_syn_sent_is_ignored() {
        let mut a = conn(100);

        a.connect();
        pop(&mut a);

        let rst = TcpSegment {
            header: SegmentHeader {
                seqno: SeqNo::new(0),
                rst: true,
                ..Default::default()
            },
            payload: Vec::new(),
        };
        a.segment_received(&rst);
        assert!(a.active());
    }

    #[test]
    fn acked_reset_in_syn_sent_kills_the_connection_silently() {
        let mut a = conn(100);

        a.connect();
        pop(&mut a);

        let rst = TcpSegment {
            header: SegmentHeader {
                seqno: SeqNo::new(0),
                ackno: SeqNo::new(101),
                ack: true,
                rst: true,
                ..Default::default()
            },
            payload: Vec::new(),
        };
        a.segment_received(&rst);

        assert!(!a.active());
        assert!(a.inbound_stream().error());
        assert!(a.segments_out_mut().is_empty());
    }

    #[test]
    fn retransmission_limit_turns_into_a_reset() {
        let mut a = conn(100);

        a.connect();
        pop(&mut a);

        let mut rto = RTO;
        for _ in 0..crate::tcp::MAX_RETX_ATTEMPTS {
            a.tick(rto);
            let seg = pop(&mut a);
            assert!(seg.header.syn);
            assert!(!seg.header.rst);
            rto *= 2;
        }

        a.tick(rto);
        let seg = pop(&mut a);
        assert!(seg.header.rst);
        assert!(!a.active());
        assert!(a.inbound_stream().error());
    }

    #[test]
    fn future_ack_draws_a_keepalive_shaped_ack() {
        let mut a = conn(100);
        let mut b = conn(500);

        a.connect();
        b.segment_received(&pop(&mut a));
        a.segment_received(&pop(&mut b));
        pop(&mut a);

        let future = TcpSegment {
            header: SegmentHeader {
                seqno: SeqNo::new(501),
                ackno: SeqNo::new(150),
                ack: true,
                ..Default::default()
            },
            payload: Vec::new(),
        };
        a.segment_received(&future);

        let out = pop(&mut a);
        assert!(out.header.ack);
        assert!(out.payload.is_empty());
        assert_eq!(out.header.ackno, SeqNo::new(501));
    }

    #[test]
    fn active_closer_lingers_for_ten_timeouts() {
        let mut a = conn(100);
        let mut b = conn(500);

        a.connect();
        b.segment_received(&pop(&mut a));
        a.segment_received(&pop(&mut b));
        b.segment_received(&pop(&mut a));

        // a closes first
        a.end_input_stream();
        let fin = pop(&mut a);
        assert!(fin.header.fin);
        b.segment_received(&fin);

        // b acknowledges and closes in turn
        a.segment_received(&pop(&mut b));
        b.end_input_stream();
        let fin = pop(&mut b);
        assert!(fin.header.fin);
        a.segment_received(&fin);
        b.segment_received(&pop(&mut a));

        // b closed passively and is done immediately
        b.tick(1);
        assert!(!b.active());

        // a absorbs retransmitted FINs for ten timeouts before closing
        a.tick(10 * RTO - 1);
        assert!(a.active());
        a.tick(1);
        assert!(!a.active());
    }
}
