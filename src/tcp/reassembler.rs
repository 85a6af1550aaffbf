use std::cmp;
use std::collections::BTreeMap;

use super::stream::ByteStream;

/// Assembles substrings of a logical byte stream, possibly received out of
/// order and possibly overlapping, into the in-order [`ByteStream`] it owns.
///
/// The capacity bound is shared between the two sides: bytes already sitting
/// in the output stream plus bytes parked here waiting for a gap to close
/// never exceed `capacity`. Substrings reaching past that bound are clipped,
/// which keeps memory finite no matter how adversarially the peer reorders.
#[derive(Debug)]
pub struct Reassembler {
    output: ByteStream,
    /// Parked substrings keyed by their first index. Pairwise disjoint and
    /// non-adjacent: anything touching gets coalesced on insert.
    pending: BTreeMap<u64, Vec<u8>>,
    pending_bytes: usize,
    capacity: usize,
    eof: bool,
}

impl Reassembler {
    pub fn new(capacity: usize) -> Self {
        Reassembler {
            output: ByteStream::new(capacity),
            pending: BTreeMap::new(),
            pending_bytes: 0,
            capacity,
            eof: false,
        }
    }

    /// Ingest the substring `data` whose first byte sits at `index` in the
    /// logical stream. `eof` marks it as carrying the end of the stream, which
    /// is disregarded if the capacity bound clips the tail of the data.
    pub fn push_substring(&mut self, data: &[u8], index: u64, eof: bool) {
        let first_unassembled = self.output.bytes_written();
        let window_end = first_unassembled + self.output.remaining_capacity() as u64;

        let data_end = index + data.len() as u64;
        if eof && data_end <= window_end {
            self.eof = true;
        }

        // Clip to [first_unassembled, window_end): bytes below are already
        // assembled, bytes above do not fit.
        let begin = cmp::max(index, first_unassembled);
        let end = cmp::min(data_end, window_end);

        if begin < end {
            let mut start = begin;
            let mut frag = data[(begin - index) as usize..(end - index) as usize].to_vec();

            // Coalesce with every parked substring that overlaps or abuts the
            // clipped range. One gather pass suffices: parked substrings never
            // touch each other, so nothing new becomes adjacent afterwards.
            let touching: Vec<u64> = self
                .pending
                .range(..=end)
                .filter(|(&k, v)| k + v.len() as u64 >= start)
                .map(|(&k, _)| k)
                .collect();

            for key in touching {
                if let Some(other) = self.pending.remove(&key) {
                    self.pending_bytes -= other.len();
                    let (merged_start, merged) = union(start, frag, key, other);
                    start = merged_start;
                    frag = merged;
                }
            }

            if start == first_unassembled {
                let accepted = self.output.write(&frag);
                if accepted < frag.len() {
                    // The output had less room than the fragment has bytes;
                    // park the leftover.
                    let rest = frag[accepted..].to_vec();
                    self.pending_bytes += rest.len();
                    self.pending.insert(start + accepted as u64, rest);
                }
            } else {
                self.pending_bytes += frag.len();
                self.pending.insert(start, frag);
            }
        }

        if self.eof && self.pending.is_empty() {
            self.output.end_input();
        }
    }

    /// Bytes parked but not yet assembled, each counted once.
    pub fn unassembled_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// No substrings are waiting for a gap to close.
    pub fn empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn first_unassembled_byte(&self) -> u64 {
        self.output.bytes_written()
    }

    /// Whether the end of the stream has been seen (and survived clipping).
    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn stream_out(&self) -> &ByteStream {
        &self.output
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        &mut self.output
    }
}

/// Union of two overlapping or adjacent substrings. Overlapping content is
/// assumed identical, so the earlier one wins byte-for-byte.
fn union(a_start: u64, a: Vec<u8>, b_start: u64, b: Vec<u8>) -> (u64, Vec<u8>) {
    let (lo_start, mut lo, hi_start, hi) = if a_start <= b_start {
        (a_start, a, b_start, b)
    } else {
        (b_start, b, a_start, a)
    };

    let lo_end = lo_start + lo.len() as u64;
    let hi_end = hi_start + hi.len() as u64;

    if hi_end > lo_end {
        lo.extend_from_slice(&hi[(lo_end - hi_start) as usize..]);
    }

    (lo_start, lo)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembled(r: &mut Reassembler) -> Vec<u8> {
        let n = r.stream_out().buffer_size();
        r.stream_out_mut().read(n)
    }

    #[test]
    fn in_order_substrings_flow_straight_through() {
        let mut r = Reassembler::new(64);

        r.push_substring(b"ab", 0, false);
        r.push_substring(b"cd", 2, false);
        assert_eq!(r.first_unassembled_byte(), 4);
        assert_eq!(r.unassembled_bytes(), 0);
        assert_eq!(assembled(&mut r), b"abcd");
    }

    #[test]
    fn out_of_order_substrings_merge() {
        let mut r = Reassembler::new(64);

        r.push_substring(b"cd", 2, false);
        assert_eq!(r.first_unassembled_byte(), 0);
        assert_eq!(r.unassembled_bytes(), 2);

        r.push_substring(b"ab", 0, false);
        assert_eq!(r.first_unassembled_byte(), 4);
        assert!(r.empty());
        assert_eq!(assembled(&mut r), b"abcd");
    }

    #[test]
    fn overlapping_substrings_count_each_byte_once() {
        let mut r = Reassembler::new(64);

        r.push_substring(b"bcd", 1, false);
        r.push_substring(b"cdef", 2, false);
        assert_eq!(r.unassembled_bytes(), 5);

        r.push_substring(b"a", 0, false);
        assert_eq!(assembled(&mut r), b"abcdef");
        assert!(r.empty());
    }

    #[test]
    fn adjacent_substrings_coalesce_in_pending() {
        let mut r = Reassembler::new(64);

        r.push_substring(b"cc", 2, false);
        r.push_substring(b"ee", 4, false);
        // one parked run now, still detached from index 0
        assert_eq!(r.unassembled_bytes(), 4);

        r.push_substring(b"aa", 0, false);
        assert_eq!(r.first_unassembled_byte(), 6);
        assert_eq!(assembled(&mut r), b"aaccee");
    }

    #[test]
    fn fills_a_hole_between_two_islands() {
        let mut r = Reassembler::new(64);

        r.push_substring(b"a", 0, false);
        r.push_substring(b"c", 2, false);
        r.push_substring(b"e", 4, false);
        assert_eq!(r.unassembled_bytes(), 2);

        r.push_substring(b"bcd", 1, false);
        assert_eq!(assembled(&mut r), b"abcde");
        assert!(r.empty());
    }

    #[test]
    fn old_bytes_are_dropped() {
        let mut r = Reassembler::new(64);

        r.push_substring(b"abcd", 0, false);
        r.push_substring(b"abcd", 0, false);
        r.push_substring(b"cdef", 2, false);
        assert_eq!(r.first_unassembled_byte(), 6);
        assert_eq!(assembled(&mut r), b"abcdef");
    }

    #[test]
    fn capacity_clamp_drops_the_far_end_and_the_eof() {
        let mut r = Reassembler::new(4);

        r.push_substring(b"abcdef", 0, true);
        assert_eq!(r.stream_out().buffer_size(), 4);
        assert!(r.empty());
        assert!(!r.eof());
        assert!(!r.stream_out().input_ended());
        assert_eq!(assembled(&mut r), b"abcd");

        // with room freed, the retransmitted tail completes the stream
        r.push_substring(b"ef", 4, true);
        assert!(r.eof());
        assert!(r.stream_out().input_ended());
        assert_eq!(assembled(&mut r), b"ef");
    }

    #[test]
    fn pending_bytes_beyond_window_are_clipped() {
        let mut r = Reassembler::new(4);

        // detached substring reaching past the window keeps only what fits
        r.push_substring(b"bcdef", 1, false);
        assert_eq!(r.unassembled_bytes(), 3);

        r.push_substring(b"a", 0, false);
        assert_eq!(assembled(&mut r), b"abcd");
    }

    #[test]
    fn eof_waits_for_pending_to_drain() {
        let mut r = Reassembler::new(64);

        r.push_substring(b"b", 1, true);
        assert!(r.eof());
        assert!(!r.stream_out().input_ended());

        r.push_substring(b"a", 0, false);
        assert!(r.stream_out().input_ended());
        assert_eq!(assembled(&mut r), b"ab");
        assert!(r.stream_out().eof());
    }

    #[test]
    fn empty_substring_with_eof_ends_the_stream() {
        let mut r = Reassembler::new(64);

        r.push_substring(b"ab", 0, false);
        r.push_substring(b"", 2, true);
        assert!(r.stream_out().input_ended());
        assert_eq!(assembled(&mut r), b"ab");
        assert!(r.stream_out().eof());
    }

    #[test]
    fn shared_capacity_accounts_for_unread_output() {
        let mut r = Reassembler::new(4);

        r.push_substring(b"ab", 0, false);
        // two bytes buffered in the output leave room for two more
        r.push_substring(b"cdef", 2, false);
        assert_eq!(r.first_unassembled_byte(), 4);
        assert_eq!(r.stream_out().buffer_size(), 4);

        assert_eq!(assembled(&mut r), b"abcd");
        r.push_substring(b"ef", 4, false);
        assert_eq!(assembled(&mut r), b"ef");
    }
}
