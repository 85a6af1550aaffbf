use std::fmt;
use std::ops::Add;

/// A 32-bit sequence number as it appears on the wire.
///
/// Sequence numbers start at an arbitrary initial value and wrap around, so a
/// raw `u32` comparison is meaningless. All bookkeeping inside the sender and
/// receiver happens on 64-bit absolute positions; `wrap`/`unwrap` convert at
/// the segment boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SeqNo(u32);

impl SeqNo {
    pub fn new(raw: u32) -> Self {
        SeqNo(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Project an absolute 64-bit position onto the wire, relative to `isn`.
    pub fn wrap(n: u64, isn: SeqNo) -> SeqNo {
        SeqNo((n as u32).wrapping_add(isn.0))
    }

    /*
    From RFC 1323:
        TCP determines if a data segment is "old" or "new" by testing
        whether its sequence number is within 2**31 bytes of the left edge
        of the window, and if it is not, discarding the data as "old".

    The same 2**31 split decides which 64-bit position a wrapped number
    stands for: of all values congruent to `self` mod 2**32, pick the one
    closest to `checkpoint`, preferring the larger on a tie.
    */
    pub fn unwrap(self, isn: SeqNo, checkpoint: u64) -> u64 {
        let offset = self.0.wrapping_sub(SeqNo::wrap(checkpoint, isn).0);
        let candidate = checkpoint.wrapping_add(offset as u64);

        if offset > (1 << 31) && candidate >= (1 << 32) {
            candidate - (1 << 32)
        } else {
            candidate
        }
    }
}

impl Add<u32> for SeqNo {
    type Output = SeqNo;

    fn add(self, rhs: u32) -> SeqNo {
        SeqNo(self.0.wrapping_add(rhs))
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_offsets_from_isn() {
        assert_eq!(SeqNo::wrap(0, SeqNo::new(0)), SeqNo::new(0));
        assert_eq!(SeqNo::wrap(0xFFFF_FFFF, SeqNo::new(0)), SeqNo::new(0xFFFF_FFFF));
        assert_eq!(SeqNo::wrap(3, SeqNo::new(0xFFFF_FFFF)), SeqNo::new(2));
        assert_eq!(SeqNo::wrap(1 << 32, SeqNo::new(17)), SeqNo::new(17));
        assert_eq!(SeqNo::wrap((1 << 32) + 5, SeqNo::new(10)), SeqNo::new(15));
    }

    #[test]
    fn unwrap_near_checkpoint() {
        assert_eq!(SeqNo::new(5).unwrap(SeqNo::new(0), 0), 5);
        assert_eq!(SeqNo::new(0).unwrap(SeqNo::new(0), 1 << 32), 1 << 32);
        // 2**32 is closer to the checkpoint than both 0 and 2**33.
        assert_eq!(SeqNo::new(0).unwrap(SeqNo::new(0), (1 << 32) + 1), 1 << 32);
    }

    #[test]
    fn unwrap_ties_go_to_the_larger_candidate() {
        // checkpoint exactly between 0 and 2**32
        assert_eq!(SeqNo::new(0).unwrap(SeqNo::new(0), 1 << 31), 1 << 32);
    }

    #[test]
    fn unwrap_below_checkpoint_never_goes_negative() {
        assert_eq!(SeqNo::new(10).unwrap(SeqNo::new(0), 3), 10);
        assert_eq!(SeqNo::new(0xFFFF_FFF0).unwrap(SeqNo::new(0), 0), 0xFFFF_FFF0);
    }

    #[test]
    fn wrap_unwrap_roundtrips() {
        let cases = [
            (0u64, 0u32, 0u64),
            (17, 0xDEAD_BEEF, 0),
            ((1 << 33) + 4096, 12345, (1 << 33)),
            (u32::MAX as u64 + 1, 0, u32::MAX as u64),
        ];

        for (n, isn, checkpoint) in cases {
            let isn = SeqNo::new(isn);
            let wrapped = SeqNo::wrap(n, isn);
            assert_eq!(SeqNo::wrap(wrapped.unwrap(isn, checkpoint), isn), wrapped);
        }
    }
}
