use std::cmp;
use std::collections::VecDeque;

/// A flow-controlled in-memory byte stream.
///
/// The writer pushes bytes in at one end until the capacity is reached and
/// eventually signals the end of input. The reader peeks and pops bytes from
/// the other end. Exactly one writer and one reader; no internal locking.
#[derive(Debug)]
pub struct ByteStream {
    capacity: usize,
    buf: VecDeque<u8>,
    bytes_written: u64,
    bytes_read: u64,
    input_ended: bool,
    error: bool,
}

impl ByteStream {
    pub fn new(capacity: usize) -> Self {
        ByteStream {
            capacity,
            buf: VecDeque::with_capacity(capacity),
            bytes_written: 0,
            bytes_read: 0,
            input_ended: false,
            error: false,
        }
    }

    /// Accept as many bytes as fit in the remaining capacity and return how
    /// many were taken. Writes after `end_input` take nothing.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.input_ended {
            return 0;
        }

        let len = cmp::min(data.len(), self.remaining_capacity());
        self.buf.extend(data[..len].iter());
        self.bytes_written += len as u64;

        len
    }

    /// Copy out up to `len` leading bytes without consuming them.
    pub fn peek_output(&self, len: usize) -> Vec<u8> {
        self.buf.iter().take(len).copied().collect()
    }

    /// Discard up to `len` leading bytes.
    pub fn pop_output(&mut self, len: usize) {
        let len = cmp::min(len, self.buf.len());
        self.buf.drain(..len);
        self.bytes_read += len as u64;
    }

    /// Peek and pop in one step.
    pub fn read(&mut self, len: usize) -> Vec<u8> {
        let data = self.peek_output(len);
        self.pop_output(data.len());
        data
    }

    pub fn end_input(&mut self) {
        self.input_ended = true;
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn input_ended(&self) -> bool {
        self.input_ended
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    pub fn buffer_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The input has ended and every byte has been read out.
    pub fn eof(&self) -> bool {
        self.input_ended && self.buf.is_empty()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_in_order() {
        let mut stream = ByteStream::new(16);

        assert_eq!(stream.write(b"hello"), 5);
        assert_eq!(stream.buffer_size(), 5);
        assert_eq!(stream.remaining_capacity(), 11);
        assert_eq!(stream.peek_output(3), b"hel");
        assert_eq!(stream.buffer_size(), 5);

        stream.pop_output(3);
        assert_eq!(stream.read(16), b"lo");
        assert_eq!(stream.bytes_written(), 5);
        assert_eq!(stream.bytes_read(), 5);
        assert!(stream.buffer_empty());
    }

    #[test]
    fn write_truncates_to_capacity() {
        let mut stream = ByteStream::new(4);

        assert_eq!(stream.write(b"abcdef"), 4);
        assert_eq!(stream.write(b"gh"), 0);
        assert_eq!(stream.read(2), b"ab");
        assert_eq!(stream.write(b"gh"), 2);
        assert_eq!(stream.read(10), b"cdgh");
    }

    #[test]
    fn write_after_end_input_takes_nothing() {
        let mut stream = ByteStream::new(8);

        stream.write(b"ab");
        stream.end_input();
        assert_eq!(stream.write(b"cd"), 0);
        assert!(stream.input_ended());
        assert!(!stream.eof());

        assert_eq!(stream.read(8), b"ab");
        assert!(stream.eof());
    }

    #[test]
    fn pop_beyond_buffer_is_clamped() {
        let mut stream = ByteStream::new(8);

        stream.write(b"xy");
        stream.pop_output(100);
        assert_eq!(stream.bytes_read(), 2);
        assert!(stream.buffer_empty());
    }

    #[test]
    fn written_minus_read_equals_buffered() {
        let mut stream = ByteStream::new(32);

        for chunk in [&b"aaa"[..], &b"bb"[..], &b"cccc"[..]] {
            stream.write(chunk);
            stream.pop_output(1);
            assert_eq!(
                stream.bytes_written() - stream.bytes_read(),
                stream.buffer_size() as u64
            );
        }
    }

    #[test]
    fn error_flag_sticks() {
        let mut stream = ByteStream::new(8);

        assert!(!stream.error());
        stream.set_error();
        assert!(stream.error());
    }
}
