//! Fixed-capacity byte buffer with explicit read/write cursors.
//!
//! # Layout
//! ```text
//! 0          start            end                capacity
//! |-consumed-|----pending-----|-------free--------|
//! ```
//! - Bytes before `start` have been consumed.
//! - Bytes between `start` and `end` are pending.
//! - `capacity - end` is free space for further writes.
//!
//! # Design Decisions
//! - Capacity never grows; a full buffer is the backpressure signal
//! - `shift()` reclaims consumed space by moving pending bytes to the front

use std::io::{self, Read, Write};

/// A fixed-capacity buffer shared between a parser and a socket.
#[derive(Debug)]
pub struct Buffer {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl Buffer {
    /// Create an empty buffer of the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of pending bytes.
    pub fn available_data(&self) -> usize {
        self.end - self.start
    }

    /// Free space after the write cursor.
    pub fn available_space(&self) -> usize {
        self.data.len() - self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when no further byte can be written without a `shift()`.
    pub fn is_full(&self) -> bool {
        self.end == self.data.len()
    }

    /// Pending bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Free space, to be filled and then committed with `fill()`.
    pub fn space(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Mark `count` pending bytes as consumed.
    pub fn consume(&mut self, count: usize) -> usize {
        let count = count.min(self.available_data());
        self.start += count;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
        count
    }

    /// Commit `count` bytes written into `space()`.
    pub fn fill(&mut self, count: usize) -> usize {
        let count = count.min(self.available_space());
        self.end += count;
        count
    }

    /// Copy as much of `bytes` as fits; returns the number of bytes written.
    pub fn write_slice(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.available_space());
        self.data[self.end..self.end + count].copy_from_slice(&bytes[..count]);
        self.end += count;
        count
    }

    /// Append one byte. Returns false when the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.data[self.end] = byte;
        self.end += 1;
        true
    }

    /// Move pending bytes to the front to reclaim consumed space.
    pub fn shift(&mut self) {
        if self.start > 0 {
            self.data.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Read from `reader` into free space. `Ok(0)` means end of stream.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.shift();
        let count = reader.read(self.space())?;
        self.fill(count);
        Ok(count)
    }

    /// Write pending bytes to `writer`, consuming what was accepted.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let count = writer.write(self.data())?;
        self.consume(count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursors_track_pending_and_free_space() {
        let mut buf = Buffer::with_capacity(8);
        assert_eq!(buf.write_slice(b"hello"), 5);
        assert_eq!(buf.available_data(), 5);
        assert_eq!(buf.available_space(), 3);

        buf.consume(2);
        assert_eq!(buf.data(), b"llo");
        assert_eq!(buf.available_space(), 3);

        // only 3 bytes fit until shift
        assert_eq!(buf.write_slice(b"world"), 3);
        assert!(buf.is_full());
        assert_eq!(buf.data(), b"llowor");
    }

    #[test]
    fn shift_reclaims_consumed_space() {
        let mut buf = Buffer::with_capacity(4);
        buf.write_slice(b"abcd");
        buf.consume(3);
        assert!(buf.is_full());
        buf.shift();
        assert_eq!(buf.data(), b"d");
        assert_eq!(buf.available_space(), 3);
    }

    #[test]
    fn consuming_everything_resets_cursors() {
        let mut buf = Buffer::with_capacity(4);
        buf.write_slice(b"ab");
        buf.consume(10);
        assert!(buf.is_empty());
        assert_eq!(buf.available_space(), 4);
    }

    #[test]
    fn read_and_write_through_io_traits() {
        let mut buf = Buffer::with_capacity(16);
        let mut source: &[u8] = b"payload";
        assert_eq!(buf.read_from(&mut source).unwrap(), 7);

        let mut sink = Vec::new();
        assert_eq!(buf.write_to(&mut sink).unwrap(), 7);
        assert_eq!(sink, b"payload");
        assert!(buf.is_empty());
    }
}
