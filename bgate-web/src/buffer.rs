//! Ring write-buffer with contiguous drain views.

use std::collections::VecDeque;

/// Outbound byte buffer drained front-first by the poll loop.
///
/// Backed by a ring so that appends never shift pending bytes; `first_chunk` exposes the
/// contiguous front for one `send` call and `consume` releases what the socket accepted.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    bytes: VecDeque<u8>,
}

impl WriteBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.bytes.extend(data.iter().copied());
    }

    /// Contiguous view of the front of the buffer; empty only when the buffer is empty.
    #[must_use]
    pub fn first_chunk(&self) -> &[u8] {
        self.bytes.as_slices().0
    }

    /// Releases `count` bytes from the front.
    pub fn consume(&mut self, count: usize) {
        drop(self.bytes.drain(..count.min(self.bytes.len())));
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::WriteBuffer;
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn drain_in_chunks_preserves_order() {
        let mut buffer = WriteBuffer::new();
        buffer.extend(b"abcdef");
        buffer.consume(2);
        buffer.extend(b"gh");

        let mut drained = Vec::new();
        while !buffer.is_empty() {
            let chunk = buffer.first_chunk().to_vec();
            assert_that!(chunk.is_empty(), eq(false));
            drained.extend_from_slice(&chunk);
            buffer.consume(chunk.len());
        }
        assert_that!(drained, eq(&b"cdefgh".to_vec()));
    }

    #[rstest]
    fn consume_beyond_length_empties_buffer() {
        let mut buffer = WriteBuffer::new();
        buffer.extend(b"xy");
        buffer.consume(10);
        assert_that!(buffer.is_empty(), eq(true));
        assert_that!(buffer.len(), eq(0));
    }
}
