use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

/// JPEG start-of-image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Incremental splitter for a concatenated MJPEG byte stream.
///
/// Only complete SOI..EOI spans are ever returned; bytes of a frame still
/// being written stay buffered until its end marker arrives.
pub struct FrameExtractor {
    buffer: BytesMut,
    max_buffer: usize,
    dropped_bytes: u64,
}

impl FrameExtractor {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_buffer,
            dropped_bytes: 0,
        }
    }

    /// Append decoder output and return every frame it completed, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }

        if self.buffer.len() > self.max_buffer {
            warn!(
                "Discarding {} buffered bytes without a complete frame",
                self.buffer.len()
            );
            self.dropped_bytes += self.buffer.len() as u64;
            self.buffer.clear();
        }

        frames
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    fn next_frame(&mut self) -> Option<Bytes> {
        let Some(start) = find_marker(&self.buffer, SOI, 0) else {
            // Keep a trailing 0xFF, it may be the first half of the next SOI
            let keep = usize::from(self.buffer.last() == Some(&SOI[0]));
            let discard = self.buffer.len() - keep;
            self.dropped_bytes += discard as u64;
            self.buffer.advance(discard);
            return None;
        };

        if start > 0 {
            self.dropped_bytes += start as u64;
            self.buffer.advance(start);
        }

        let end = find_marker(&self.buffer, EOI, SOI.len())?;
        Some(self.buffer.split_to(end + EOI.len()).freeze())
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + marker.len() {
        return None;
    }
    haystack[from..]
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|offset| offset + from)
}
