//! zlib-stream inflater
//!
//! The gateway compresses the whole connection as a single zlib stream and
//! flushes it with `Z_SYNC_FLUSH` at the end of every message. A message may
//! span several websocket frames; it is complete once the buffered input ends
//! with the 4-byte sync marker.

use super::CodecError;
use flate2::{Decompress, FlushDecompress, Status};

/// Trailer of a sync flush, terminating one logical message
pub const SYNC_MARKER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Upper bound on compressed bytes buffered while waiting for a marker
pub const MAX_BUFFERED_BYTES: usize = 16 * 1024 * 1024;

const MIN_OUTPUT_CHUNK: usize = 4 * 1024;

/// Streaming inflate context for one connection
pub struct ZlibStreamDecoder {
    inflater: Decompress,
    buffer: Vec<u8>,
}

impl ZlibStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflater: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Number of compressed bytes waiting for a sync marker
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one frame
    ///
    /// Returns the inflated message once a sync marker completes it, `None`
    /// while more frames are needed. On error the partial message is discarded.
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
        self.buffer.extend_from_slice(frame);

        if self.buffer.len() > MAX_BUFFERED_BYTES {
            self.buffer.clear();
            return Err(CodecError::Overflow(MAX_BUFFERED_BYTES));
        }

        if !self.buffer.ends_with(&SYNC_MARKER) {
            return Ok(None);
        }

        let input = std::mem::take(&mut self.buffer);
        let result = self.inflate(&input);

        // Keep the allocation for the next message
        self.buffer = input;
        self.buffer.clear();

        result.map(Some)
    }

    fn inflate(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut output = Vec::with_capacity((input.len() * 4).max(MIN_OUTPUT_CHUNK));
        let mut offset = 0;

        loop {
            if output.len() == output.capacity() {
                output.reserve(output.capacity().max(MIN_OUTPUT_CHUNK));
            }

            let in_before = self.inflater.total_in();
            let out_before = self.inflater.total_out();

            let status =
                self.inflater
                    .decompress_vec(&input[offset..], &mut output, FlushDecompress::Sync)?;

            let consumed = (self.inflater.total_in() - in_before) as usize;
            let produced = self.inflater.total_out() - out_before;
            offset += consumed;

            let input_done = offset >= input.len();
            let output_has_room = output.len() < output.capacity();

            match status {
                Status::StreamEnd => break,
                _ if input_done && output_has_room => break,
                // No progress either way: the stream is truncated
                _ if consumed == 0 && produced == 0 && output_has_room => break,
                _ => {}
            }
        }

        Ok(output)
    }
}

impl Default for ZlibStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ZlibStreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibStreamDecoder")
            .field("buffered", &self.buffer.len())
            .field("total_in", &self.inflater.total_in())
            .field("total_out", &self.inflater.total_out())
            .finish()
    }
}
