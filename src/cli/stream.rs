//! Line framing for Claude Code stdout.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Bytes requested from the pipe per read.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Accumulates raw output chunks into newline-delimited records.
///
/// Splitting happens on bytes, so a multi-byte character cut by a chunk
/// boundary is reassembled before it is decoded.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every record it completed.
    ///
    /// The trailing fragment after the last newline stays buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete[..last_newline]
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Bytes held back waiting for a delimiter.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop the unterminated remainder at end of stream.
    ///
    /// Output without a trailing newline is not a well-formed record.
    /// Returns the number of bytes discarded.
    pub fn discard_remainder(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "Discarding unterminated trailing output");
        }
        self.buffer.clear();
        dropped
    }
}

/// One read from the pipe: the raw bytes and the records they completed.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    pub records: Vec<String>,
}

/// Reads an async byte source and frames it into records.
#[derive(Debug)]
pub struct RecordReader<R> {
    reader: R,
    framer: LineFramer,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            framer: LineFramer::new(),
            buf: vec![0; READ_CHUNK_SIZE],
        }
    }

    /// Read the next chunk.
    ///
    /// Returns `Ok(None)` at end of stream, after discarding any
    /// unterminated remainder.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the source fails.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Chunk>> {
        let n = self.reader.read(&mut self.buf).await?;
        if n == 0 {
            self.framer.discard_remainder();
            return Ok(None);
        }
        let bytes = self.buf[..n].to_vec();
        let records = self.framer.feed(&bytes);
        Ok(Some(Chunk { bytes, records }))
    }
}
