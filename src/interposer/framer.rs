//! Line framing for the worker's output stream
//!
//! Buffers raw bytes across reads and yields one message line at a time,
//! split on `\n` with a single trailing `\r` stripped.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{InterposeError, Result};

/// Floor for the maximum frame size; question payloads with many options
/// must always fit.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Turns a byte source into discrete lines
pub struct LineFramer<R> {
    reader: R,
    buf: Vec<u8>,
    /// Start of the first unconsumed byte in `buf`
    start: usize,
    /// Bytes of `buf` before this index are known to contain no terminator
    scanned: usize,
    max_frame: usize,
    finished: bool,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_frame(reader, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame(reader: R, max_frame: usize) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
            start: 0,
            scanned: 0,
            max_frame,
            finished: false,
        }
    }

    /// Next complete line without its terminator.
    ///
    /// Returns `Ok(None)` once the source is exhausted; a final unterminated
    /// line is returned before that. After `Ok(None)` or an error the framer
    /// is finished and keeps returning `Ok(None)`. Empty lines are returned
    /// as empty vectors, never as end of stream.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            if let Some(pos) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
                let end = self.scanned + pos;
                let mut line = self.buf[self.start..end].to_vec();
                self.start = end + 1;
                self.scanned = self.start;
                strip_cr(&mut line);
                return self.check_size(line).map(Some);
            }
            self.scanned = self.buf.len();

            // +1 leaves room for a trailing '\r' on a maximum-size line
            if self.buf.len() - self.start > self.max_frame + 1 {
                self.finished = true;
                return Err(InterposeError::FrameTooLarge {
                    limit: self.max_frame,
                });
            }

            self.compact();
            self.buf.reserve(READ_CHUNK);
            match self.reader.read_buf(&mut self.buf).await {
                Ok(0) => {
                    self.finished = true;
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let mut line = std::mem::take(&mut self.buf);
                    strip_cr(&mut line);
                    return self.check_size(line).map(Some);
                }
                Ok(_) => {}
                Err(e) => {
                    self.finished = true;
                    return Err(InterposeError::StreamRead(e));
                }
            }
        }
    }

    /// Drop consumed bytes, once per read rather than once per line
    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
    }

    fn check_size(&mut self, line: Vec<u8>) -> Result<Vec<u8>> {
        if line.len() > self.max_frame {
            self.finished = true;
            return Err(InterposeError::FrameTooLarge {
                limit: self.max_frame,
            });
        }
        Ok(line)
    }
}

fn strip_cr(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}
