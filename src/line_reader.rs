use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Provides a facility to read `\n`-terminated lines from a stream. A
/// trailing `\r` before the `\n` is tolerated and stripped, so clients may
/// frame requests with either `\n` or `\r\n`.
pub struct LineReader<T: AsyncRead + Unpin> {
    /// Stores data that's been read in but lacks a terminating `\n`.
    buf: BytesMut,
    /// Index in buf up to which we have already scanned without finding a
    /// `\n`, so each byte is examined at most once.
    scanned_to: usize,
    /// Data source
    reader: T,
    /// On a reading error, this field is set and its value returned once the
    /// buffer is drained of pending lines.
    pending_error: Option<io::Error>,
}

impl<T: AsyncRead + Unpin> LineReader<T> {
    /// Reads a line from the internal buffer and/or reader. On an
    /// end-of-stream condition, returns a None result, discarding any
    /// partly-read line in the internal buffer.
    ///
    /// This function is cancel-safe: its only async operation is a
    /// `read_buf` against the internal `reader`, and so it has the same
    /// guarantees: either a complete read occurs and is processed, or this
    /// is cancelled.
    ///
    /// On a read error, the error value is returned after processing all
    /// pending lines in the internal buffer, but calling `read_line` again
    /// will attempt a new read safely.
    pub async fn read_line(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            // The outer loop ensures pipelined lines that arrive in the same
            // read_buf call are handled correctly: we only call read_buf
            // once all pending lines in the internal buffer have been
            // removed.
            if let Some(eol) = self.buf[self.scanned_to..]
                .iter()
                .position(|&c| c == b'\n')
            {
                // This should be a complete line. Freeze the result to make
                // it read-only.
                let line = self.buf.split_to(self.scanned_to + eol + 1).freeze();

                // Drop the trailing b"\n", and a b"\r" before it if present.
                let mut line = line.slice(0..line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line = line.slice(0..line.len() - 1);
                }

                // Restart scanning from the start of the unread buffer
                // section.
                self.scanned_to = 0;

                return Ok(Some(line));
            }

            // Everything currently buffered has been scanned; anything new
            // will land at the end of the buffer.
            self.scanned_to = self.buf.len();

            // Try reading from the reader and accumulating in the buffer;
            // if we receive any bytes, re-scan, otherwise assume the
            // connection is dead/closed.
            let n_bytes_read = match self.reader.read_buf(&mut self.buf).await {
                Ok(n) => n,
                Err(e) => {
                    self.pending_error = Some(e);
                    0
                },
            };

            // If we didn't read any bytes this time around, we've reached an
            // end-of-stream condition. Return any pending error: we wouldn't
            // be able to parse out another line, given we just read 0 bytes.
            if n_bytes_read == 0 {
                return match self.pending_error.take() {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            }
        }
    }
}

impl<T: AsyncRead + Unpin> From<T> for LineReader<T> {
    fn from(value: T) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned_to: 0,
            reader: value,
            pending_error: None,
        }
    }
}
