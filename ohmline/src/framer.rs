//! `\r\n` line framing over a byte stream.
//!
//! The transport delivers bytes in whatever chunks the OS hands over, so the
//! framer keeps an accumulation buffer per connection and only yields a command
//! once its terminator has arrived. Anything after the last terminator stays
//! buffered for the next chunk.

use std::io;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const TERMINATOR: &[u8] = b"\r\n";

/// Longest partial line we are willing to buffer while waiting for `\r\n`.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("line exceeds {MAX_LINE_LENGTH} bytes without a terminator")]
    LineTooLong,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Incremental decoder turning raw chunks into trimmed command lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Appends a chunk exactly as it came off the wire.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extracts the next complete line, without its terminator and with
    /// surrounding whitespace removed.
    ///
    /// Invalid UTF-8 is replaced rather than rejected so a stray byte cannot
    /// take the connection down.
    pub fn next_line(&mut self) -> Option<String> {
        let end = find_terminator(&self.buffer)?;
        let frame = self.buffer.split_to(end + TERMINATOR.len());
        let text = String::from_utf8_lossy(&frame[..end]);
        Some(text.trim().to_string())
    }

    /// Iterates over every line that is complete right now. The iterator ends
    /// when the buffer runs out of terminators; push more data and call again.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { framer: self }
    }

    /// Number of buffered bytes that do not yet form a complete line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_line()
    }
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

/// A [`LineFramer`] driven by an async reader.
pub struct LineReader<R> {
    reader: R,
    framer: LineFramer,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            framer: LineFramer::new(),
        }
    }

    /// Reads until a full line is buffered.
    ///
    /// Returns `Ok(None)` once the peer closes its side; an unterminated tail
    /// is dropped at that point. Cancel safe: bytes already read stay in the
    /// framer if the future is dropped inside `select!`.
    pub async fn read_line(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            if let Some(line) = self.framer.next_line() {
                return Ok(Some(line));
            }

            if self.framer.pending() > MAX_LINE_LENGTH {
                return Err(FrameError::LineTooLong);
            }

            if self.reader.read_buf(&mut self.framer.buffer).await? == 0 {
                return Ok(None);
            }
        }
    }
}

/// Writes one line followed by `\r\n` and flushes so the peer sees it at once.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + TERMINATOR.len());
    encoded.extend_from_slice(line.as_bytes());
    encoded.extend_from_slice(TERMINATOR);
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] = b"help\r\n  dat \r\nbro hello world\r\nU=5m\r\n";

    fn decode_in_chunks(chunks: &[&[u8]]) -> Vec<String> {
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            framer.push(chunk);
            lines.extend(framer.lines());
        }
        lines
    }

    #[test]
    fn contiguous_stream_yields_trimmed_lines() {
        let lines = decode_in_chunks(&[STREAM]);
        assert_eq!(lines, vec!["help", "dat", "bro hello world", "U=5m"]);
    }

    #[test]
    fn every_two_way_split_matches_contiguous_decode() {
        let expected = decode_in_chunks(&[STREAM]);
        for first in 0..=STREAM.len() {
            for second in first..=STREAM.len() {
                let lines = decode_in_chunks(&[
                    &STREAM[..first],
                    &STREAM[first..second],
                    &STREAM[second..],
                ]);
                assert_eq!(lines, expected, "split at {first} and {second}");
            }
        }
    }

    #[test]
    fn byte_at_a_time_matches_contiguous_decode() {
        let chunks: Vec<&[u8]> = STREAM.chunks(1).collect();
        assert_eq!(decode_in_chunks(&chunks), decode_in_chunks(&[STREAM]));
    }

    #[test]
    fn terminator_split_across_chunks_is_recognised() {
        let mut framer = LineFramer::new();
        framer.push(b"cli\r");
        assert_eq!(framer.next_line(), None);
        framer.push(b"\ncit");
        assert_eq!(framer.next_line().as_deref(), Some("cli"));
        assert_eq!(framer.next_line(), None);
        assert_eq!(framer.pending(), 3);
    }

    #[test]
    fn bare_newline_is_not_a_terminator() {
        let mut framer = LineFramer::new();
        framer.push(b"help\nstill the same line\r\n");
        assert_eq!(
            framer.next_line().as_deref(),
            Some("help\nstill the same line")
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut framer = LineFramer::new();
        framer.push(b"bro \xff\r\n");
        assert_eq!(framer.next_line().as_deref(), Some("bro \u{fffd}"));
    }

    #[tokio::test]
    async fn reader_yields_lines_then_none_on_close() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(server);

        client.write_all(b"dat\r\ncl").await.expect("write");
        client.write_all(b"i\r\n").await.expect("write");
        drop(client);

        assert_eq!(reader.read_line().await.expect("read").as_deref(), Some("dat"));
        assert_eq!(reader.read_line().await.expect("read").as_deref(), Some("cli"));
        assert_eq!(reader.read_line().await.expect("read"), None);
    }

    #[tokio::test]
    async fn reader_rejects_oversized_partial_line() {
        let oversized = vec![b'a'; MAX_LINE_LENGTH + 1];
        let mut reader = LineReader::new(&oversized[..]);
        let result = reader.read_line().await;
        assert!(matches!(result, Err(FrameError::LineTooLong)));
    }

    #[tokio::test]
    async fn write_line_appends_crlf() {
        let mut out = Vec::new();
        write_line(&mut out, "OK").await.expect("write");
        assert_eq!(out, b"OK\r\n");
    }
}
