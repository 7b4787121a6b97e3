//! Line Framer (C1): reads UTF-8 newline-delimited JSON from a child's stdout
//! and writes newline-delimited JSON to its stdin.
//!
//! Bounded-memory reading is ported from the sync chunked-buffer reader the
//! teacher ships for its own wrapper-output ingestion, generalized here to
//! `tokio::io::AsyncRead` so it can sit directly on a child process's piped
//! stdout.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CHUNK_SIZE_BYTES: usize = 8192;

/// One decoded line from the child's stdout.
#[derive(Debug)]
pub enum BoundedLine {
    Line { line_number: usize, bytes: Vec<u8> },
    LineTooLong {
        line_number: usize,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    Io { line_number: usize },
}

/// Streaming LF-delimited reader with a per-line byte cap.
///
/// CRLF is tolerated on read by trimming the trailing `\r`; writers never
/// produce it (see [`LineWriter`]).
pub struct LineReader<R> {
    reader: R,
    max_line_bytes: usize,
    buffer: Box<[u8; CHUNK_SIZE_BYTES]>,
    buffer_pos: usize,
    buffer_len: usize,
    current_line: Vec<u8>,
    observed_bytes: usize,
    discard_mode: bool,
    line_number: usize,
    done: bool,
    pending_too_long: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            max_line_bytes,
            buffer: Box::new([0u8; CHUNK_SIZE_BYTES]),
            buffer_pos: 0,
            buffer_len: 0,
            current_line: Vec::new(),
            observed_bytes: 0,
            discard_mode: false,
            line_number: 0,
            done: false,
            pending_too_long: false,
        }
    }

    async fn fill_buffer(&mut self) -> std::io::Result<usize> {
        self.buffer_pos = 0;
        let n = self.reader.read(self.buffer.as_mut_slice()).await?;
        self.buffer_len = n;
        Ok(n)
    }

    fn observe_bytes(&mut self, additional: usize) {
        self.observed_bytes = self.observed_bytes.saturating_add(additional);
        if self.observed_bytes > self.max_line_bytes && !self.discard_mode {
            self.discard_mode = true;
            self.pending_too_long = true;
            self.current_line.clear();
        }
    }

    fn reset_line_state(&mut self) {
        self.current_line.clear();
        self.observed_bytes = 0;
        self.discard_mode = false;
        self.pending_too_long = false;
    }

    fn finish_line(&mut self) -> BoundedLine {
        let line_number = self.line_number + 1;
        self.line_number = line_number;

        if self.pending_too_long {
            let observed_bytes = self.observed_bytes;
            let max_line_bytes = self.max_line_bytes;
            self.reset_line_state();
            return BoundedLine::LineTooLong {
                line_number,
                observed_bytes,
                max_line_bytes,
            };
        }

        let bytes = std::mem::take(&mut self.current_line);
        self.reset_line_state();
        BoundedLine::Line { line_number, bytes }
    }

    /// Reads the next line, or `None` once the underlying stream is exhausted.
    pub async fn next_line(&mut self) -> Option<BoundedLine> {
        if self.done {
            return None;
        }

        loop {
            if self.buffer_pos >= self.buffer_len {
                match self.fill_buffer().await {
                    Ok(0) => {
                        self.done = true;
                        if self.pending_too_long || !self.current_line.is_empty() {
                            return Some(self.finish_line());
                        }
                        return None;
                    }
                    Ok(_) => {}
                    Err(_) => {
                        let line_number = self.line_number + 1;
                        self.line_number = line_number;
                        self.done = true;
                        return Some(BoundedLine::Io { line_number });
                    }
                }
            }

            let (newline_idx, slice_len) = {
                let slice = &self.buffer[self.buffer_pos..self.buffer_len];
                (slice.iter().position(|b| *b == b'\n'), slice.len())
            };

            let Some(newline_idx) = newline_idx else {
                self.observe_bytes(slice_len);
                if !self.discard_mode {
                    let slice = &self.buffer[self.buffer_pos..self.buffer_len];
                    self.current_line.extend_from_slice(slice);
                }
                self.buffer_pos = self.buffer_len;
                continue;
            };

            self.observe_bytes(newline_idx);
            if !self.discard_mode {
                let segment = &self.buffer[self.buffer_pos..self.buffer_pos + newline_idx];
                self.current_line.extend_from_slice(segment);
            }
            self.buffer_pos += newline_idx + 1;
            return Some(self.finish_line());
        }
    }
}

/// Decodes a raw line into a [`serde_json::Value`], trimming a trailing `\r`
/// and ignoring blank lines. Parse failures are returned to the caller to log
/// and skip — they never abort the stream.
pub fn decode_line(bytes: &[u8]) -> Option<Result<Value, serde_json::Error>> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.strip_suffix('\r').unwrap_or(&text);
    if trimmed.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed))
}

/// Writes one JSON value per line, escaping U+2028/U+2029 so a value
/// containing the Unicode line separators cannot split the LF framing.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_value(&mut self, value: &Value) -> std::io::Result<()> {
        let mut serialized = serde_json::to_string(value)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        escape_line_separators(&mut serialized);
        self.writer.write_all(serialized.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}

fn escape_line_separators(s: &mut String) {
    if !s.contains('\u{2028}') && !s.contains('\u{2029}') {
        return;
    }
    let escaped = s
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029");
    *s = escaped;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_line_is_discarded_and_reading_continues() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ok\n");
        bytes.extend_from_slice(&vec![b'a'; 50]);
        bytes.extend_from_slice(b"\nnext\n");

        let mut reader = LineReader::new(std::io::Cursor::new(bytes), 16);
        let first = reader.next_line().await.unwrap();
        assert!(matches!(first, BoundedLine::Line { .. }));
        let second = reader.next_line().await.unwrap();
        assert!(matches!(second, BoundedLine::LineTooLong { .. }));
        let third = reader.next_line().await.unwrap();
        assert!(matches!(third, BoundedLine::Line { .. }));
        assert!(reader.next_line().await.is_none());
    }

    #[test]
    fn decode_line_ignores_blank_and_surfaces_parse_errors() {
        assert!(decode_line(b"   ").is_none());
        assert!(decode_line(br#"{"a":1}"#).unwrap().is_ok());
        assert!(decode_line(b"{not-json}").unwrap().is_err());
    }

    #[test]
    fn escape_line_separators_only_touches_unicode_line_breaks() {
        let mut s = "hello\u{2028}world".to_string();
        escape_line_separators(&mut s);
        assert_eq!(s, "hello\\u2028world");
    }
}
