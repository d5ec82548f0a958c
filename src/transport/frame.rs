//! Reassembles newline-delimited JSON frames from arbitrary byte chunks.
//!
//! Chunk boundaries fall anywhere: inside a JSON object, or inside a
//! multi-byte UTF-8 character. The decoder keeps both the undecoded byte tail
//! and the incomplete text line between calls to [`FrameDecoder::push`].

use log::{debug, warn};

use super::event::StreamEvent;

const REPLACEMENT: char = '\u{FFFD}';

#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes of a UTF-8 sequence cut off at the end of the last chunk.
    pending_bytes: Vec<u8>,
    /// Decoded text not yet terminated by `\n`.
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every complete, non-empty, trimmed line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 1);

            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Flushes whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending_bytes.is_empty() {
            debug!(
                "Stream ended inside a UTF-8 sequence ({} bytes)",
                self.pending_bytes.len()
            );
            self.pending_bytes.clear();
            self.buffer.push(REPLACEMENT);
        }

        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending_bytes.extend_from_slice(chunk);

        let mut consumed = 0;
        while consumed < self.pending_bytes.len() {
            match std::str::from_utf8(&self.pending_bytes[consumed..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    consumed = self.pending_bytes.len();
                }
                Err(e) => {
                    let valid_end = consumed + e.valid_up_to();
                    self.buffer.push_str(&String::from_utf8_lossy(
                        &self.pending_bytes[consumed..valid_end],
                    ));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(REPLACEMENT);
                            consumed = valid_end + len;
                        }
                        // Incomplete sequence at the end: wait for the next chunk.
                        None => {
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending_bytes.drain(..consumed);
    }
}

/// Parses a frame line, logging and dropping anything that isn't a valid event.
pub fn parse_frame(line: &str) -> Option<StreamEvent> {
    match StreamEvent::from_line(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Failed to parse stream event: {} (line: {})", e, line);
            None
        }
    }
}
