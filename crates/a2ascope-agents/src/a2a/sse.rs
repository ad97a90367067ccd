use serde_json::Value;
use tracing::{debug, warn};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";
/// Longest line kept while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One decoded server-sent event line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A `data:` line carrying a JSON value.
    Data(Value),
    /// The `[DONE]` end-of-stream marker.
    Done,
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// may fall anywhere, including inside a multi-byte UTF-8 sequence. Every
/// `data:` line is decoded on its own; a line that is not valid JSON is
/// dropped and counted instead of failing the stream, and so is a line
/// longer than [`MAX_LINE_BYTES`].
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    /// Inside an oversized line; drop bytes until its newline.
    discarding: bool,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=self.scanned + offset).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(frame) = self.decode_line(&line) {
                frames.push(frame);
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            if !self.discarding {
                self.skipped += 1;
                warn!("dropping SSE line longer than {MAX_LINE_BYTES} bytes");
            }
            self.discarding = true;
            self.buffer.clear();
            self.scanned = 0;
        }
        frames
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        self.decode_line(&rest)
    }

    /// Number of malformed or oversized lines dropped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<SseFrame> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        let data = line.strip_prefix(DATA_PREFIX)?.trim();

        if data.is_empty() {
            return None;
        }
        if data == DONE_SENTINEL {
            return Some(SseFrame::Done);
        }

        match serde_json::from_str(data) {
            Ok(value) => Some(SseFrame::Data(value)),
            Err(e) => {
                self.skipped += 1;
                warn!("skipping malformed SSE frame: {e}");
                debug!("malformed frame payload: {data}");
                None
            }
        }
    }
}
