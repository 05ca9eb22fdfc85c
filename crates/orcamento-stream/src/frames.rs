//! Lines → SSE frames.
//!
//! A frame is one or more non-blank lines terminated by a blank line. Only
//! frames that open with a `data: ` field are passed on; comment and
//! keep-alive blocks are dropped here.

use tracing::debug;

const DATA_PREFIX: &str = "data: ";
const DATA_FIELD: &str = "data:";

/// An assembled frame: the `data:` payload lines, prefix stripped, `\n`-joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFrame {
    pub payload: String,
}

/// Groups lines into frames, carrying an unterminated frame across calls.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: String,
    discarded: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its `\n`). Returns a frame when the line closes one.
    pub fn push_line(&mut self, line: &str) -> Option<ProtocolFrame> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.trim().is_empty() {
            if self.buffer.is_empty() {
                return None;
            }
            return self.emit();
        }

        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
        None
    }

    /// End of stream: flush a pending frame that never saw its blank line.
    pub fn finish(&mut self) -> Option<ProtocolFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        self.emit()
    }

    /// True when lines are buffered for a frame that has not been closed yet.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Number of non-data frames dropped so far.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn emit(&mut self) -> Option<ProtocolFrame> {
        let event = std::mem::take(&mut self.buffer);
        if !event.starts_with(DATA_PREFIX) {
            self.discarded += 1;
            debug!(len = event.len(), "discarding non-data frame");
            return None;
        }

        let payload = event
            .lines()
            .filter_map(|l| l.strip_prefix(DATA_FIELD))
            .map(|v| v.strip_prefix(' ').unwrap_or(v))
            .collect::<Vec<_>>()
            .join("\n");
        Some(ProtocolFrame { payload })
    }
}
