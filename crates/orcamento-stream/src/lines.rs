//! Byte chunks → complete text lines.
//!
//! Transport reads split the body at arbitrary byte offsets: mid-line, and
//! even mid-character. [`Utf8Decoder`] holds back an incomplete trailing
//! UTF-8 sequence until the next chunk completes it; [`LineReassembler`]
//! carries the text after the last `\n` forward so a line is only released
//! once its terminator has been seen.
//!
//! A UTF-8 character is 1-4 bytes:
//! - 1 byte:  0xxxxxxx (ASCII)
//! - 2 bytes: 110xxxxx 10xxxxxx
//! - 3 bytes: 1110xxxx 10xxxxxx 10xxxxxx
//! - 4 bytes: 11110xxx 10xxxxxx 10xxxxxx 10xxxxxx

/// Stateful UTF-8 decoder that never splits a character across calls.
///
/// Invalid sequences decode to U+FFFD rather than failing.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    /// Incomplete sequence from the previous chunk (at most 3 bytes).
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, withholding a trailing partial character.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let split = bytes.len() - incomplete_tail_len(&bytes);
        self.pending = bytes.split_off(split);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Flush whatever is still held back. A truncated character becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[inline]
fn is_continuation(byte: u8) -> bool {
    (byte & 0b1100_0000) == 0b1000_0000
}

#[inline]
fn sequence_length(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

/// Length of an incomplete sequence at the end of `bytes`, or 0.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let n = bytes.len();
    for back in 1..=n.min(3) {
        let b = bytes[n - back];
        if is_continuation(b) {
            continue;
        }
        return if sequence_length(b) > back { back } else { 0 };
    }
    0
}

/// Splits decoded text into `\n`-terminated lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineReassembler {
    decoder: Utf8Decoder,
    /// Text after the last `\n` seen so far.
    remainder: String,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next raw chunk and return every line it completed, in order.
    ///
    /// Returned lines exclude the `\n` terminator.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decoder.decode(chunk);
        self.push_text(&text)
    }

    fn push_text(&mut self, text: &str) -> Vec<String> {
        // Only the new text can contain the last terminator.
        let Some(pos) = text.rfind('\n') else {
            self.remainder.push_str(text);
            return Vec::new();
        };

        self.remainder.push_str(&text[..pos]);
        let complete = std::mem::replace(&mut self.remainder, text[pos + 1..].to_string());
        complete.split('\n').map(str::to_string).collect()
    }

    /// The carried-forward partial line.
    pub fn remainder(&self) -> &str {
        &self.remainder
    }

    /// End of stream: return the unterminated final line, if any.
    pub fn finish(&mut self) -> Option<String> {
        let tail = self.decoder.finish();
        self.remainder.push_str(&tail);
        let last = std::mem::take(&mut self.remainder);
        (!last.is_empty()).then_some(last)
    }
}
