use crate::truncate::{ceil_char_boundary, tail_chars};

/// Interleaved process output, capped at `cap` bytes.
///
/// `total` counts raw bytes the process wrote. Once it passes the cap the
/// oldest text is dropped (on a char boundary) and `truncated` is set, so
/// `truncated` holds exactly when `total > cap`.
#[derive(Debug)]
pub struct OutputBuffer {
    data: String,
    cap: usize,
    total: u64,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            data: String::new(),
            cap,
            total: 0,
            truncated: false,
        }
    }

    pub fn push(&mut self, text: &str) {
        self.push_decoded(&Decoded {
            text: text.to_owned(),
            raw_len: text.len(),
        });
    }

    /// Append text decoded from `raw_len` bytes of process output.
    pub fn push_decoded(&mut self, decoded: &Decoded) {
        if decoded.raw_len == 0 && decoded.text.is_empty() {
            return;
        }
        self.total += decoded.raw_len as u64;
        self.data.push_str(&decoded.text);
        // Replacement characters can make the text longer than the bytes
        // behind it; only trim once the raw output is over the cap.
        if self.total > self.cap as u64 && self.data.len() > self.cap {
            let cut = ceil_char_boundary(&self.data, self.data.len() - self.cap);
            self.data.drain(..cut);
            self.truncated = true;
        }
    }

    /// The last `max_chars` characters retained.
    pub fn tail(&self, max_chars: usize) -> &str {
        tail_chars(&self.data, max_chars)
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Bytes currently retained.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

/// Text decoded from a read, with the number of raw bytes it stands for.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub raw_len: usize,
}

/// Turns a byte stream into text without splitting multi-byte characters
/// across reads.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`. Invalid sequences become U+FFFD; only an incomplete
    /// sequence at the very end is held for the next read.
    pub fn decode(&mut self, bytes: &[u8]) -> Decoded {
        self.pending.extend_from_slice(bytes);
        let mut text = String::with_capacity(self.pending.len());
        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + bad;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        Decoded {
            text,
            raw_len: start,
        }
    }

    /// Whatever is left at end of stream, lossily.
    pub fn finish(&mut self) -> Decoded {
        let raw_len = self.pending.len();
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Decoded { text, raw_len }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_cap_keeps_everything() {
        let mut buf = OutputBuffer::new(16);
        buf.push("hello ");
        buf.push("world");
        assert_eq!(buf.as_str(), "hello world");
        assert_eq!(buf.total(), 11);
        assert!(!buf.truncated());
    }

    #[test]
    fn over_cap_drops_oldest_and_flags() {
        let mut buf = OutputBuffer::new(8);
        buf.push("0123456789");
        assert_eq!(buf.as_str(), "23456789");
        assert!(buf.truncated());
        buf.push("ab");
        assert_eq!(buf.as_str(), "456789ab");
        assert_eq!(buf.total(), 12);
        assert!(buf.total() >= buf.len() as u64);
    }

    #[test]
    fn exactly_at_cap_is_not_truncated() {
        let mut buf = OutputBuffer::new(4);
        buf.push("abcd");
        assert!(!buf.truncated());
        buf.push("e");
        assert!(buf.truncated());
    }

    #[test]
    fn trimming_respects_char_boundaries() {
        let mut buf = OutputBuffer::new(4);
        buf.push("é🦀x"); // 2 + 4 + 1 bytes
        assert_eq!(buf.as_str(), "x");
        assert_eq!(buf.total(), 7);
    }

    #[test]
    fn tail_counts_chars() {
        let mut buf = OutputBuffer::new(64);
        buf.push("line one\nline two\n");
        assert_eq!(buf.tail(9), "line two\n");
        assert_eq!(buf.tail(1000), "line one\nline two\n");
    }

    #[test]
    fn carry_holds_split_sequences() {
        let crab = "🦀".as_bytes();
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.decode(&crab[..2]).text, "");
        let done = carry.decode(&crab[2..]);
        assert_eq!(done.text, "🦀");
        assert_eq!(done.raw_len, 4);
        assert_eq!(carry.decode(b"ok").text, "ok");
    }

    #[test]
    fn carry_replaces_invalid_bytes() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.decode(&[b'a', 0xff, b'b']).text, "a\u{fffd}b");
        assert_eq!(carry.decode(&[0xf0, 0x9f]).text, "");
        let rest = carry.finish();
        assert_eq!(rest.text, "\u{fffd}");
        assert_eq!(rest.raw_len, 2);
    }

    #[test]
    fn invalid_byte_does_not_spoil_a_trailing_partial_sequence() {
        let mut carry = Utf8Carry::new();
        let first = carry.decode(&[0xff, 0xf0, 0x9f]);
        assert_eq!(first.text, "\u{fffd}");
        assert_eq!(first.raw_len, 1);
        let second = carry.decode(&[0xa6, 0x80]);
        assert_eq!(second.text, "🦀");
        assert_eq!(second.raw_len, 4);
    }

    #[test]
    fn held_sequence_that_never_completes_is_replaced() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.decode(&[0xf0, 0x9f]).text, "");
        let next = carry.decode(b"ok");
        assert_eq!(next.text, "\u{fffd}ok");
        assert_eq!(next.raw_len, 4);
    }

    #[test]
    fn total_counts_raw_bytes_not_replacements() {
        let mut carry = Utf8Carry::new();
        let mut buf = OutputBuffer::new(4);
        // three invalid bytes decode to nine bytes of replacement text
        buf.push_decoded(&carry.decode(&[0xff, 0xfe, 0xfd]));
        assert_eq!(buf.total(), 3);
        assert!(!buf.truncated());
        assert_eq!(buf.as_str(), "\u{fffd}\u{fffd}\u{fffd}");

        buf.push_decoded(&carry.decode(b"ab"));
        assert_eq!(buf.total(), 5);
        assert!(buf.truncated());
        assert!(buf.len() <= 4);
        assert!(buf.as_str().ends_with("ab"));
    }
}
