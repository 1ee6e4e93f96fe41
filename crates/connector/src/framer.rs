//! Newline framing over the raw socket byte stream.

use bytes::{Buf, BytesMut};

const LINE_TERMINATOR: u8 = b'\n';

/// Accumulates socket reads and hands out complete lines in arrival order.
///
/// Owned by the reader task, so no lock guards the buffer.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete line with surrounding whitespace and `\r` removed.
    ///
    /// Returns `None` until a terminator has been buffered. A bare newline
    /// yields an empty string.
    pub fn next_message(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|b| *b == LINE_TERMINATOR)?;
        let line = decode_latin1(&self.buf[..end]);
        self.buf.advance(end + 1);
        Some(line.trim().to_string())
    }

    /// Bytes held back waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// The gateway speaks ISO-8859-1; every byte maps to the code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

/// Encode for the wire; `None` if a character has no ISO-8859-1 representation.
pub fn encode_latin1(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partial_line_is_withheld() {
        let mut framer = LineFramer::new();
        framer.feed(b"S,STATS,1");
        assert_eq!(framer.next_message(), None);
        assert_eq!(framer.pending(), 9);

        framer.feed(b",2\r\nT,2023");
        assert_eq!(framer.next_message().as_deref(), Some("S,STATS,1,2"));
        assert_eq!(framer.next_message(), None);
        assert_eq!(framer.pending(), 6);
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut framer = LineFramer::new();
        framer.feed(b"E,first\r\n\r\nT,20230101 09:30:00\n");
        assert_eq!(framer.next_message().as_deref(), Some("E,first"));
        assert_eq!(framer.next_message().as_deref(), Some(""));
        assert_eq!(
            framer.next_message().as_deref(),
            Some("T,20230101 09:30:00")
        );
        assert_eq!(framer.next_message(), None);

        framer.feed(b"n,ZZZZ\n");
        assert_eq!(framer.next_message().as_deref(), Some("n,ZZZZ"));
    }

    #[test]
    fn test_latin1_round_trip() {
        let mut framer = LineFramer::new();
        framer.feed(&[b'E', b',', 0xE9, b'\n']);
        assert_eq!(framer.next_message().as_deref(), Some("E,\u{e9}"));

        assert_eq!(encode_latin1("S,\u{e9}"), Some(vec![b'S', b',', 0xE9]));
        assert_eq!(encode_latin1("\u{20ac}"), None);
    }

    proptest! {
        #[test]
        fn test_chunking_is_transparent(
            lines in prop::collection::vec("[A-Za-z0-9 ,.:]{0,24}", 1..16),
            tail in "[A-Z,]{0,8}",
            cuts in prop::collection::vec(1usize..32, 1..16),
        ) {
            let mut stream = String::new();
            for line in &lines {
                stream.push_str(line);
                stream.push_str("\r\n");
            }
            stream.push_str(&tail);
            let bytes = stream.as_bytes();

            let mut framer = LineFramer::new();
            let mut out = Vec::new();
            let mut offset = 0;
            let mut cut = cuts.iter().cycle();
            while offset < bytes.len() {
                let end = (offset + cut.next().copied().unwrap_or(1)).min(bytes.len());
                framer.feed(&bytes[offset..end]);
                while let Some(msg) = framer.next_message() {
                    out.push(msg);
                }
                offset = end;
            }

            let expected: Vec<String> = lines.iter().map(|l| l.trim().to_string()).collect();
            prop_assert_eq!(out, expected);
            prop_assert_eq!(framer.pending(), tail.len());
        }
    }
}
