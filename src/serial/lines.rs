//! Splits the raw serial byte stream into text lines.

use std::borrow::Cow;

const MAX_PARTIAL: usize = 8192;
const KEEP_ON_TRIM: usize = 4096;

/// Accumulates chunks read from the port and yields complete lines.
///
/// Lines end at CR, LF or any run of them, so CR+LF terminated device
/// output yields one line per record. Blank lines are dropped. Splitting
/// happens on raw bytes and each line is decoded once, so a multi-byte
/// character cut by a read boundary survives. Bytes that are not valid
/// UTF-8 are replaced rather than rejected.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
    trims: u64,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| is_terminator(*b)) {
            let mut advance = pos + 1;
            while advance < self.partial.len() && is_terminator(self.partial[advance]) {
                advance += 1;
            }
            let raw: Vec<u8> = self.partial.drain(..advance).take(pos).collect();
            let line = decode(&raw);
            if !line.is_empty() {
                lines.push(line);
            }
        }

        if self.partial.len() > MAX_PARTIAL {
            let cut = self.partial.len() - KEEP_ON_TRIM;
            self.partial.drain(..cut);
            self.trims += 1;
            log::warn!("Serial line buffer exceeded {} bytes without a terminator, trimmed", MAX_PARTIAL);
        }

        lines
    }

    /// Number of times an unterminated buffer had to be trimmed.
    pub fn trims(&self) -> u64 {
        self.trims
    }

    /// Bytes of the unfinished line, decoded for display
    pub fn pending(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.partial)
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

fn decode(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.trim().to_string(),
        Err(_) => {
            log::debug!("Non UTF-8 bytes in serial line, decoding lossily");
            String::from_utf8_lossy(raw).trim().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crlf_lines() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"OK\r\nMOK_SCAN:1,2\r\n");
        assert_eq!(lines, vec!["OK".to_string(), "MOK_SCAN:1,2".to_string()]);
        assert!(splitter.pending().is_empty());
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"0102").is_empty());
        assert_eq!(splitter.pending(), "0102");
        let lines = splitter.push(b"03\r\n\r\nOK\n");
        assert_eq!(lines, vec!["010203".to_string(), "OK".to_string()]);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"\r\n\r\n   \r\n").is_empty());
    }

    #[test]
    fn test_oversized_partial_is_trimmed() {
        let mut splitter = LineSplitter::new();
        let chunk = vec![b'A'; MAX_PARTIAL + 10];
        assert!(splitter.push(&chunk).is_empty());
        assert_eq!(splitter.pending().len(), KEEP_ON_TRIM);
        assert_eq!(splitter.trims(), 1);
    }

    #[test]
    fn test_cyrillic_tag_split_mid_character() {
        let bytes = "МОК_SCAN:1,2\r\n".as_bytes();
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(&bytes[..1]).is_empty());
        assert_eq!(splitter.push(&bytes[1..]), vec!["МОК_SCAN:1,2".to_string()]);
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let bytes = "7:АМ8\r\nМОК_SCAN:7\r\n".as_bytes();
        let mut splitter = LineSplitter::new();
        let lines: Vec<String> = bytes.iter().flat_map(|b| splitter.push(&[*b])).collect();
        assert_eq!(lines, vec!["7:АМ8".to_string(), "МОК_SCAN:7".to_string()]);
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"O\xffK\n");
        assert_eq!(lines, vec!["O\u{FFFD}K".to_string()]);
    }
}
