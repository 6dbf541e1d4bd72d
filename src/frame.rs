/// Splits an NDJSON byte stream into complete text records.
///
/// Chunks may end anywhere, including inside a multi-byte UTF-8 sequence,
/// so bytes are buffered until a `\n` completes the record. Blank records
/// are skipped and surrounding whitespace (`\r` included) is trimmed.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    // Bytes before this offset are known to contain no newline.
    scanned: usize,
}

impl FrameDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if let Some(record) = decode_record(&self.buf[..end]) {
                records.push(record);
            }
            self.buf.drain(..=end);
            self.scanned = 0;
        }
        self.scanned = self.buf.len();
        records
    }

    /// Flushes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buf);
        decode_record(&rest)
    }
}

fn decode_record(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STREAM: &str = concat!(
        "{\"type\":\"thinking\",\"text\":\"hmm\"}\n",
        "\n",
        "{\"type\":\"content\",\"text\":\"héllo wörld\"}\r\n",
        "{\"type\":\"done\",\"conversation_id\":\"c1\"}"
    );

    fn decode_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = FrameDecoder::default();
        let mut records = Vec::new();
        for chunk in chunks {
            records.extend(decoder.push_chunk(chunk));
        }
        records.extend(decoder.finish());
        records
    }

    #[test]
    fn holds_partial_record_until_newline() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.push_chunk(b"{\"type\":\"con").is_empty());
        assert_eq!(
            decoder.push_chunk(b"tent\"}\n{\"ty"),
            vec!["{\"type\":\"content\"}".to_string()]
        );
        assert_eq!(decoder.finish(), Some("{\"ty".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn every_two_cut_split_yields_the_same_records() {
        let bytes = STREAM.as_bytes();
        let expected = decode_all(&[bytes]);
        assert_eq!(expected.len(), 3);

        for first in 0..=bytes.len() {
            for second in first..=bytes.len() {
                let records =
                    decode_all(&[&bytes[..first], &bytes[first..second], &bytes[second..]]);
                assert_eq!(records, expected, "split at {first}/{second}");
            }
        }
    }

    #[test]
    fn byte_at_a_time_matches_whole_stream() {
        let bytes = STREAM.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&chunks), decode_all(&[bytes]));
    }

    #[test]
    fn never_emits_line_terminators_or_blank_records() {
        let records = decode_all(&[b"\n\n  \r\na\r\n\nb\n\n"]);
        assert_eq!(records, vec!["a".to_string(), "b".to_string()]);
        assert!(records.iter().all(|r| !r.contains('\n') && !r.contains('\r')));
    }

    #[test]
    fn whitespace_only_tail_is_not_a_record() {
        let mut decoder = FrameDecoder::default();
        assert_eq!(decoder.push_chunk(b"x\n   "), vec!["x".to_string()]);
        assert_eq!(decoder.finish(), None);
    }
}
