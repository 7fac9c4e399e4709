//! Newline-delimited JSON decoding for channel read bodies
//!
//! The broker flushes chunks as they arrive, so one network fragment may hold
//! several lines, part of a line, or both.

use bytes::{Buf, BytesMut};

use crate::chunk::RawChunk;
use crate::error::ChannelError;

/// Splits a byte stream into complete lines, carrying partial lines across fragments
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Bytes after the last newline handed out
    partial: BytesMut,
    /// Prefix of `partial` already searched for a newline
    scanned: usize,
    /// Lines handed out, for logging
    lines_decoded: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment of the read body
    pub fn feed(&mut self, fragment: &[u8]) {
        self.partial.extend_from_slice(fragment);
    }

    /// Next complete line as a chunk, in body order.
    ///
    /// A malformed line is returned as an error in its position; lines before
    /// it have already been handed out.
    pub fn next_chunk(&mut self) -> Option<Result<RawChunk, ChannelError>> {
        loop {
            let Some(pos) = self.partial[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = self.partial.len();
                return None;
            };
            let line = self.partial.split_to(self.scanned + pos);
            self.partial.advance(1);
            self.scanned = 0;
            if let Some(parsed) = self.parse_line(&line).transpose() {
                return Some(parsed);
            }
        }
    }

    /// Flush a trailing line left without a newline at end of body
    pub fn finish(&mut self) -> Result<Option<RawChunk>, ChannelError> {
        let rest = self.partial.split();
        self.scanned = 0;
        self.parse_line(&rest)
    }

    pub fn lines_decoded(&self) -> usize {
        self.lines_decoded
    }

    fn parse_line(&mut self, line: &[u8]) -> Result<Option<RawChunk>, ChannelError> {
        let text = std::str::from_utf8(line).map_err(|err| ChannelError::MalformedChunk {
            line: String::from_utf8_lossy(line).into_owned(),
            reason: err.to_string(),
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        self.lines_decoded += 1;
        serde_json::from_str::<RawChunk>(text)
            .map(Some)
            .map_err(|err| ChannelError::MalformedChunk {
                line: text.to_string(),
                reason: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(sid: &str, eid: &str) -> String {
        format!(r#"{{"sid":"{sid}","eid":"{eid}","ts":"2024-03-01T12:30:00Z","body":{{"n":1}}}}"#)
    }

    fn drain(decoder: &mut LineDecoder) -> Vec<Result<RawChunk, ChannelError>> {
        std::iter::from_fn(|| decoder.next_chunk()).collect()
    }

    fn event_ids(results: Vec<Result<RawChunk, ChannelError>>) -> Vec<String> {
        results.into_iter().map(|r| r.unwrap().event_id).collect()
    }

    #[test]
    fn test_multiple_lines_in_one_fragment() {
        let mut decoder = LineDecoder::new();
        decoder.feed(format!("{}\n{}\n", line("a", "1"), line("b", "2")).as_bytes());
        let chunks: Vec<_> = drain(&mut decoder).into_iter().map(Result::unwrap).collect();

        let ids: Vec<_> = chunks.iter().map(|c| (c.stream_id.as_str(), c.event_id.as_str())).collect();
        assert_eq!(ids, vec![("a", "1"), ("b", "2")]);
        assert!(decoder.finish().unwrap().is_none());
    }

    #[test]
    fn test_line_split_across_fragments() {
        let mut decoder = LineDecoder::new();
        let full = format!("{}\n", line("a", "1"));
        let (head, tail) = full.as_bytes().split_at(17);

        decoder.feed(head);
        assert!(decoder.next_chunk().is_none());
        decoder.feed(tail);
        assert_eq!(event_ids(drain(&mut decoder)), vec!["1"]);
    }

    #[test]
    fn test_long_line_in_many_small_fragments() {
        let mut decoder = LineDecoder::new();
        let full = format!("{}\n{}\n", line("a", "1"), line("a", "2"));
        let mut ids = Vec::new();
        for byte in full.as_bytes().chunks(3) {
            decoder.feed(byte);
            ids.extend(event_ids(drain(&mut decoder)));
        }
        assert_eq!(ids, vec!["1", "2"]);
        assert!(decoder.finish().unwrap().is_none());
    }

    #[test]
    fn test_multibyte_char_split_across_fragments() {
        let mut decoder = LineDecoder::new();
        let full = format!(
            "{}\n",
            r#"{"sid":"a","eid":"1","ts":"2024-03-01T12:30:00Z","body":"héllo"}"#
        );
        let bytes = full.as_bytes();
        let split = full.find('é').unwrap() + 1;

        decoder.feed(&bytes[..split]);
        assert!(decoder.next_chunk().is_none());
        decoder.feed(&bytes[split..]);
        let chunk = decoder.next_chunk().unwrap().unwrap();
        assert_eq!(chunk.body, serde_json::json!("héllo"));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut decoder = LineDecoder::new();
        decoder.feed(format!("\n\r\n{}\n  \n", line("a", "1")).as_bytes());
        assert_eq!(drain(&mut decoder).len(), 1);
        assert_eq!(decoder.lines_decoded(), 1);
    }

    #[test]
    fn test_trailing_line_flushed_on_finish() {
        let mut decoder = LineDecoder::new();
        decoder.feed(line("a", "9").as_bytes());
        assert!(decoder.next_chunk().is_none());
        let chunk = decoder.finish().unwrap().unwrap();
        assert_eq!(chunk.event_id, "9");
    }

    #[test]
    fn test_malformed_line_is_error() {
        let mut decoder = LineDecoder::new();
        decoder.feed(b"not json\n");
        let err = decoder.next_chunk().unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::MalformedChunk { ref line, .. } if line == "not json"));
    }

    #[test]
    fn test_lines_before_malformed_line_survive() {
        let mut decoder = LineDecoder::new();
        decoder.feed(format!("{}\n{}\n{{broken\n", line("a", "1"), line("a", "2")).as_bytes());

        assert_eq!(decoder.next_chunk().unwrap().unwrap().event_id, "1");
        assert_eq!(decoder.next_chunk().unwrap().unwrap().event_id, "2");
        assert!(decoder.next_chunk().unwrap().is_err());
        assert!(decoder.next_chunk().is_none());
    }
}
