//! Line framing for the explanation event stream.
//!
//! Producer side: every [`StreamEvent`] becomes one `data: <json>` line
//! followed by a blank line, so the wire form is readable by any
//! event-stream client.
//!
//! Consumer side: [`LineBuffer`] carries the undelimited tail of the previous
//! read between chunks and only hands out lines whose `\n` has been seen.
//! [`FrameDecoder`] turns those lines back into events. Splitting happens on
//! raw bytes, so a multi-byte character cut in half by the network is joined
//! again before it is decoded.

use bytes::Bytes;
use tracing::warn;

use crate::protocol::StreamEvent;

const DATA_FIELD: &str = "data:";

/// Encode one event as a complete wire record.
pub fn encode(event: &StreamEvent) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("{DATA_FIELD} {json}\n\n")))
}

/// Return the payload of a `data:` line, if the line is one.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_FIELD)
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
}

/// Carry-over buffer that reassembles `\n`-terminated lines from arbitrary chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed, without the
    /// terminator (a trailing `\r` is stripped too).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // The carried tail holds no `\n`, so only the new bytes need scanning.
        let mut scan_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[scan_from..].iter().position(|b| *b == b'\n') {
            let end = scan_from + offset;
            let mut line = &self.buffer[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
            scan_from = start;
        }
        self.buffer.drain(..start);

        lines
    }

    pub fn take_remainder(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

/// Incremental decoder for the explanation stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read; returns the events it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| decode_record(line))
            .collect()
    }

    /// Called when the transport closes. An undelimited tail is a truncated
    /// record and is dropped; returns the number of bytes discarded.
    pub fn finish(&mut self) -> usize {
        let remainder = self.lines.take_remainder();
        if !remainder.is_empty() {
            warn!(bytes = remainder.len(), "discarding truncated stream record");
        }
        remainder.len()
    }
}

fn decode_record(line: &str) -> Option<StreamEvent> {
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = match data_payload(line) {
        Some(payload) => payload,
        None if line.starts_with('{') => line,
        None => {
            warn!(record = %line, "skipping non-data stream record");
            return None;
        }
    };

    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(record = %payload, error = %e, "skipping malformed stream record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::text("The "),
            StreamEvent::text("attention mechanism…\nweights tokens"),
            StreamEvent::tool_result("1. Attention Is All You Need"),
            StreamEvent::error("tool search_papers failed: boom"),
            StreamEvent::text("Schrödinger \"quoted\" 注意"),
            StreamEvent::Done,
        ]
    }

    fn encode_all(events: &[StreamEvent]) -> Vec<u8> {
        events
            .iter()
            .flat_map(|event| encode(event).unwrap().to_vec())
            .collect()
    }

    #[test]
    fn encodes_single_data_line() {
        let frame = encode(&StreamEvent::text("hi")).unwrap();
        assert_eq!(&frame[..], b"data: {\"type\":\"text\",\"content\":\"hi\"}\n\n");
    }

    #[test]
    fn decodes_across_fixed_chunk_sizes() {
        let events = sample_events();
        let wire = encode_all(&events);

        for size in 1..=wire.len() {
            let mut decoder = FrameDecoder::new();
            let mut decoded = Vec::new();
            for chunk in wire.chunks(size) {
                decoded.extend(decoder.push(chunk));
            }
            assert_eq!(decoder.finish(), 0, "chunk size {size}");
            assert_eq!(decoded, events, "chunk size {size}");
        }
    }

    #[test]
    fn single_event_survives_every_split_offset() {
        let event = StreamEvent::text("multi-head attention → softmax(QKᵀ/√d)");
        let wire = encode(&event).unwrap();

        for split in 0..=wire.len() {
            let mut decoder = FrameDecoder::new();
            let mut decoded = decoder.push(&wire[..split]);
            decoded.extend(decoder.push(&wire[split..]));
            assert_eq!(decoded, vec![event.clone()], "split at {split}");
        }
    }

    #[test]
    fn nothing_is_yielded_before_the_delimiter() {
        let wire = encode(&StreamEvent::text("partial")).unwrap();
        let newline = wire.iter().position(|b| *b == b'\n').unwrap();

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&wire[..newline]).is_empty());
        assert_eq!(decoder.push(&wire[newline..newline + 1]).len(), 1);
    }

    #[test]
    fn truncated_tail_is_discarded() {
        let mut decoder = FrameDecoder::new();
        let mut wire = encode(&StreamEvent::text("complete")).unwrap().to_vec();
        wire.extend_from_slice(b"data: {\"type\":\"text\",\"content\":\"cut");

        let decoded = decoder.push(&wire);
        assert_eq!(decoded, vec![StreamEvent::text("complete")]);
        assert!(decoder.finish() > 0);
        assert!(decoder.push(b"").is_empty());
    }

    #[test]
    fn malformed_records_are_skipped() {
        let mut decoder = FrameDecoder::new();
        let wire = b"data: {not json}\n\ndata: {\"type\":\"mystery\"}\n\ngarbage\ndata: {\"type\":\"done\"}\n\n";

        assert_eq!(decoder.push(wire), vec![StreamEvent::Done]);
    }

    #[test]
    fn accepts_crlf_comments_and_bare_json_lines() {
        let mut decoder = FrameDecoder::new();
        let wire = b": keep-alive\r\ndata:{\"type\":\"text\",\"content\":\"a\"}\r\n\r\n{\"type\":\"text\",\"content\":\"b\"}\n";

        assert_eq!(
            decoder.push(wire),
            vec![StreamEvent::text("a"), StreamEvent::text("b")]
        );
    }

    #[test]
    fn line_buffer_keeps_split_utf8_intact() {
        let text = "é";
        let bytes = format!("{text}\n").into_bytes();
        let mut lines = LineBuffer::default();

        assert!(lines.push(&bytes[..1]).is_empty());
        assert_eq!(lines.push(&bytes[1..]), vec![text.to_string()]);
        assert!(lines.take_remainder().is_empty());
    }

    #[test]
    fn long_line_in_tiny_chunks_is_one_line() {
        let record = "x".repeat(10_000);
        let wire = format!("{record}\r\nnext\n");
        let mut lines = LineBuffer::default();

        let mut seen = Vec::new();
        for chunk in wire.as_bytes().chunks(3) {
            seen.extend(lines.push(chunk));
        }

        assert_eq!(seen, vec![record, "next".to_string()]);
        assert!(lines.take_remainder().is_empty());
    }

    #[test]
    fn crlf_split_between_chunks_is_stripped() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"data: a\r").is_empty());
        assert_eq!(lines.push(b"\ndata: b"), vec!["data: a".to_string()]);
        assert_eq!(lines.take_remainder(), b"data: b".to_vec());
    }

    #[test]
    fn data_payload_strips_optional_space() {
        assert_eq!(data_payload("data: {}"), Some("{}"));
        assert_eq!(data_payload("data:{}"), Some("{}"));
        assert_eq!(data_payload("event: ping"), None);
    }
}
