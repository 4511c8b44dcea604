//! SSE (Server-Sent Events) parser
//!
//! Splits the wire format into lines and assembles lines into [`Event`]s.
//! The parser is strict: only `id:`, `event:` and `data:` fields and blank
//! record separators are accepted, anything else fails the stream.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use super::types::{Event, StreamError, StreamResult};

/// Upper bound for a single line, terminator excluded
pub const MAX_LINE_LEN: usize = 512 * 1024;

/// Buffers body chunks and hands out complete lines
#[derive(Debug)]
pub struct LineSplitter {
    /// Bytes received but not yet returned as a line
    buffer: BytesMut,
    /// Prefix of `buffer` already known to contain no newline
    scanned: usize,
    max_line_len: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSplitter {
    /// Create a splitter with the default line bound
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_LEN)
    }

    /// Create a splitter with a custom line bound
    pub fn with_limit(max_line_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_line_len,
        }
    }

    /// Append a chunk of body bytes
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete line, without its LF or CRLF terminator.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn next_line(&mut self) -> StreamResult<Option<Bytes>> {
        let newline = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|offset| self.scanned + offset);

        match newline {
            Some(pos) => {
                self.scanned = 0;
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                self.check_len(line.len())?;
                Ok(Some(line.freeze()))
            }
            None => {
                self.scanned = self.buffer.len();
                // A trailing CR may belong to a CRLF whose LF is still in flight.
                let pending = self.buffer.len() - usize::from(self.buffer.last() == Some(&b'\r'));
                self.check_len(pending)?;
                Ok(None)
            }
        }
    }

    /// Take whatever unterminated bytes remain once the body has ended
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let mut rest = self.buffer.split();
        if rest.last() == Some(&b'\r') {
            rest.truncate(rest.len() - 1);
        }
        Some(rest.freeze())
    }

    fn check_len(&self, len: usize) -> StreamResult<()> {
        if len > self.max_line_len {
            return Err(StreamError::LineTooLong {
                limit: self.max_line_len,
            });
        }
        Ok(())
    }
}

/// Event assembly state: the draft record and its data accumulator
#[derive(Debug, Default)]
pub struct SseParser {
    id: String,
    name: String,
    data: BytesMut,
}

impl SseParser {
    /// Create a new SSE parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one line (terminator already stripped).
    ///
    /// Returns the completed event when `line` is the blank record separator.
    pub fn process_line(&mut self, line: &[u8]) -> StreamResult<Option<Event>> {
        trace!(len = line.len(), line = %String::from_utf8_lossy(line), "SSE line");

        if line.is_empty() {
            return Ok(Some(self.dispatch_event()));
        }

        if let Some(value) = field_value(line, b"id:") {
            self.id = String::from_utf8_lossy(value).into_owned();
        } else if let Some(value) = field_value(line, b"event:") {
            self.name = String::from_utf8_lossy(value).into_owned();
        } else if let Some(value) = field_value(line, b"data:") {
            self.data.extend_from_slice(value);
        } else {
            return Err(StreamError::Parse {
                line: String::from_utf8_lossy(line).into_owned(),
                len: line.len(),
            });
        }

        Ok(None)
    }

    /// Whether a record is partially assembled
    pub fn has_pending(&self) -> bool {
        !self.id.is_empty() || !self.name.is_empty() || !self.data.is_empty()
    }

    /// Hand off the draft and reset for the next record
    fn dispatch_event(&mut self) -> Event {
        Event {
            id: std::mem::take(&mut self.id),
            name: std::mem::take(&mut self.name),
            data: self.data.split().freeze(),
        }
    }
}

/// Value of `line` after `prefix` and its single separating space
fn field_value<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    let rest = line.strip_prefix(prefix)?;
    Some(rest.strip_prefix(b" ").unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_lines(lines: &[&str]) -> StreamResult<Vec<Event>> {
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for line in lines {
            if let Some(event) = parser.process_line(line.as_bytes())? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn split_all(splitter: &mut LineSplitter) -> Vec<Bytes> {
        let mut lines = Vec::new();
        while let Some(line) = splitter.next_line().unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_id_only_record() {
        let events = parse_lines(&["id: 42", ""]).unwrap();
        assert_eq!(
            events,
            vec![Event {
                id: "42".into(),
                name: String::new(),
                data: Bytes::new(),
            }]
        );
    }

    #[test]
    fn test_data_lines_concatenate_without_separator() {
        let events = parse_lines(&["event: push", "data: {\"a\":1}", "data: 23", ""]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "push");
        assert_eq!(events[0].id, "");
        assert_eq!(&events[0].data[..], b"{\"a\":1}23");
    }

    #[test]
    fn test_record_without_id_has_empty_id() {
        let events = parse_lines(&["event: ready", "data: connected", ""]).unwrap();
        assert_eq!(events[0].id, "");
        assert!(!events[0].is_forwardable());
    }

    #[test]
    fn test_state_resets_between_records() {
        let events = parse_lines(&[
            "id: 1",
            "event: push",
            "data: first",
            "",
            "data: second",
            "",
        ])
        .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].id, "");
        assert_eq!(events[1].name, "");
        assert_eq!(&events[1].data[..], b"second");
    }

    #[test]
    fn test_consecutive_blank_lines_emit_empty_events() {
        let events = parse_lines(&["", ""]).unwrap();
        assert_eq!(events, vec![Event::default(), Event::default()]);
    }

    #[test]
    fn test_unrecognized_line_is_rejected() {
        let err = parse_lines(&["id: 1", "retry: 1000", ""]).unwrap_err();
        match err {
            StreamError::Parse { line, len } => {
                assert_eq!(line, "retry: 1000");
                assert_eq!(len, 11);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_comment_line_is_rejected() {
        assert!(matches!(
            parse_lines(&[": keepalive"]),
            Err(StreamError::Parse { .. })
        ));
    }

    #[test]
    fn test_field_without_space() {
        let events = parse_lines(&["id:9", "data:x", ""]).unwrap();
        assert_eq!(events[0].id, "9");
        assert_eq!(&events[0].data[..], b"x");
    }

    #[test]
    fn test_only_one_space_is_stripped() {
        let events = parse_lines(&["data:   indented", ""]).unwrap();
        assert_eq!(&events[0].data[..], b"  indented");
    }

    #[test]
    fn test_has_pending() {
        let mut parser = SseParser::new();
        assert!(!parser.has_pending());
        parser.process_line(b"data: x").unwrap();
        assert!(parser.has_pending());
        parser.process_line(b"").unwrap();
        assert!(!parser.has_pending());
    }

    #[test]
    fn test_splitter_handles_lf_and_crlf() {
        let mut splitter = LineSplitter::new();
        splitter.push(b"id: 1\r\ndata: a\n\r\n");
        let lines = split_all(&mut splitter);
        assert_eq!(
            lines,
            vec![
                Bytes::from_static(b"id: 1"),
                Bytes::from_static(b"data: a"),
                Bytes::new(),
            ]
        );
    }

    #[test]
    fn test_splitter_chunked_data() {
        let mut splitter = LineSplitter::new();

        splitter.push(b"data: {\"ts\":1,");
        assert_eq!(splitter.next_line().unwrap(), None);

        splitter.push(b"\"seq\":1}\n");
        assert_eq!(
            splitter.next_line().unwrap(),
            Some(Bytes::from_static(b"data: {\"ts\":1,\"seq\":1}"))
        );
        assert_eq!(splitter.next_line().unwrap(), None);
    }

    #[test]
    fn test_splitter_crlf_split_across_chunks() {
        let mut splitter = LineSplitter::new();
        splitter.push(b"id: 5\r");
        assert_eq!(splitter.next_line().unwrap(), None);
        splitter.push(b"\n");
        assert_eq!(
            splitter.next_line().unwrap(),
            Some(Bytes::from_static(b"id: 5"))
        );
    }

    #[test]
    fn test_splitter_tolerates_large_lines() {
        let mut splitter = LineSplitter::new();
        let mut line = b"data: ".to_vec();
        line.resize(MAX_LINE_LEN, b'x');
        splitter.push(&line);
        splitter.push(b"\n");

        let out = splitter.next_line().unwrap().unwrap();
        assert_eq!(out.len(), MAX_LINE_LEN);
    }

    #[test]
    fn test_splitter_rejects_oversized_line() {
        let mut splitter = LineSplitter::with_limit(16);
        splitter.push(b"data: 0123456789abcdef");
        assert!(matches!(
            splitter.next_line(),
            Err(StreamError::LineTooLong { limit: 16 })
        ));
    }

    #[test]
    fn test_splitter_accepts_full_length_line_with_split_crlf() {
        let mut splitter = LineSplitter::with_limit(16);
        splitter.push(b"data: 0123456789\r");
        assert!(splitter.next_line().unwrap().is_none());

        splitter.push(b"\n");
        let line = splitter.next_line().unwrap().unwrap();
        assert_eq!(&line[..], b"data: 0123456789");
    }

    #[test]
    fn test_splitter_rejects_oversized_line_ending_in_cr() {
        let mut splitter = LineSplitter::with_limit(16);
        splitter.push(b"data: 0123456789x\r");
        assert!(matches!(
            splitter.next_line(),
            Err(StreamError::LineTooLong { limit: 16 })
        ));
    }

    #[test]
    fn test_splitter_finish_returns_unterminated_tail() {
        let mut splitter = LineSplitter::new();
        splitter.push(b"id: 1\ndata: tail");
        assert_eq!(split_all(&mut splitter).len(), 1);
        assert_eq!(splitter.finish(), Some(Bytes::from_static(b"data: tail")));
        assert_eq!(splitter.finish(), None);
    }
}
