//! Incremental decoder for the server-push event stream.
//!
//! # Wire Format
//!
//! ```text
//! event: endpoint\n
//! data: /messages?session_id=abc\n
//! \n
//! event: message\n
//! data: {"jsonrpc":"2.0","id":1,"result":{}}\n
//! \n
//! ```
//!
//! Each block is an `event:` line, a `data:` line and a blank line. Both CRLF
//! and LF line endings are accepted and whitespace around the kind and the
//! payload is trimmed. Comment lines (leading `:`, used for keep-alives) and
//! the `id:`/`retry:` fields are skipped.
//!
//! The HTTP body arrives in chunks of arbitrary size. [`EventDecoder`] keeps
//! the unconsumed tail of every chunk, so a block split across reads is
//! reassembled and a chunk holding several blocks yields all of them.

use crate::error::FramingError;

/// Default limit (16MB) on a single buffered event.
pub const DEFAULT_MAX_EVENT_SIZE: usize = 16 * 1024 * 1024;

/// Kind named by the `event:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Announces the path requests must be POSTed to.
    Endpoint,
    /// Carries a JSON-RPC response.
    Message,
    /// Any other kind; the transport ignores these.
    Other(String),
}

impl EventKind {
    fn parse(name: &str) -> Self {
        match name {
            "endpoint" => EventKind::Endpoint,
            "message" => EventKind::Message,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Endpoint => "endpoint",
            EventKind::Message => "message",
            EventKind::Other(name) => name,
        }
    }
}

/// One complete event block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub data: String,
}

impl StreamEvent {
    pub fn new(kind: EventKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }
}

/// Line-oriented state machine turning raw chunks into [`StreamEvent`]s.
#[derive(Debug)]
pub struct EventDecoder {
    /// Bytes received; everything before `consumed` has been read as lines.
    buffer: Vec<u8>,
    /// Start of the unread tail of `buffer`.
    consumed: usize,
    /// Prefix of `buffer` already searched for a newline.
    scanned: usize,
    kind: Option<EventKind>,
    data: Option<String>,
    /// Bytes consumed by the block under construction.
    block_len: usize,
    max_event_size: usize,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder {
    /// Create a decoder with the default 16MB event limit.
    pub fn new() -> Self {
        Self::with_max_event_size(DEFAULT_MAX_EVENT_SIZE)
    }

    /// Create a decoder that rejects any event block larger than
    /// `max_event_size` bytes, line terminators included and the closing
    /// blank line excluded.
    pub fn with_max_event_size(max_event_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            consumed: 0,
            scanned: 0,
            kind: None,
            data: None,
            block_len: 0,
            max_event_size,
        }
    }

    /// Append a chunk read from the stream.
    ///
    /// Lines read since the previous call are discarded here, once per chunk
    /// rather than once per line.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.consumed > 0 {
            self.buffer.drain(..self.consumed);
            self.scanned -= self.consumed;
            self.consumed = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete event, if the buffered input contains one.
    ///
    /// Returns `Ok(None)` when more input is needed. Once an error has been
    /// returned the decoder must be discarded.
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>, FramingError> {
        loop {
            let Some(line) = self.take_line()? else {
                if self.unread() + self.block_len > self.max_event_size {
                    return Err(self.oversized());
                }
                return Ok(None);
            };

            let blank = line.trim().is_empty();
            if !blank && self.block_len > self.max_event_size {
                return Err(self.oversized());
            }

            if let Some(event) = self.process_line(&line)? {
                return Ok(Some(event));
            }
        }
    }

    /// Feed a chunk and drain every event it completes.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, FramingError> {
        self.feed(chunk);
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    /// Whether a partial line or block is still buffered.
    ///
    /// Used at end of stream to report a truncated final event.
    pub fn has_partial(&self) -> bool {
        self.unread() > 0 || self.kind.is_some() || self.data.is_some()
    }

    fn unread(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    fn oversized(&self) -> FramingError {
        FramingError::Oversized {
            limit: self.max_event_size,
        }
    }

    fn take_line(&mut self) -> Result<Option<String>, FramingError> {
        let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buffer.len();
            return Ok(None);
        };

        let newline = self.scanned + offset;
        let start = self.consumed;
        self.consumed = newline + 1;
        self.scanned = self.consumed;
        self.block_len += newline + 1 - start;

        let mut line = &self.buffer[start..newline];
        if let [rest @ .., b'\r'] = line {
            line = rest;
        }
        std::str::from_utf8(line)
            .map(|line| Some(line.to_string()))
            .map_err(|_| FramingError::InvalidUtf8)
    }

    fn process_line(&mut self, line: &str) -> Result<Option<StreamEvent>, FramingError> {
        if line.trim().is_empty() {
            return self.finish_block();
        }

        // Comment / keep-alive
        if line.starts_with(':') {
            return Ok(None);
        }

        let Some(colon_pos) = line.find(':') else {
            return Err(FramingError::Malformed(line.to_string()));
        };
        let field = line[..colon_pos].trim();
        let value = line[colon_pos + 1..].trim();

        match field {
            "event" => {
                if self.kind.is_some() || self.data.is_some() {
                    return Err(FramingError::OutOfOrder("event"));
                }
                self.kind = Some(EventKind::parse(value));
            }
            "data" => {
                if self.kind.is_none() || self.data.is_some() {
                    return Err(FramingError::OutOfOrder("data"));
                }
                self.data = Some(value.to_string());
            }
            "id" | "retry" => {}
            _ => return Err(FramingError::Malformed(line.to_string())),
        }

        Ok(None)
    }

    fn finish_block(&mut self) -> Result<Option<StreamEvent>, FramingError> {
        let kind = self.kind.take();
        let data = self.data.take();
        self.block_len = 0;

        match (kind, data) {
            // Stray blank line between blocks
            (None, None) => Ok(None),
            (Some(kind), Some(data)) => Ok(Some(StreamEvent { kind, data })),
            (Some(_), None) => Err(FramingError::Incomplete("data")),
            (None, Some(_)) => Err(FramingError::Incomplete("event")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STREAM: &str = "event: endpoint\ndata: /messages?session_id=abc\n\n\
                          event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n\
                          event: message\ndata: {\"id\":2,\"result\":{\"text\":\"h\u{e9}llo\"}}\n\n";

    fn expected() -> Vec<StreamEvent> {
        vec![
            StreamEvent::new(EventKind::Endpoint, "/messages?session_id=abc"),
            StreamEvent::new(EventKind::Message, r#"{"jsonrpc":"2.0","id":1,"result":{}}"#),
            StreamEvent::new(EventKind::Message, "{\"id\":2,\"result\":{\"text\":\"h\u{e9}llo\"}}"),
        ]
    }

    fn decode_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<StreamEvent> {
        let mut decoder = EventDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.decode(chunk).unwrap());
        }
        assert!(!decoder.has_partial());
        events
    }

    #[test]
    fn test_single_chunk_with_several_blocks() {
        let events = decode_chunks([STREAM.as_bytes()]);
        assert_eq!(events, expected());
    }

    #[test]
    fn test_every_split_point_yields_same_events() {
        let bytes = STREAM.as_bytes();
        for split in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(split);
            assert_eq!(decode_chunks([head, tail]), expected(), "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let events = decode_chunks(STREAM.as_bytes().chunks(1));
        assert_eq!(events, expected());
    }

    #[test]
    fn test_uneven_chunk_sizes() {
        let bytes = STREAM.as_bytes();
        for size in [2, 3, 7, 13, 64] {
            assert_eq!(decode_chunks(bytes.chunks(size)), expected(), "chunk size {}", size);
        }
    }

    #[test]
    fn test_no_event_until_block_terminated() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.decode(b"event: message\ndata: {}\n").unwrap().is_empty());
        assert!(decoder.has_partial());

        let events = decoder.decode(b"\n").unwrap();
        assert_eq!(events, vec![StreamEvent::new(EventKind::Message, "{}")]);
    }

    #[test]
    fn test_trims_whitespace_and_crlf() {
        let mut decoder = EventDecoder::new();
        let events = decoder
            .decode(b"event:   endpoint  \r\ndata:\t/messages?id=1 \r\n\r\n")
            .unwrap();
        assert_eq!(events, vec![StreamEvent::new(EventKind::Endpoint, "/messages?id=1")]);
    }

    #[test]
    fn test_skips_comments_and_stray_blank_lines() {
        let mut decoder = EventDecoder::new();
        let events = decoder
            .decode(b": ping\n\n\nevent: message\nid: 42\ndata: {}\nretry: 1000\n\n: ping\n\n")
            .unwrap();
        assert_eq!(events, vec![StreamEvent::new(EventKind::Message, "{}")]);
    }

    #[test]
    fn test_unknown_kind_is_passed_through() {
        let mut decoder = EventDecoder::new();
        let events = decoder.decode(b"event: heartbeat\ndata: 1\n\n").unwrap();
        assert_eq!(events[0].kind, EventKind::Other("heartbeat".to_string()));
        assert_eq!(events[0].kind.as_str(), "heartbeat");
    }

    #[test]
    fn test_line_without_colon_is_malformed() {
        let mut decoder = EventDecoder::new();
        let err = decoder.decode(b"garbage\n").unwrap_err();
        assert_eq!(err, FramingError::Malformed("garbage".to_string()));
    }

    #[test]
    fn test_unknown_field_is_malformed() {
        let mut decoder = EventDecoder::new();
        let err = decoder.decode(b"event: message\npayload: {}\n\n").unwrap_err();
        assert!(matches!(err, FramingError::Malformed(_)));
    }

    #[test]
    fn test_data_before_event_is_rejected() {
        let mut decoder = EventDecoder::new();
        let err = decoder.decode(b"data: {}\nevent: message\n\n").unwrap_err();
        assert_eq!(err, FramingError::OutOfOrder("data"));
    }

    #[test]
    fn test_repeated_fields_are_rejected() {
        let mut decoder = EventDecoder::new();
        let err = decoder.decode(b"event: message\nevent: message\n").unwrap_err();
        assert_eq!(err, FramingError::OutOfOrder("event"));

        let mut decoder = EventDecoder::new();
        let err = decoder.decode(b"event: message\ndata: 1\ndata: 2\n").unwrap_err();
        assert_eq!(err, FramingError::OutOfOrder("data"));
    }

    #[test]
    fn test_block_missing_data_is_incomplete() {
        let mut decoder = EventDecoder::new();
        let err = decoder.decode(b"event: message\n\n").unwrap_err();
        assert_eq!(err, FramingError::Incomplete("data"));
    }

    #[test]
    fn test_oversized_partial_line() {
        let mut decoder = EventDecoder::with_max_event_size(16);
        let err = decoder.decode(b"event: message\ndata: 0123456789").unwrap_err();
        assert_eq!(err, FramingError::Oversized { limit: 16 });
    }

    #[test]
    fn test_oversized_block_in_one_chunk() {
        let mut decoder = EventDecoder::with_max_event_size(16);
        let chunk = format!("event: message\ndata: {}\n\n", "x".repeat(1000));
        let err = decoder.decode(chunk.as_bytes()).unwrap_err();
        assert_eq!(err, FramingError::Oversized { limit: 16 });
    }

    #[test]
    fn test_limit_applies_per_block() {
        let block = "event: a\ndata: b\n\n";
        let mut decoder = EventDecoder::with_max_event_size(block.len());
        let events = decoder.decode(block.repeat(50).as_bytes()).unwrap();
        assert_eq!(events.len(), 50);
    }

    #[test]
    fn test_many_keepalives_in_one_chunk() {
        let mut decoder = EventDecoder::new();
        let mut chunk = ": ping\n".repeat(10_000);
        chunk.push_str("event: message\ndata: {}\n\nevent: mess");

        let events = decoder.decode(chunk.as_bytes()).unwrap();
        assert_eq!(events, vec![StreamEvent::new(EventKind::Message, "{}")]);
        assert!(decoder.has_partial());

        // Consumed lines are released on the next feed.
        let events = decoder.decode(b"age\ndata: 1\n\n").unwrap();
        assert_eq!(events, vec![StreamEvent::new(EventKind::Message, "1")]);
        assert_eq!(decoder.consumed, decoder.buffer.len());
        assert!(decoder.buffer.len() < 32);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_event_exactly_at_limit() {
        let block = b"event: a\ndata: b\n";
        let mut decoder = EventDecoder::with_max_event_size(block.len());
        assert!(decoder.decode(block).unwrap().is_empty());
        assert_eq!(decoder.decode(b"\n").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_utf8() {
        let mut decoder = EventDecoder::new();
        let err = decoder.decode(b"event: \xff\xfe\n").unwrap_err();
        assert_eq!(err, FramingError::InvalidUtf8);
    }
}
