//! Incremental `text/event-stream` decoding.

use bytes::Bytes;
use mcpload_transport_traits::{TransportMessage, TransportResult};

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// The `id:` field, if present.
    pub id: Option<String>,
}

impl SseEvent {
    /// Unnamed events and `message` events carry JSON-RPC payloads.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }

    /// Wrap the data as a transport message, keeping the event id.
    pub fn into_message(self) -> TransportResult<TransportMessage> {
        let mut message = TransportMessage::from_payload(Bytes::from(self.data))?
            .with_content_type("application/json");
        message.metadata.event_id = self.id;
        Ok(message)
    }
}

/// Splits a byte stream into [`SseEvent`]s.
///
/// Bytes are buffered until a blank line closes the event, so multi-byte
/// characters and line endings may be split across chunks freely.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// An empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, delimiter)) = find_event_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + delimiter).take(end).collect();
            if let Some(event) = parse_event(&String::from_utf8_lossy(&frame)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event the stream ended without terminating.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let frame = std::mem::take(&mut self.buffer);
        parse_event(&String::from_utf8_lossy(&frame))
    }
}

/// Position and length of the first blank-line delimiter.
fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buffer, b"\n\n").map(|pos| (pos, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_event(frame: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => data_lines.push(value),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    // Events without data are never dispatched.
    if data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_message_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: message\nid: 7\ndata: {\"jsonrpc\":\"2.0\"}\n\n");

        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("message".to_string()),
                data: r#"{"jsonrpc":"2.0"}"#.to_string(),
                id: Some("7".to_string()),
            }]
        );
        assert!(events[0].is_message());
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: endp").is_empty());
        assert!(decoder.push(b"oint\ndata: /messages?s").is_empty());
        let events = decoder.push(b"ession=1\n\nevent: message\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("endpoint"));
        assert_eq!(events[0].data, "/messages?session=1");
        assert!(!events[0].is_message());
    }

    #[test]
    fn test_crlf_delimiters_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: first\r\ndata: second\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "first\nsecond");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn test_comments_and_empty_events_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\n\nevent: ping\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let payload = "data: caf\u{e9}\n\n".as_bytes();
        let (head, tail) = payload.split_at(10);

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(head).is_empty());
        let events = decoder.push(tail);
        assert_eq!(events[0].data, "caf\u{e9}");
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"id\":1}\n").is_empty());
        let event = decoder.finish().unwrap();
        assert_eq!(event.data, r#"{"id":1}"#);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_into_message_keeps_event_id() {
        let event = SseEvent {
            event: None,
            data: r#"{"jsonrpc":"2.0","id":4,"result":{}}"#.to_string(),
            id: Some("evt-9".to_string()),
        };
        let message = event.into_message().unwrap();
        assert_eq!(message.id, Some(mcpload_protocol::MessageId::Number(4)));
        assert_eq!(message.metadata.event_id.as_deref(), Some("evt-9"));
    }
}
