//! Incremental server-sent-events parsing.
//!
//! HTTP chunk boundaries do not line up with SSE event boundaries, so the
//! adapters feed raw chunks into a small stateful splitter and get back
//! complete `data:` payloads.

/// Accumulates partial lines across chunks and yields complete `data:`
/// payloads in arrival order.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    pending: String,
}

impl SseLineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk; returns every complete `data:` payload it closed.
    pub(crate) fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
            // "event:" lines and blank keep-alives carry no payload.
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_event_in_one_chunk() {
        let mut buf = SseLineBuffer::new();
        let out = buf.push("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(out, vec!["{\"a\":1}"]);
    }

    #[test]
    fn payload_split_across_chunks() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.push("data: {\"tex").is_empty());
        let out = buf.push("t\":\"hi\"}\n");
        assert_eq!(out, vec!["{\"text\":\"hi\"}"]);
    }

    #[test]
    fn multiple_events_per_chunk() {
        let mut buf = SseLineBuffer::new();
        let out = buf.push("data: one\ndata: two\n\ndata: three\n");
        assert_eq!(out, vec!["one", "two", "three"]);
    }

    #[test]
    fn crlf_lines() {
        let mut buf = SseLineBuffer::new();
        let out = buf.push("data: hello\r\n");
        assert_eq!(out, vec!["hello"]);
    }

    #[test]
    fn non_data_lines_skipped() {
        let mut buf = SseLineBuffer::new();
        let out = buf.push(": keep-alive\nevent: ping\n\n");
        assert!(out.is_empty());
    }
}
