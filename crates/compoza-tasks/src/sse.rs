//! Server-sent-events line decoder
//!
//! Operation endpoints stream `data: {json}` lines. Chunks from the network
//! can split a line (or a UTF-8 sequence) anywhere, so the decoder keeps the
//! unfinished tail between calls. Lines that are not valid events are
//! dropped without ending the stream.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// One event in an operation's progress stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A line of command output
    Output { data: String },
    /// Completion percentage, 0-100
    Progress { percent: u8 },
    /// Success, with an optional result payload
    Done {
        #[serde(default)]
        result: Option<serde_json::Value>,
    },
    /// Failure reported by the server
    Error { message: String },
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final line that had no trailing newline
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> Option<StreamEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);
    let payload = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))?;

    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            trace!("Skipping undecodable event line: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassembles_lines_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"out").is_empty());
        let events = decoder.push(b"put\",\"data\":\"Pulling web\"}\n\ndata: {\"type\":\"progress\",\"percent\":40}\n");
        assert_eq!(
            events,
            vec![
                StreamEvent::Output {
                    data: "Pulling web".to_string()
                },
                StreamEvent::Progress { percent: 40 },
            ]
        );
    }

    #[test]
    fn test_split_utf8_sequence() {
        let line = "data: {\"type\":\"output\",\"data\":\"caf\u{e9}\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xc3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        assert_eq!(
            decoder.push(&line[split..]),
            vec![StreamEvent::Output {
                data: "caf\u{e9}".to_string()
            }]
        );
    }

    #[test]
    fn test_bad_lines_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b": keep-alive\nevent: message\ndata: not json\ndata: {\"type\":\"unknown\"}\r\ndata: {\"type\":\"done\"}\r\n",
        );
        assert_eq!(events, vec![StreamEvent::Done { result: None }]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder
            .push(b"data: {\"type\":\"error\",\"message\":\"pull failed\"}")
            .is_empty());
        assert_eq!(
            decoder.finish(),
            Some(StreamEvent::Error {
                message: "pull failed".to_string()
            })
        );
        assert_eq!(decoder.finish(), None);
    }
}
