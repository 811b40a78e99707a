// Server-sent events decoding for the remote store's streaming endpoint.
//
// The store streams `event:` / `data:` frames separated by blank lines.
// `put` and `patch` carry `{"path": ..., "data": ...}` payloads; the rest
// are control frames. Chunk boundaries from the HTTP body are arbitrary,
// so the decoder buffers raw bytes until a full line is available.

use serde::Deserialize;

use crate::error::Error;
use crate::remote::{EventKind, RemoteEvent};

// ── Frames ───────────────────────────────────────────────────────────

/// A single decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental line-oriented SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of body bytes, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_owned()),
                "data" => self.data.push(value.to_owned()),
                _ => {}
            }
        }
        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".into()),
            data,
        })
    }
}

// ── Frame interpretation ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Payload {
    path: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Interpret a frame from the store's stream.
///
/// Returns `None` for frames that carry nothing for the subscriber
/// (keep-alives, unknown event names). Terminal control frames become
/// [`Error::StreamClosed`].
pub fn interpret(frame: &SseFrame) -> Option<Result<RemoteEvent, Error>> {
    let kind = match frame.event.as_str() {
        "put" => EventKind::Put,
        "patch" => EventKind::Patch,
        "keep-alive" => return None,
        "cancel" => {
            return Some(Err(Error::StreamClosed {
                reason: "cancelled by server rules".into(),
            }));
        }
        "auth_revoked" => {
            return Some(Err(Error::PermissionDenied {
                message: "credential expired or revoked".into(),
            }));
        }
        other => {
            tracing::debug!(event = other, "Ignoring unknown stream event");
            return None;
        }
    };

    match serde_json::from_str::<Payload>(&frame.data) {
        Ok(payload) => Some(Ok(RemoteEvent {
            kind,
            path: payload.path,
            data: payload.data,
        })),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse stream payload");
            Some(Err(Error::Deserialization {
                message: e.to_string(),
                body: frame.data.clone(),
            }))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: put\r\nda").is_empty());
        let frames = decoder.push(b"ta: {\"path\":\"/\",\"data\":{\"a\":1}}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "put");

        let event = interpret(&frames[0]).unwrap().unwrap();
        assert_eq!(event.kind, EventKind::Put);
        assert_eq!(event.path, "/");
        assert_eq!(event.data, json!({"a": 1}));
    }

    #[test]
    fn keep_alive_is_skipped() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"event: keep-alive\ndata: null\n\n");
        assert_eq!(frames.len(), 1);
        assert!(interpret(&frames[0]).is_none());
    }

    #[test]
    fn comments_are_ignored() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": ping\n\nevent: patch\ndata: {\"path\":\"/groups\",\"data\":{}}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(interpret(&frames[0]).unwrap().unwrap().kind, EventKind::Patch);
    }

    #[test]
    fn control_frames_end_the_stream() {
        let cancel = SseFrame {
            event: "cancel".into(),
            data: "null".into(),
        };
        assert!(matches!(
            interpret(&cancel),
            Some(Err(Error::StreamClosed { .. }))
        ));

        let revoked = SseFrame {
            event: "auth_revoked".into(),
            data: "credential is no longer valid".into(),
        };
        assert!(matches!(
            interpret(&revoked),
            Some(Err(Error::PermissionDenied { .. }))
        ));
    }

    #[test]
    fn garbage_payload_reports_body() {
        let frame = SseFrame {
            event: "put".into(),
            data: "not json".into(),
        };
        match interpret(&frame) {
            Some(Err(Error::Deserialization { body, .. })) => assert_eq!(body, "not json"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
