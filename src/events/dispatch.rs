//! Converts backend and session occurrences into host-visible events.
//!
//! The dispatcher serialises a payload envelope and invokes the host's
//! response handler exactly once per occurrence — no retry, no coalescing.
//! A failed or ignored handler invocation is the host's responsibility.
//! All dispatching for a session happens on its worker thread, which is
//! what guarantees backend-emission order.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error};

use crate::events::{ErrorPayload, EventKind, MarkerPayload, TranscriptionPayload};
use crate::transport::BackendEvent;

/// Host-supplied callback: `(session_id, event_channel, json_payload)`.
///
/// Invoked zero or more times per session, never after `close()` completes.
pub type ResponseHandler = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Envelope wrapped around every payload body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventEnvelope<'a, T> {
    /// Monotonically increasing per-session event sequence number.
    seq: u64,
    session_id: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

/// Per-session event dispatcher.
pub struct EventDispatcher {
    session_id: String,
    handler: ResponseHandler,
    /// Whether this session reports on the api channel variants.
    api_channel: bool,
    seq: u64,
}

impl EventDispatcher {
    pub fn new(session_id: impl Into<String>, handler: ResponseHandler, api_channel: bool) -> Self {
        Self {
            session_id: session_id.into(),
            handler,
            api_channel,
            seq: 0,
        }
    }

    /// Serialize `body` and deliver it on `kind`'s channel, exactly once.
    pub fn dispatch<T: Serialize>(&mut self, kind: EventKind, body: &T) {
        let seq = self.seq;
        self.seq += 1;

        let envelope = EventEnvelope {
            seq,
            session_id: &self.session_id,
            body,
        };

        match serde_json::to_string(&envelope) {
            Ok(json) => {
                let channel = kind.channel(self.api_channel);
                (self.handler)(&self.session_id, channel, &json);
                debug!(
                    session_id = %self.session_id,
                    seq,
                    channel,
                    "event dispatched"
                );
            }
            Err(e) => {
                error!(
                    session_id = %self.session_id,
                    seq,
                    error = %e,
                    "failed to serialize event payload"
                );
            }
        }
    }

    /// Map a parsed backend occurrence onto the event taxonomy and deliver it.
    pub fn dispatch_backend(&mut self, event: &BackendEvent) {
        match event {
            BackendEvent::Transcript {
                text,
                is_final,
                confidence,
            } => self.dispatch(
                EventKind::Transcription,
                &TranscriptionPayload {
                    transcript: text.clone(),
                    is_final: *is_final,
                    confidence: *confidence,
                },
            ),
            BackendEvent::UtteranceEnd => {
                self.dispatch(EventKind::EndOfUtterance, &MarkerPayload::default())
            }
            BackendEvent::TranscriptBegin => {
                self.dispatch(EventKind::StartOfTranscript, &MarkerPayload::default())
            }
            BackendEvent::TranscriptEnd => {
                self.dispatch(EventKind::EndOfTranscript, &MarkerPayload::default())
            }
            BackendEvent::NoAudioDetected => {
                self.dispatch(EventKind::NoAudioDetected, &MarkerPayload::default())
            }
            BackendEvent::MaxDurationExceeded => {
                self.dispatch(EventKind::MaxDurationExceeded, &MarkerPayload::default())
            }
            BackendEvent::Error { message } => self.dispatch(
                EventKind::BackendError,
                &ErrorPayload {
                    message: message.clone(),
                },
            ),
            BackendEvent::Closed => self.dispatch(
                EventKind::EndOfTranscript,
                &MarkerPayload {
                    detail: Some("connection closed".into()),
                },
            ),
        }
    }

    /// Number of events delivered so far.
    pub fn delivered(&self) -> u64 {
        self.seq
    }
}
