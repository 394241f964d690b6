//! Backend transport abstraction.
//!
//! The `BackendTransport` trait decouples the session from any concrete
//! speech-service client (gRPC streamer, WebSocket relay, loopback stub).
//! The wire protocol itself is out of scope — the session only needs
//! open/send/close plus a channel on which parsed backend occurrences
//! arrive.
//!
//! `&mut self` on `send` intentionally expresses that transports are
//! stateful — connection handles, reconnect counters, framing state. All
//! mutation is serialised through `TransportHandle`'s `parking_lot::Mutex`.

pub mod loopback;

use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::error::Result;

/// Connection parameters handed to the transport at session initialize.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Host-assigned id of the call leg this stream belongs to.
    pub session_id: String,
    /// Sample rate of the audio that will be sent (Hz).
    pub sample_rate: u32,
    /// Channel count of the audio that will be sent.
    pub channels: u16,
}

/// A parsed occurrence delivered by the backend.
///
/// Produced by the transport's receive path and consumed by the session
/// worker in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// A recognition hypothesis, partial or final.
    Transcript {
        text: String,
        is_final: bool,
        confidence: Option<f32>,
    },
    /// The backend detected a pause boundary in speech.
    UtteranceEnd,
    /// First recognition activity on the stream.
    TranscriptBegin,
    /// The backend finished the transcript for this stream.
    TranscriptEnd,
    /// No audio was detected within the backend's window.
    NoAudioDetected,
    /// The stream exceeded the backend's maximum duration.
    MaxDurationExceeded,
    /// A backend-side failure that does not terminate the session.
    Error { message: String },
    /// The backend closed the connection.
    Closed,
}

impl BackendEvent {
    /// Whether this event signals that the caller is speaking — used to
    /// interrupt an active file playback (barge-in).
    pub fn indicates_speech(&self) -> bool {
        matches!(
            self,
            BackendEvent::Transcript { .. } | BackendEvent::TranscriptBegin
        )
    }
}

/// Contract for backend transport implementations.
pub trait BackendTransport: Send + 'static {
    /// Establish the connection to the backend.
    ///
    /// Returns the receiver on which parsed backend events will arrive, in
    /// emission order. Dropping the sender side signals a closed connection.
    ///
    /// # Errors
    /// Returns `CallstreamError::TransportOpen` when the connection cannot
    /// be established.
    fn open(&mut self, config: &TransportConfig) -> Result<Receiver<BackendEvent>>;

    /// Forward one chunk of audio bytes to the backend.
    ///
    /// Called from the session worker only. Failures are non-fatal to the
    /// session — the worker reports them as events and keeps going.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Release the connection. Must be safe to call more than once.
    fn close(&mut self);
}

/// Thread-safe reference-counted handle to any `BackendTransport` implementor.
///
/// Uses `parking_lot::Mutex` for non-poisoning behaviour on panic; the
/// session and its worker share the handle across the lifecycle.
#[derive(Clone)]
pub struct TransportHandle(pub Arc<Mutex<dyn BackendTransport>>);

impl TransportHandle {
    /// Wrap any `BackendTransport` in a `TransportHandle`.
    pub fn new<T: BackendTransport>(transport: T) -> Self {
        Self(Arc::new(Mutex::new(transport)))
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle").finish_non_exhaustive()
    }
}
