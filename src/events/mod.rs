//! Event taxonomy delivered to the host call-control layer.
//!
//! ## Channel identifiers
//!
//! Each event kind has two channel variants: the default channel and an
//! "api" channel (suffixed `api`) used when the session was started through
//! the host's API surface rather than the dialplan.
//!
//! | Kind | Channel |
//! |------|---------|
//! | `Transcription` | `callstream::transcription` |
//! | `EndOfUtterance` | `callstream::end_of_utterance` |
//! | `StartOfTranscript` | `callstream::start_of_transcript` |
//! | `EndOfTranscript` | `callstream::end_of_transcript` |
//! | `NoAudioDetected` | `callstream::no_audio_detected` |
//! | `MaxDurationExceeded` | `callstream::max_duration_exceeded` |
//! | `PlayInterrupt` | `callstream::play_interrupt` |
//! | `BackendError` | `callstream::error` |
//!
//! The enum→string mapping lives only here, at the serialization boundary;
//! the rest of the crate passes `EventKind` values around.

pub mod dispatch;

use serde::{Deserialize, Serialize};

/// Closed enumeration of everything the host can be told about a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A recognition hypothesis (partial or final).
    Transcription,
    /// The backend marked a pause boundary in speech.
    EndOfUtterance,
    /// Recognition activity started on the stream.
    StartOfTranscript,
    /// The transcript for this stream is complete.
    EndOfTranscript,
    /// The backend saw no audio within its detection window.
    NoAudioDetected,
    /// The stream hit the backend's maximum duration.
    MaxDurationExceeded,
    /// Caller speech interrupted an active file playback.
    PlayInterrupt,
    /// A non-fatal backend or transport failure.
    BackendError,
}

impl EventKind {
    /// The channel identifier the host listens on for this kind.
    pub fn channel(self, api: bool) -> &'static str {
        match (self, api) {
            (EventKind::Transcription, false) => "callstream::transcription",
            (EventKind::Transcription, true) => "callstream::transcriptionapi",
            (EventKind::EndOfUtterance, false) => "callstream::end_of_utterance",
            (EventKind::EndOfUtterance, true) => "callstream::end_of_utteranceapi",
            (EventKind::StartOfTranscript, false) => "callstream::start_of_transcript",
            (EventKind::StartOfTranscript, true) => "callstream::start_of_transcriptapi",
            (EventKind::EndOfTranscript, false) => "callstream::end_of_transcript",
            (EventKind::EndOfTranscript, true) => "callstream::end_of_transcriptapi",
            (EventKind::NoAudioDetected, false) => "callstream::no_audio_detected",
            (EventKind::NoAudioDetected, true) => "callstream::no_audio_detectedapi",
            (EventKind::MaxDurationExceeded, false) => "callstream::max_duration_exceeded",
            (EventKind::MaxDurationExceeded, true) => "callstream::max_duration_exceededapi",
            (EventKind::PlayInterrupt, false) => "callstream::play_interrupt",
            (EventKind::PlayInterrupt, true) => "callstream::play_interruptapi",
            (EventKind::BackendError, false) => "callstream::error",
            (EventKind::BackendError, true) => "callstream::errorapi",
        }
    }
}

// ---------------------------------------------------------------------------
// Payload bodies
// ---------------------------------------------------------------------------

/// Body of a `Transcription` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionPayload {
    /// Recognised text.
    pub transcript: String,
    /// Whether this hypothesis is committed or may still change.
    pub is_final: bool,
    /// Backend confidence in [0.0, 1.0], if available.
    pub confidence: Option<f32>,
}

/// Body of the marker events (utterance/transcript boundaries, timeouts).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerPayload {
    /// Optional human-readable detail.
    pub detail: Option<String>,
}

/// Body of a `BackendError` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}
