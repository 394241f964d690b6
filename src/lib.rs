//! # callstream
//!
//! Per-call real-time audio capture and transcription relay core.
//!
//! ## Architecture
//!
//! ```text
//! Media thread → push_audio → SampleRateConverter → SPSC RingBuffer
//!                                                        │
//!                                              session worker thread
//!                                                        │
//!                                            BackendTransport::send
//!                                                        │
//!                          backend events → EventDispatcher → ResponseHandler
//! ```
//!
//! The media thread never blocks on network I/O: frames are resampled,
//! queued on a wait-free ring, and forwarded by a dedicated worker per
//! session. Backend responses come back on the worker and are delivered to
//! the host as ordered, typed events. `AudioSpoolFile` independently
//! persists raw call audio to a temporary file for other subsystems.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod error;
pub mod events;
pub mod session;
pub mod spool;
pub mod transport;

// Convenience re-exports for downstream crates
pub use error::CallstreamError;
pub use events::dispatch::{EventDispatcher, ResponseHandler};
pub use events::EventKind;
pub use session::{DiagnosticsSnapshot, SessionConfig, StreamingSession, MAX_SESSION_ID_LEN};
pub use spool::AudioSpoolFile;
pub use transport::loopback::LoopbackTransport;
pub use transport::{BackendEvent, BackendTransport, TransportConfig, TransportHandle};
