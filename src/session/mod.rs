//! `StreamingSession` — per-call-leg lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! StreamingSession::new()
//!     └─► initialize(rate)   → resampler built, transport open, worker spawned
//!         └─► push_audio()   → resample → ring → worker forwards to backend
//!             └─► close()    → running=false, worker joined, transport closed
//! ```
//!
//! `initialize()` and `close()` are idempotent. The session record is either
//! fully uninitialized or fully initialized — the resampler, the ring, and
//! the open transport are created together and torn down together; a failed
//! `initialize` leaves nothing allocated.
//!
//! ## Threading
//!
//! `push_audio` runs on the call's media thread at a fixed cadence. One
//! dedicated worker thread per session drains the ring and receives backend
//! events. The session lock serialises `push_audio` against `close`;
//! everything the worker touches is handed over at spawn time, so the worker
//! never takes the session lock and `close` can join it safely.

pub mod worker;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    audio::{self, resample::SampleRateConverter},
    buffering::{create_session_ring, AudioProducer, Producer},
    error::{CallstreamError, Result},
    events::dispatch::{EventDispatcher, ResponseHandler},
    transport::{TransportConfig, TransportHandle},
};

pub use worker::{DiagnosticsSnapshot, SessionDiagnostics};

/// Longest accepted session id, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 255;

pub(crate) fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(CallstreamError::InvalidArgument(
            "session id must not be empty".into(),
        ));
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(CallstreamError::InvalidArgument(format!(
            "session id exceeds {MAX_SESSION_ID_LEN} bytes"
        )));
    }
    Ok(())
}

/// Configuration for `StreamingSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sample rate forwarded to the backend (Hz). Default: 16000.
    pub target_sample_rate: u32,
    /// Maximum samples buffered between the media thread and the worker.
    /// On overflow the newest samples are dropped — the media thread is
    /// never blocked. Default: 524288 (≈ 32 s at 16 kHz).
    pub max_buffered_samples: usize,
    /// Samples per transport send. Default: 320 (20 ms at 16 kHz).
    pub send_chunk_samples: usize,
    /// Upper bound on the close-time flush of buffered audio.
    /// Default: 500 ms.
    pub close_grace: Duration,
    /// Bounded wait on the backend event channel per worker iteration.
    /// Default: 5 ms.
    pub event_poll: Duration,
    /// Report on the `api` channel variants. Default: false.
    pub api_events: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            max_buffered_samples: 1 << 19,
            send_chunk_samples: 320,
            close_grace: Duration::from_millis(500),
            event_poll: Duration::from_millis(5),
            api_events: false,
        }
    }
}

/// Everything that exists only while the session is initialized.
struct ActiveState {
    resampler: SampleRateConverter,
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

/// Per-call-leg streaming session.
///
/// `StreamingSession` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<StreamingSession>` to share between the host's media thread
/// and its call-control side.
pub struct StreamingSession {
    session_id: String,
    config: SessionConfig,
    transport: TransportHandle,
    handler: ResponseHandler,
    state: Mutex<Option<ActiveState>>,
    end_of_utterance: Arc<AtomicBool>,
    play_file: Arc<AtomicBool>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl StreamingSession {
    /// Allocate the session record. No I/O — call `initialize()` before
    /// pushing audio.
    ///
    /// # Errors
    /// Returns `CallstreamError::InvalidArgument` for an empty or oversized
    /// session id.
    pub fn new(
        session_id: impl Into<String>,
        transport: TransportHandle,
        handler: ResponseHandler,
        config: SessionConfig,
    ) -> Result<Self> {
        let session_id = session_id.into();
        validate_session_id(&session_id)?;
        debug!(session_id = %session_id, "session created");

        Ok(Self {
            session_id,
            config,
            transport,
            handler,
            state: Mutex::new(None),
            end_of_utterance: Arc::new(AtomicBool::new(false)),
            play_file: Arc::new(AtomicBool::new(false)),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        })
    }

    /// Build the resampler, open the transport, and spawn the worker.
    ///
    /// Idempotent: an already-initialized session logs a no-op and returns
    /// Ok. On failure the session is left uninitialized with nothing
    /// allocated.
    ///
    /// # Errors
    /// - `CallstreamError::ResamplerInit` for an invalid rate pair.
    /// - `CallstreamError::TransportOpen` when the backend connection cannot
    ///   be established.
    pub fn initialize(&self, input_sample_rate: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            info!(
                session_id = %self.session_id,
                "initialize called on an initialized session — no-op"
            );
            return Ok(());
        }

        let resampler =
            SampleRateConverter::new(input_sample_rate, self.config.target_sample_rate)?;

        let events = self.transport.0.lock().open(&TransportConfig {
            session_id: self.session_id.clone(),
            sample_rate: self.config.target_sample_rate,
            channels: 1,
        })?;

        let (producer, consumer) = create_session_ring(self.config.max_buffered_samples);
        let running = Arc::new(AtomicBool::new(true));

        let ctx = worker::WorkerContext {
            consumer,
            transport: self.transport.clone(),
            events,
            running: Arc::clone(&running),
            dispatcher: EventDispatcher::new(
                self.session_id.clone(),
                Arc::clone(&self.handler),
                self.config.api_events,
            ),
            end_of_utterance: Arc::clone(&self.end_of_utterance),
            play_file: Arc::clone(&self.play_file),
            diagnostics: Arc::clone(&self.diagnostics),
            send_chunk_samples: self.config.send_chunk_samples,
            close_grace: self.config.close_grace,
            event_poll: self.config.event_poll,
        };

        let worker = match thread::Builder::new()
            .name(format!("callstream-{}", self.session_id))
            .spawn(move || worker::run(ctx))
        {
            Ok(handle) => handle,
            Err(e) => {
                // Keep the all-or-nothing invariant: release the transport
                // we just opened before reporting failure.
                self.transport.0.lock().close();
                return Err(CallstreamError::Other(anyhow::anyhow!(
                    "failed to spawn session worker: {e}"
                )));
            }
        };

        *state = Some(ActiveState {
            resampler,
            producer,
            running,
            worker: Some(worker),
        });

        info!(
            session_id = %self.session_id,
            input_sample_rate,
            target_sample_rate = self.config.target_sample_rate,
            "session initialized"
        );
        Ok(())
    }

    /// Accept one raw PCM frame from the media thread.
    ///
    /// Resamples the frame and queues it for the worker. Never blocks on
    /// network I/O — backpressure is absorbed by the ring, and on overflow
    /// the newest samples are dropped (counted and logged). While the
    /// end-of-utterance flag is set the frame is held instead of forwarded.
    ///
    /// A trailing odd byte is truncated to the sample boundary, never
    /// reported as an error.
    ///
    /// # Errors
    /// Returns `CallstreamError::NotInitialized` before `initialize` or
    /// after `close`.
    pub fn push_audio(&self, frame: &[u8]) -> Result<()> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CallstreamError::NotInitialized)?;

        self.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);

        if self.end_of_utterance.load(Ordering::Relaxed) {
            self.diagnostics.frames_held.fetch_add(1, Ordering::Relaxed);
            debug!(session_id = %self.session_id, "end-of-utterance set — frame held");
            return Ok(());
        }

        let samples = audio::bytes_to_samples(frame);
        let resampled = state.resampler.process(&samples);
        self.diagnostics
            .samples_resampled
            .fetch_add(resampled.len(), Ordering::Relaxed);
        if resampled.is_empty() {
            return Ok(());
        }

        let written = state.producer.push_slice(&resampled);
        if written < resampled.len() {
            let dropped = resampled.len() - written;
            self.diagnostics
                .samples_dropped
                .fetch_add(dropped, Ordering::Relaxed);
            warn!(
                session_id = %self.session_id,
                dropped,
                "audio buffer full — dropped newest samples"
            );
        }
        Ok(())
    }

    /// Gate further audio: held frames are not forwarded until cleared.
    pub fn mark_end_of_utterance(&self) {
        self.end_of_utterance.store(true, Ordering::SeqCst);
    }

    pub fn clear_end_of_utterance(&self) {
        self.end_of_utterance.store(false, Ordering::SeqCst);
    }

    pub fn end_of_utterance(&self) -> bool {
        self.end_of_utterance.load(Ordering::Relaxed)
    }

    /// Whether a local file playback is active alongside the live stream.
    /// While set, caller speech triggers a play-interrupt event.
    pub fn set_play_file(&self, active: bool) {
        self.play_file.store(active, Ordering::SeqCst);
    }

    pub fn play_file(&self) -> bool {
        self.play_file.load(Ordering::Relaxed)
    }

    /// Stop the worker, flush pending audio (bounded by the close grace),
    /// close the transport, and release the buffer and resampler.
    ///
    /// Idempotent, never fails; a close on an uninitialized session is a
    /// no-op. Blocks until an in-flight `push_audio` has released the
    /// session lock and the worker has exited — the response handler is
    /// never invoked after `close` returns.
    pub fn close(&self) {
        let taken = self.state.lock().take();
        let Some(mut state) = taken else {
            debug!(
                session_id = %self.session_id,
                "close called on an uninitialized session — no-op"
            );
            return;
        };

        // Hand the resampler residue to the worker before stopping it, so
        // sub-chunk audio is part of the close-time flush.
        let tail = state.resampler.flush();
        if !tail.is_empty() {
            let written = state.producer.push_slice(&tail);
            if written < tail.len() {
                warn!(
                    session_id = %self.session_id,
                    dropped = tail.len() - written,
                    "buffer full during close — residue dropped"
                );
            }
        }

        state.running.store(false, Ordering::SeqCst);
        if let Some(worker) = state.worker.take() {
            if worker.join().is_err() {
                tracing::error!(session_id = %self.session_id, "session worker panicked");
            }
        }

        self.transport.0.lock().close();
        self.end_of_utterance.store(false, Ordering::SeqCst);
        self.play_file.store(false, Ordering::SeqCst);

        let snap = self.diagnostics.snapshot();
        info!(
            session_id = %self.session_id,
            frames_in = snap.frames_in,
            frames_sent = snap.frames_sent,
            samples_dropped = snap.samples_dropped,
            send_errors = snap.send_errors,
            events_delivered = snap.events_delivered,
            "session closed"
        );
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Snapshot of session counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam_channel::{unbounded, Receiver, Sender};
    use parking_lot::Mutex;

    use crate::transport::{BackendEvent, BackendTransport};

    type SentFrames = Arc<Mutex<Vec<Vec<u8>>>>;

    struct FakeTransport {
        sends: SentFrames,
        opens: Arc<Mutex<usize>>,
        closed: Arc<AtomicBool>,
        fail_open: bool,
        events_tx: Arc<Mutex<Option<Sender<BackendEvent>>>>,
    }

    impl FakeTransport {
        fn new() -> (
            Self,
            SentFrames,
            Arc<Mutex<usize>>,
            Arc<AtomicBool>,
            Arc<Mutex<Option<Sender<BackendEvent>>>>,
        ) {
            let sends: SentFrames = Arc::new(Mutex::new(Vec::new()));
            let opens = Arc::new(Mutex::new(0));
            let closed = Arc::new(AtomicBool::new(false));
            let events_tx = Arc::new(Mutex::new(None));
            (
                Self {
                    sends: Arc::clone(&sends),
                    opens: Arc::clone(&opens),
                    closed: Arc::clone(&closed),
                    fail_open: false,
                    events_tx: Arc::clone(&events_tx),
                },
                sends,
                opens,
                closed,
                events_tx,
            )
        }
    }

    impl BackendTransport for FakeTransport {
        fn open(&mut self, _config: &TransportConfig) -> Result<Receiver<BackendEvent>> {
            if self.fail_open {
                return Err(CallstreamError::TransportOpen("scripted refusal".into()));
            }
            *self.opens.lock() += 1;
            let (tx, rx) = unbounded();
            *self.events_tx.lock() = Some(tx);
            Ok(rx)
        }

        fn send(&mut self, frame: &[u8]) -> Result<()> {
            self.sends.lock().push(frame.to_vec());
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
            *self.events_tx.lock() = None;
        }
    }

    fn noop_handler() -> ResponseHandler {
        Arc::new(|_, _, _| {})
    }

    fn frame_8k_20ms() -> Vec<u8> {
        let samples: Vec<i16> = (0..160).map(|i| ((i * 50) % 3000) as i16).collect();
        audio::samples_to_bytes(&samples)
    }

    #[test]
    fn empty_and_oversized_session_ids_are_rejected() {
        let (transport, ..) = FakeTransport::new();
        let result = StreamingSession::new(
            "",
            TransportHandle::new(transport),
            noop_handler(),
            SessionConfig::default(),
        );
        assert!(matches!(result, Err(CallstreamError::InvalidArgument(_))));

        let (transport, ..) = FakeTransport::new();
        let result = StreamingSession::new(
            "x".repeat(MAX_SESSION_ID_LEN + 1),
            TransportHandle::new(transport),
            noop_handler(),
            SessionConfig::default(),
        );
        assert!(matches!(result, Err(CallstreamError::InvalidArgument(_))));
    }

    #[test]
    fn push_before_initialize_fails() {
        let (transport, ..) = FakeTransport::new();
        let session = StreamingSession::new(
            "push-uninit",
            TransportHandle::new(transport),
            noop_handler(),
            SessionConfig::default(),
        )
        .unwrap();

        assert!(matches!(
            session.push_audio(&frame_8k_20ms()),
            Err(CallstreamError::NotInitialized)
        ));
    }

    #[test]
    fn initialize_is_idempotent_and_opens_the_transport_once() {
        let (transport, _sends, opens, ..) = FakeTransport::new();
        let session = StreamingSession::new(
            "init-idempotent",
            TransportHandle::new(transport),
            noop_handler(),
            SessionConfig::default(),
        )
        .unwrap();

        session.initialize(8_000).unwrap();
        session.initialize(8_000).unwrap();

        assert!(session.is_initialized());
        assert_eq!(*opens.lock(), 1, "no duplicate transport allocation");
        session.close();
    }

    #[test]
    fn invalid_rate_leaves_the_session_uninitialized() {
        let (transport, _sends, opens, ..) = FakeTransport::new();
        let session = StreamingSession::new(
            "init-bad-rate",
            TransportHandle::new(transport),
            noop_handler(),
            SessionConfig::default(),
        )
        .unwrap();

        assert!(matches!(
            session.initialize(0),
            Err(CallstreamError::ResamplerInit(_))
        ));
        assert!(!session.is_initialized());
        assert_eq!(*opens.lock(), 0, "transport must not be opened");
    }

    #[test]
    fn transport_open_failure_leaves_the_session_uninitialized() {
        let (mut transport, ..) = FakeTransport::new();
        transport.fail_open = true;
        let session = StreamingSession::new(
            "init-open-fail",
            TransportHandle::new(transport),
            noop_handler(),
            SessionConfig::default(),
        )
        .unwrap();

        assert!(matches!(
            session.initialize(8_000),
            Err(CallstreamError::TransportOpen(_))
        ));
        assert!(!session.is_initialized());
        assert!(matches!(
            session.push_audio(&frame_8k_20ms()),
            Err(CallstreamError::NotInitialized)
        ));
    }

    #[test]
    fn close_flushes_buffered_audio_and_releases_the_transport() {
        let (transport, sends, _opens, closed, ..) = FakeTransport::new();
        let session = StreamingSession::new(
            "close-flush",
            TransportHandle::new(transport),
            noop_handler(),
            SessionConfig::default(),
        )
        .unwrap();

        session.initialize(8_000).unwrap();
        // Five 20 ms frames at 8 kHz → ~1600 samples at 16 kHz.
        for _ in 0..5 {
            session.push_audio(&frame_8k_20ms()).unwrap();
        }
        session.close();

        assert!(closed.load(Ordering::SeqCst), "transport released");
        let total: usize = sends.lock().iter().map(Vec::len).sum();
        let expected = 5 * 320 * 2;
        assert!(
            (total as isize - expected as isize).unsigned_abs() <= 16,
            "sent {total} bytes, expected ≈{expected}"
        );

        // Audio after close is a caller error, and close stays idempotent.
        assert!(matches!(
            session.push_audio(&frame_8k_20ms()),
            Err(CallstreamError::NotInitialized)
        ));
        session.close();
    }

    #[test]
    fn held_frames_are_not_forwarded_until_cleared() {
        let (transport, sends, ..) = FakeTransport::new();
        let session = StreamingSession::new(
            "eou-hold",
            TransportHandle::new(transport),
            noop_handler(),
            SessionConfig::default(),
        )
        .unwrap();

        session.initialize(8_000).unwrap();
        session.mark_end_of_utterance();
        assert!(session.end_of_utterance());

        session.push_audio(&frame_8k_20ms()).unwrap();
        session.push_audio(&frame_8k_20ms()).unwrap();

        session.clear_end_of_utterance();
        session.push_audio(&frame_8k_20ms()).unwrap();
        session.close();

        let snap = session.diagnostics_snapshot();
        assert_eq!(snap.frames_held, 2);
        let total: usize = sends.lock().iter().map(Vec::len).sum();
        let expected = 320 * 2; // only the frame pushed after clearing
        assert!(
            (total as isize - expected as isize).unsigned_abs() <= 16,
            "sent {total} bytes, expected ≈{expected}"
        );
    }

    #[test]
    fn overflow_drops_newest_samples_and_the_session_keeps_working() {
        let (transport, ..) = FakeTransport::new();
        let mut config = SessionConfig::default();
        // Room for a single resampled frame only.
        config.max_buffered_samples = 320;
        let session = StreamingSession::new(
            "overflow-drop",
            TransportHandle::new(transport),
            noop_handler(),
            config,
        )
        .unwrap();

        session.initialize(8_000).unwrap();
        // Stop the worker from draining so the ring actually fills: hold
        // the pushes close together and check the drop counter afterwards.
        for _ in 0..50 {
            session.push_audio(&frame_8k_20ms()).unwrap();
        }

        let snap = session.diagnostics_snapshot();
        assert!(
            snap.samples_dropped > 0,
            "sustained pushes beyond capacity must drop"
        );
        assert_eq!(snap.frames_in, 50);
        session.close();
    }
}
