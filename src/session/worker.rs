//! Per-session worker loop.
//!
//! ## Loop stages (per iteration)
//!
//! ```text
//! 1. Check the running flag
//! 2. Drain one send-sized chunk from the ring → transport.send
//! 3. Wait (bounded) on the backend event channel → dispatch
//! ```
//!
//! The bounded wait on the event channel is the session's only sanctioned
//! blocking point. On shutdown the worker performs a best-effort final
//! drain of buffered audio, bounded by the close grace period, then
//! delivers any backend events already queued so none are dropped.
//!
//! Transport send failures are non-fatal: the session stays open, the
//! failure is logged and counted, and one backend-error event is delivered
//! per failure streak. A forced close is always the host's decision.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, error, info, warn};

use crate::{
    audio,
    buffering::{AudioConsumer, Consumer},
    events::{dispatch::EventDispatcher, ErrorPayload, EventKind, MarkerPayload},
    transport::{BackendEvent, TransportHandle},
};

pub struct SessionDiagnostics {
    pub frames_in: AtomicUsize,
    pub samples_resampled: AtomicUsize,
    pub frames_held: AtomicUsize,
    pub samples_dropped: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub send_errors: AtomicUsize,
    pub events_delivered: AtomicUsize,
}

impl Default for SessionDiagnostics {
    fn default() -> Self {
        Self {
            frames_in: AtomicUsize::new(0),
            samples_resampled: AtomicUsize::new(0),
            frames_held: AtomicUsize::new(0),
            samples_dropped: AtomicUsize::new(0),
            frames_sent: AtomicUsize::new(0),
            send_errors: AtomicUsize::new(0),
            events_delivered: AtomicUsize::new(0),
        }
    }
}

impl SessionDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            samples_resampled: self.samples_resampled.load(Ordering::Relaxed),
            frames_held: self.frames_held.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub samples_resampled: usize,
    pub frames_held: usize,
    pub samples_dropped: usize,
    pub frames_sent: usize,
    pub send_errors: usize,
    pub events_delivered: usize,
}

/// All context the worker needs, passed as one struct so the spawn stays tidy.
pub struct WorkerContext {
    pub consumer: AudioConsumer,
    pub transport: TransportHandle,
    pub events: Receiver<BackendEvent>,
    pub running: Arc<AtomicBool>,
    pub dispatcher: EventDispatcher,
    pub end_of_utterance: Arc<AtomicBool>,
    pub play_file: Arc<AtomicBool>,
    pub diagnostics: Arc<SessionDiagnostics>,
    /// Samples drained from the ring per send.
    pub send_chunk_samples: usize,
    /// Upper bound on the shutdown audio drain.
    pub close_grace: Duration,
    /// Bounded wait on the event channel per iteration.
    pub event_poll: Duration,
}

/// Run the worker until `ctx.running` becomes false.
pub fn run(mut ctx: WorkerContext) {
    debug!("session worker started");

    let mut frame = vec![0i16; ctx.send_chunk_samples.max(1)];
    // Whether the last send failed; collapses a failure streak into one event.
    let mut send_failing = false;
    // Cleared when the backend signals close or drops the channel.
    let mut events_open = true;

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let n = ctx.consumer.pop_slice(&mut frame);
        if n > 0 {
            send_frame(&mut ctx, &frame[..n], &mut send_failing);
        }

        if events_open {
            match ctx.events.recv_timeout(ctx.event_poll) {
                Ok(event) => handle_event(&mut ctx, event, &mut events_open),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("backend event channel disconnected");
                    events_open = false;
                }
            }
        } else if n == 0 {
            // Nothing to forward and no event source left — yield.
            std::thread::sleep(ctx.event_poll);
        }
    }

    // Best-effort final drain of buffered audio, bounded by the grace period.
    let deadline = Instant::now() + ctx.close_grace;
    loop {
        let n = ctx.consumer.pop_slice(&mut frame);
        if n == 0 {
            break;
        }
        send_frame(&mut ctx, &frame[..n], &mut send_failing);
        if Instant::now() >= deadline {
            warn!("close grace expired with audio still buffered");
            break;
        }
    }

    // Deliver backend events already queued, in emission order.
    while events_open {
        match ctx.events.try_recv() {
            Ok(event) => handle_event(&mut ctx, event, &mut events_open),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        frames_in = snap.frames_in,
        samples_resampled = snap.samples_resampled,
        frames_held = snap.frames_held,
        samples_dropped = snap.samples_dropped,
        frames_sent = snap.frames_sent,
        send_errors = snap.send_errors,
        events_delivered = snap.events_delivered,
        "session worker stopped — diagnostics"
    );
}

fn send_frame(ctx: &mut WorkerContext, samples: &[i16], send_failing: &mut bool) {
    let bytes = audio::samples_to_bytes(samples);
    let result = ctx.transport.0.lock().send(&bytes);

    match result {
        Ok(()) => {
            *send_failing = false;
            ctx.diagnostics.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            ctx.diagnostics.send_errors.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "transport send failed");
            if !*send_failing {
                *send_failing = true;
                ctx.dispatcher.dispatch(
                    EventKind::BackendError,
                    &ErrorPayload {
                        message: e.to_string(),
                    },
                );
                ctx.diagnostics
                    .events_delivered
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn handle_event(ctx: &mut WorkerContext, event: BackendEvent, events_open: &mut bool) {
    // Barge-in: caller speech during an active file playback interrupts it.
    if ctx.play_file.load(Ordering::Relaxed) && event.indicates_speech() {
        ctx.play_file.store(false, Ordering::Relaxed);
        ctx.dispatcher
            .dispatch(EventKind::PlayInterrupt, &MarkerPayload::default());
        ctx.diagnostics
            .events_delivered
            .fetch_add(1, Ordering::Relaxed);
        debug!("play interrupt dispatched");
    }

    match &event {
        BackendEvent::UtteranceEnd => {
            // Gate further audio until the host clears the flag.
            ctx.end_of_utterance.store(true, Ordering::Relaxed);
        }
        BackendEvent::Closed => {
            *events_open = false;
        }
        _ => {}
    }

    ctx.dispatcher.dispatch_backend(&event);
    ctx.diagnostics
        .events_delivered
        .fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;

    use crate::buffering::{create_session_ring, Producer};
    use crate::error::{CallstreamError, Result};
    use crate::events::dispatch::ResponseHandler;
    use crate::transport::{BackendTransport, TransportConfig};

    type SentFrames = Arc<Mutex<Vec<Vec<u8>>>>;
    type Recorded = Arc<Mutex<Vec<(String, String)>>>;

    struct RecordingTransport {
        sends: SentFrames,
        fail_remaining: usize,
    }

    impl RecordingTransport {
        fn new(sends: SentFrames, fail_remaining: usize) -> Self {
            Self {
                sends,
                fail_remaining,
            }
        }
    }

    impl BackendTransport for RecordingTransport {
        fn open(&mut self, _config: &TransportConfig) -> Result<Receiver<BackendEvent>> {
            let (_tx, rx) = unbounded();
            Ok(rx)
        }

        fn send(&mut self, frame: &[u8]) -> Result<()> {
            if self.fail_remaining > 0 {
                self.fail_remaining -= 1;
                return Err(CallstreamError::Other(anyhow::anyhow!(
                    "scripted send failure"
                )));
            }
            self.sends.lock().push(frame.to_vec());
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn recording_handler() -> (ResponseHandler, Recorded) {
        let calls: Recorded = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let handler: ResponseHandler = Arc::new(move |_session_id, channel, json| {
            recorded.lock().push((channel.into(), json.into()));
        });
        (handler, calls)
    }

    struct TestHarness {
        ctx: WorkerContext,
        sends: SentFrames,
        calls: Recorded,
        running: Arc<AtomicBool>,
        end_of_utterance: Arc<AtomicBool>,
        play_file: Arc<AtomicBool>,
        diagnostics: Arc<SessionDiagnostics>,
        events_tx: crossbeam_channel::Sender<BackendEvent>,
    }

    fn harness(fail_sends: usize) -> (TestHarness, crate::buffering::AudioProducer) {
        let (producer, consumer) = create_session_ring(4096);
        let sends: SentFrames = Arc::new(Mutex::new(Vec::new()));
        let transport = TransportHandle::new(RecordingTransport::new(Arc::clone(&sends), fail_sends));
        let (events_tx, events_rx) = unbounded();
        let (handler, calls) = recording_handler();
        let running = Arc::new(AtomicBool::new(false));
        let end_of_utterance = Arc::new(AtomicBool::new(false));
        let play_file = Arc::new(AtomicBool::new(false));
        let diagnostics = Arc::new(SessionDiagnostics::default());

        let ctx = WorkerContext {
            consumer,
            transport,
            events: events_rx,
            running: Arc::clone(&running),
            dispatcher: EventDispatcher::new("worker-test", handler, false),
            end_of_utterance: Arc::clone(&end_of_utterance),
            play_file: Arc::clone(&play_file),
            diagnostics: Arc::clone(&diagnostics),
            send_chunk_samples: 320,
            close_grace: Duration::from_millis(500),
            event_poll: Duration::from_millis(5),
        };

        (
            TestHarness {
                ctx,
                sends,
                calls,
                running,
                end_of_utterance,
                play_file,
                diagnostics,
                events_tx,
            },
            producer,
        )
    }

    #[test]
    fn shutdown_drain_forwards_all_buffered_audio() {
        let (h, mut producer) = harness(0);
        let samples: Vec<i16> = (0..640).map(|i| i as i16).collect();
        assert_eq!(producer.push_slice(&samples), 640);

        // running is already false — run() goes straight to the final drain.
        run(h.ctx);

        let sent: Vec<u8> = h.sends.lock().iter().flatten().copied().collect();
        assert_eq!(sent, audio::samples_to_bytes(&samples));
        assert_eq!(h.diagnostics.snapshot().frames_sent, 2);
    }

    #[test]
    fn queued_events_are_delivered_in_emission_order() {
        let (h, _producer) = harness(0);
        h.events_tx.send(BackendEvent::TranscriptBegin).unwrap();
        h.events_tx
            .send(BackendEvent::Transcript {
                text: "one".into(),
                is_final: false,
                confidence: None,
            })
            .unwrap();
        h.events_tx.send(BackendEvent::UtteranceEnd).unwrap();

        run(h.ctx);

        let channels: Vec<String> = h.calls.lock().iter().map(|(c, _)| c.clone()).collect();
        assert_eq!(
            channels,
            vec![
                "callstream::start_of_transcript",
                "callstream::transcription",
                "callstream::end_of_utterance",
            ]
        );
        assert_eq!(h.diagnostics.snapshot().events_delivered, 3);
    }

    #[test]
    fn send_failure_emits_one_error_event_and_forwarding_continues() {
        let (h, mut producer) = harness(1);
        // Two chunks: the first send fails, the second succeeds.
        let samples: Vec<i16> = (0..640).map(|i| (i % 100) as i16).collect();
        producer.push_slice(&samples);

        run(h.ctx);

        let calls = h.calls.lock();
        let errors: Vec<_> = calls
            .iter()
            .filter(|(c, _)| c == "callstream::error")
            .collect();
        assert_eq!(errors.len(), 1, "one error event per failure streak");

        let snap = h.diagnostics.snapshot();
        assert_eq!(snap.send_errors, 1);
        assert_eq!(snap.frames_sent, 1);
        assert_eq!(h.sends.lock().len(), 1);
    }

    #[test]
    fn utterance_end_sets_the_gating_flag() {
        let (h, _producer) = harness(0);
        h.events_tx.send(BackendEvent::UtteranceEnd).unwrap();

        let flag = Arc::clone(&h.end_of_utterance);
        run(h.ctx);

        assert!(flag.load(Ordering::Relaxed));
        assert_eq!(h.calls.lock()[0].0, "callstream::end_of_utterance");
    }

    #[test]
    fn speech_during_playback_triggers_one_play_interrupt() {
        let (h, _producer) = harness(0);
        h.play_file.store(true, Ordering::Relaxed);
        h.events_tx.send(BackendEvent::TranscriptBegin).unwrap();
        h.events_tx
            .send(BackendEvent::Transcript {
                text: "barge".into(),
                is_final: false,
                confidence: None,
            })
            .unwrap();

        let play_file = Arc::clone(&h.play_file);
        run(h.ctx);

        let channels: Vec<String> = h.calls.lock().iter().map(|(c, _)| c.clone()).collect();
        assert_eq!(
            channels,
            vec![
                "callstream::play_interrupt",
                "callstream::start_of_transcript",
                "callstream::transcription",
            ]
        );
        assert!(!play_file.load(Ordering::Relaxed), "flag cleared after interrupt");
    }

    #[test]
    fn worker_stops_when_running_clears() {
        let (h, _producer) = harness(0);
        h.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&h.running);
        let handle = std::thread::spawn(move || run(h.ctx));

        std::thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::SeqCst);
        handle.join().expect("worker thread panicked");
    }

    #[test]
    fn closed_event_maps_to_end_of_transcript_and_stops_polling() {
        let (h, _producer) = harness(0);
        h.events_tx.send(BackendEvent::Closed).unwrap();
        h.events_tx.send(BackendEvent::TranscriptBegin).unwrap();

        run(h.ctx);

        let calls = h.calls.lock();
        assert_eq!(calls.len(), 1, "events after Closed are not delivered");
        assert_eq!(calls[0].0, "callstream::end_of_transcript");
    }
}
