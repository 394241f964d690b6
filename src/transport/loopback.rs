//! `LoopbackTransport` — in-process stand-in for a real backend client.
//!
//! Used during development and in examples before a concrete speech-service
//! client is wired in. Acknowledges every open, counts the bytes it is
//! handed, and synthesizes a deterministic transcript event per second of
//! audio so the full session/dispatch path can be exercised end-to-end.

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::error::{CallstreamError, Result};
use crate::transport::{BackendEvent, BackendTransport, TransportConfig};

/// Byte-counting echo transport.
pub struct LoopbackTransport {
    events: Option<Sender<BackendEvent>>,
    /// Bytes accumulated toward the next synthetic transcript.
    pending: usize,
    /// One synthetic transcript per this many bytes.
    bytes_per_transcript: usize,
    utterance_count: u32,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            events: None,
            pending: 0,
            // 1 s of 16 kHz linear16 mono.
            bytes_per_transcript: 32_000,
            utterance_count: 0,
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendTransport for LoopbackTransport {
    fn open(&mut self, config: &TransportConfig) -> Result<Receiver<BackendEvent>> {
        let (tx, rx) = unbounded();
        let _ = tx.send(BackendEvent::TranscriptBegin);
        self.events = Some(tx);
        self.pending = 0;
        self.bytes_per_transcript = (config.sample_rate as usize * 2).max(1);
        debug!(
            session_id = %config.session_id,
            sample_rate = config.sample_rate,
            "loopback transport opened"
        );
        Ok(rx)
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let Some(ref tx) = self.events else {
            return Err(CallstreamError::NotInitialized);
        };

        self.pending += frame.len();
        while self.pending >= self.bytes_per_transcript {
            self.pending -= self.bytes_per_transcript;
            self.utterance_count += 1;
            let _ = tx.send(BackendEvent::Transcript {
                text: format!(
                    "[loopback: utterance {} / {} bytes]",
                    self.utterance_count, self.bytes_per_transcript
                ),
                is_final: true,
                confidence: Some(1.0),
            });
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(tx) = self.events.take() {
            let _ = tx.send(BackendEvent::TranscriptEnd);
            debug!(
                utterances = self.utterance_count,
                "loopback transport closed"
            );
        }
        self.pending = 0;
    }
}
