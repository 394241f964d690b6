//! Audio spool file — temporary on-disk copy of a session's raw audio.
//!
//! Other subsystems (playback, diagnostics) consume call audio from this
//! file without coupling to the live streaming path. The file lives under
//! the temp directory at a path derived deterministically from the session
//! id, exists exactly while the spool is open, and never survives session
//! teardown — `close()` deletes it unconditionally, even after failed
//! writes.
//!
//! Appends are synchronous and synced to disk before returning: this is a
//! diagnostic/ancillary path, so durability wins over throughput. Spool
//! faults never affect the streaming session's health.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CallstreamError, Result};
use crate::session::validate_session_id;

struct SpoolState {
    file: File,
    path: PathBuf,
    sample_rate: u32,
    bytes_written: u64,
}

/// Per-session append-only scratch file.
pub struct AudioSpoolFile {
    session_id: String,
    /// Directory the spool file is created in.
    spool_dir: PathBuf,
    state: Mutex<Option<SpoolState>>,
}

impl AudioSpoolFile {
    /// Create the spool record rooted in the platform temp directory.
    ///
    /// No I/O happens until `initialize`.
    ///
    /// # Errors
    /// Returns `CallstreamError::InvalidArgument` for an empty or oversized
    /// session id.
    pub fn new(session_id: impl Into<String>) -> Result<Self> {
        Self::with_dir(session_id, std::env::temp_dir())
    }

    /// Create the spool record rooted in a host-configured directory.
    pub fn with_dir(session_id: impl Into<String>, spool_dir: impl Into<PathBuf>) -> Result<Self> {
        let session_id = session_id.into();
        validate_session_id(&session_id)?;
        debug!(session_id = %session_id, "spool file record created");
        Ok(Self {
            session_id,
            spool_dir: spool_dir.into(),
            state: Mutex::new(None),
        })
    }

    fn spool_path(&self, file_type: &str) -> PathBuf {
        self.spool_dir
            .join(format!("{}_fifo{}", self.session_id, file_type))
    }

    /// Open the spool file, truncating any stale content.
    ///
    /// Idempotent: an already-open spool logs a warning and returns Ok.
    /// `sample_rate` is recorded for downstream consumers; it does not gate
    /// writes.
    ///
    /// # Errors
    /// Returns `CallstreamError::FileOpen` when the path cannot be created.
    pub fn initialize(&self, file_type: &str, sample_rate: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            warn!(session_id = %self.session_id, "spool already initialized — no-op");
            return Ok(());
        }

        let path = self.spool_path(file_type);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| CallstreamError::FileOpen {
                path: path.clone(),
                source,
            })?;

        info!(
            session_id = %self.session_id,
            path = %path.display(),
            sample_rate,
            "spool file opened"
        );

        *state = Some(SpoolState {
            file,
            path,
            sample_rate,
            bytes_written: 0,
        });
        Ok(())
    }

    /// Append raw audio bytes, synced to disk before returning.
    ///
    /// # Errors
    /// - `CallstreamError::NotInitialized` before `initialize` or after
    ///   `close`.
    /// - `CallstreamError::Write` on an I/O fault; the file stays open so
    ///   the caller may retry.
    pub fn append(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CallstreamError::NotInitialized)?;

        state
            .file
            .write_all(bytes)
            .and_then(|()| state.file.sync_data())
            .map_err(CallstreamError::Write)?;

        state.bytes_written += bytes.len() as u64;
        debug!(
            session_id = %self.session_id,
            bytes = bytes.len(),
            total = state.bytes_written,
            "appended audio to spool"
        );
        Ok(())
    }

    /// Close the handle and delete the file. Idempotent, never fails.
    ///
    /// Deletion is unconditional — the spool never outlives the session,
    /// even when earlier writes failed.
    pub fn close(&self) {
        let Some(state) = self.state.lock().take() else {
            return;
        };

        drop(state.file);
        match fs::remove_file(&state.path) {
            Ok(()) => info!(
                session_id = %self.session_id,
                path = %state.path.display(),
                bytes_written = state.bytes_written,
                "spool file closed and removed"
            ),
            Err(e) => warn!(
                session_id = %self.session_id,
                path = %state.path.display(),
                error = %e,
                "failed to remove spool file"
            ),
        }
    }

    /// Path of the open spool file, `None` when uninitialized.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.state.lock().as_ref().map(|s| s.path.clone())
    }

    /// Recorded sample rate, `None` when uninitialized.
    pub fn sample_rate(&self) -> Option<u32> {
        self.state.lock().as_ref().map(|s| s.sample_rate)
    }

    /// Cumulative bytes appended since `initialize`, `None` when
    /// uninitialized.
    pub fn bytes_written(&self) -> Option<u64> {
        self.state.lock().as_ref().map(|s| s.bytes_written)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().is_some()
    }
}

impl Drop for AudioSpoolFile {
    fn drop(&mut self) {
        self.close();
    }
}
