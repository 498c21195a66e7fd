//! roadscan
//!
//! Runs a pre-trained oriented-bounding-box (OBB) object detector over a
//! video file, frame by frame, and persists the results three ways: an
//! annotated output video, a CSV detection log, and JPEG snapshots of every
//! frame that contained at least one detection.
//!
//! # Architecture
//!
//! The per-frame loop is owned by [`pipeline::Pipeline`]:
//!
//! 1. decode the next frame ([`ingest::FileSource`])
//! 2. run the detector ([`detect::DetectorBackend`])
//! 3. for each detection: append to the log ([`detlog::DetectionLog`]) and
//!    draw the rotated box ([`annotate::Annotator`])
//! 4. snapshot the frame if anything was detected ([`sink::SnapshotSink`])
//! 5. encode the frame ([`sink::VideoSink`]), preserving decode order
//! 6. publish preview/progress ([`progress::ProgressSink`])
//!
//! The loop runs on a single background worker. The controlling thread
//! communicates through two shared handles: a [`CancelToken`] it sets and the
//! worker observes once per iteration, and a [`RunState`] the worker updates
//! and the controller reads. There is exactly one writer for every resource,
//! so no locks are needed.
//!
//! Heavy native dependencies are feature-gated the same way for every
//! deployment concern: `media-ffmpeg` enables real video decode/encode,
//! `backend-tract` enables ONNX inference. Without them the `stub://` source,
//! the scripted stub detector, and the in-memory sinks keep the entire
//! pipeline exercisable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;

pub mod annotate;
pub mod config;
pub mod detect;
pub mod detlog;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod progress;
pub mod sink;

pub use annotate::Annotator;
pub use config::RunConfig;
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use detect::{Detection, DetectorBackend, StubBackend};
pub use detlog::{CsvDetectionLog, DetectionLog, InMemoryDetectionLog};
pub use frame::{Frame, VideoMeta};
pub use ingest::FileSource;
pub use pipeline::{Pipeline, RunStatus, RunSummary};
pub use progress::{ConsoleProgress, NullProgress, ProgressSink};
#[cfg(feature = "media-ffmpeg")]
pub use sink::Mp4Sink;
pub use sink::{JpegSnapshotSink, MemoryVideoSink, NullVideoSink, SnapshotSink, VideoSink};

// -------------------- Error Taxonomy --------------------

/// Terminal failure conditions for a run.
///
/// Mid-run read/write/encode errors carry no dedicated variant; they
/// propagate as plain `anyhow` errors with context and are reported as
/// generic I/O failures. Everything here is terminal for the current run and
/// never retried; the user starts a new run to retry.
#[derive(Debug)]
pub enum PipelineError {
    /// The input video could not be opened.
    SourceUnavailable { path: String, reason: String },
    /// The detector failed to initialize. Raised once at startup, never per
    /// frame.
    ModelUnavailable { reason: String },
    /// An output directory is missing or not writable.
    DirectoryUnavailable { path: String },
    /// A run is already active. Rejected before any side effect.
    AlreadyRunning,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::SourceUnavailable { path, reason } => {
                write!(f, "failed to open video '{}': {}", path, reason)
            }
            PipelineError::ModelUnavailable { reason } => {
                write!(f, "failed to load detection model: {}", reason)
            }
            PipelineError::DirectoryUnavailable { path } => {
                write!(f, "output directory '{}' is not available", path)
            }
            PipelineError::AlreadyRunning => {
                write!(f, "processing already in progress")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

// -------------------- Cancellation --------------------

/// Cooperative cancellation flag shared between the controlling thread and
/// the pipeline worker.
///
/// The worker reads the flag at the top of every loop iteration, so
/// cancellation is observed with one-iteration granularity, never by
/// pre-empting the thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// -------------------- Run State --------------------

/// Shared bookkeeping for the active run.
///
/// The worker is the only writer of the frame counters; the controlling
/// thread only reads them. `begin` doubles as the re-entrancy gate: a second
/// `begin` while a run is active fails with [`PipelineError::AlreadyRunning`]
/// and leaves the active run untouched.
#[derive(Debug, Default)]
pub struct RunState {
    is_running: AtomicBool,
    current_frame: AtomicU64,
    total_frames: AtomicU64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the run slot. The returned guard releases it (and resets the
    /// counters) on drop, on every exit path including panic.
    pub fn begin(&self) -> Result<RunGuard<'_>> {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning.into());
        }
        Ok(RunGuard { state: self })
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::SeqCst)
    }

    /// Total frame count, or 0 when the source does not know it.
    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::SeqCst)
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.total_frames.store(total, Ordering::SeqCst);
    }

    pub(crate) fn set_current(&self, current: u64) {
        self.current_frame.store(current, Ordering::SeqCst);
    }
}

/// Exclusive claim on a [`RunState`] for the duration of one run.
pub struct RunGuard<'a> {
    state: &'a RunState,
}

impl std::fmt::Debug for RunGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGuard").finish_non_exhaustive()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.current_frame.store(0, Ordering::SeqCst);
        self.state.total_frames.store(0, Ordering::SeqCst);
        self.state.is_running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_sticky() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());

        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn run_state_rejects_second_begin() {
        let state = RunState::new();
        let guard = state.begin().expect("first begin");
        assert!(state.is_running());

        let err = state.begin().expect_err("second begin must fail");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::AlreadyRunning)
        ));
        // The active run is untouched.
        assert!(state.is_running());

        drop(guard);
        assert!(!state.is_running());
    }

    #[test]
    fn run_guard_resets_counters_on_drop() {
        let state = RunState::new();
        {
            let _guard = state.begin().unwrap();
            state.set_total(10);
            state.set_current(4);
            assert_eq!(state.total_frames(), 10);
            assert_eq!(state.current_frame(), 4);
        }
        assert_eq!(state.total_frames(), 0);
        assert_eq!(state.current_frame(), 0);
        assert!(!state.is_running());
    }
}
