//! Pipeline driver.
//!
//! Owns the per-frame loop: decode → detect → annotate/log/persist → encode
//! → publish preview/progress. The loop observes the cancellation token at
//! the top of every iteration and releases every resource (source, video
//! sink, detection log) on each exit path: completion, cancellation, and
//! mid-run I/O failure. Artifacts written before an abort stay on disk;
//! there is no rollback.

use anyhow::{Context, Result};

use crate::annotate::Annotator;
use crate::config::RunConfig;
use crate::detect::{self, DetectorBackend};
use crate::detlog::{CsvDetectionLog, DetectionLog};
use crate::ingest::FileSource;
use crate::progress::ProgressSink;
use crate::sink::{JpegSnapshotSink, SnapshotSink, VideoSink};
use crate::{CancelToken, RunState};

/// How a run ended. Cancellation is not an error; it is a distinct outcome
/// with partial artifacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// End of stream reached; every input frame was processed.
    Completed,
    /// Cancellation observed mid-loop; no further frames were read.
    Terminated,
}

#[derive(Clone, Copy, Debug)]
pub struct RunSummary {
    pub status: RunStatus,
    pub frames_processed: u64,
    pub detections_logged: u64,
    pub snapshots_written: u64,
}

/// One configured run over one input video.
pub struct Pipeline {
    input_path: String,
    output_dir: String,
    threshold: f32,
    detector: Box<dyn DetectorBackend>,
    annotator: Annotator,
    video: Box<dyn VideoSink>,
    log: Box<dyn DetectionLog>,
    snapshots: Box<dyn SnapshotSink>,
}

impl Pipeline {
    /// Assemble a pipeline from explicit collaborators. Nothing is opened
    /// yet; all I/O starts inside [`Pipeline::run`].
    pub fn new(
        config: &RunConfig,
        detector: Box<dyn DetectorBackend>,
        video: Box<dyn VideoSink>,
        log: Box<dyn DetectionLog>,
        snapshots: Box<dyn SnapshotSink>,
    ) -> Self {
        Self {
            input_path: config.input_path.clone(),
            output_dir: config.output_dir.display().to_string(),
            threshold: config.confidence_threshold,
            detector,
            annotator: Annotator::new(),
            video,
            log,
            snapshots,
        }
    }

    /// Assemble the default collaborators for `config`: the configured
    /// detector, the MP4 sink (or a counting null sink without
    /// `media-ffmpeg`), the CSV log, and the JPEG snapshot sink.
    ///
    /// Creates the output directories and enforces the overwrite policy.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        config.validate()?;
        config.prepare()?;

        let detector = detect::open_detector(&config.model)?;
        let log = Box::new(CsvDetectionLog::new(config.log_path()));
        let snapshots = Box::new(JpegSnapshotSink::new(config.frames_dir()));

        #[cfg(feature = "media-ffmpeg")]
        let video: Box<dyn VideoSink> =
            Box::new(crate::sink::Mp4Sink::new(config.output_video_path()));
        #[cfg(not(feature = "media-ffmpeg"))]
        let video: Box<dyn VideoSink> = {
            log::warn!(
                "built without media-ffmpeg; no output video will be written to {}",
                config.output_video_path().display()
            );
            Box::new(crate::sink::NullVideoSink::new())
        };

        Ok(Self::new(config, detector, video, log, snapshots))
    }

    /// Execute the run. Exactly one run may be active per [`RunState`];
    /// a concurrent call fails with `AlreadyRunning` and leaves the active
    /// run untouched. Every failure is also surfaced through
    /// `progress.on_status` as human-readable text.
    pub fn run(
        mut self,
        state: &RunState,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<RunSummary> {
        let guard = match state.begin() {
            Ok(guard) => guard,
            Err(e) => {
                progress.on_status(&format!("{}", e));
                return Err(e);
            }
        };

        let result = self.execute(state, cancel, progress);
        drop(guard);

        if let Err(e) = &result {
            progress.on_status(&format!(
                "Error during processing: {:#}. Output saved to: {} (if any)",
                e, self.output_dir
            ));
        }
        result
    }

    fn execute(
        &mut self,
        state: &RunState,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<RunSummary> {
        progress.on_status(&format!(
            "Processing started. Output will be saved to: {}",
            self.output_dir
        ));

        let mut source = FileSource::open(&self.input_path)?;
        let meta = source.meta();
        log::info!(
            "processing {}: {}x{} @ {:.2} fps, {} frames",
            self.input_path,
            meta.width,
            meta.height,
            meta.fps(),
            meta.frame_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        );
        state.set_total(meta.frame_count.unwrap_or(0));

        self.detector.warm_up().context("detector warm-up")?;
        self.video.open(&meta)?;
        self.log.open()?;

        let loop_result = self.process_frames(&mut source, state, cancel, progress);

        // Resources are released on every exit path; the log flush keeps a
        // partial CSV parseable after cancellation or failure.
        let video_finish = self.video.finish();
        let log_finish = self.log.finish();

        let summary = loop_result?;
        video_finish?;
        log_finish?;

        match summary.status {
            RunStatus::Completed => {
                log::info!(
                    "completed: {} frames, {} detections, {} snapshots",
                    summary.frames_processed,
                    summary.detections_logged,
                    summary.snapshots_written
                );
                progress.on_status(&format!("Done! Output saved to: {}", self.output_dir));
            }
            RunStatus::Terminated => {
                log::warn!(
                    "terminated after {} frames; output may be incomplete",
                    summary.frames_processed
                );
                progress.on_status(&format!(
                    "Processing terminated. Output may be incomplete in: {}",
                    self.output_dir
                ));
            }
        }
        Ok(summary)
    }

    fn process_frames(
        &mut self,
        source: &mut FileSource,
        state: &RunState,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<RunSummary> {
        let mut frames_processed = 0u64;
        let mut detections_logged = 0u64;
        let mut snapshots_written = 0u64;

        let status = loop {
            if cancel.is_cancelled() {
                break RunStatus::Terminated;
            }
            let Some(mut frame) = source.next_frame()? else {
                break RunStatus::Completed;
            };

            let detections =
                self.detector
                    .detect(frame.data(), frame.width, frame.height, self.threshold)?;

            // Log and draw in the order the model returned the boxes.
            for det in &detections {
                self.log.append(frame.index, det)?;
                detections_logged += 1;
                self.annotator.draw(&mut frame, det);
            }
            if !detections.is_empty() {
                let path = self.snapshots.save(&frame)?;
                snapshots_written += 1;
                log::debug!(
                    "frame {}: {} detections, snapshot {}",
                    frame.index,
                    detections.len(),
                    path.display()
                );
            }

            // Encode order must equal decode order.
            self.video.write(&frame)?;

            frames_processed += 1;
            state.set_current(frames_processed);
            progress.on_preview(&frame);
            progress.on_progress(frames_processed, state.total_frames());
        };

        Ok(RunSummary {
            status,
            frames_processed,
            detections_logged,
            snapshots_written,
        })
    }
}
