//! End-to-end pipeline tests over the synthetic source and scripted
//! detector, with in-memory sinks for ordering checks and real CSV/JPEG
//! sinks in temp directories for the on-disk guarantees.

use std::sync::Mutex;

use roadscan::{
    CancelToken, CsvDetectionLog, Detection, InMemoryDetectionLog, MemoryVideoSink, Pipeline,
    ProgressSink, RunConfig, RunState, RunStatus, StubBackend,
};
use roadscan::sink::MemorySnapshotSink;
use roadscan::{JpegSnapshotSink, PipelineError};

fn det(confidence: f32) -> Detection {
    Detection {
        class_label: "pothole".to_string(),
        confidence,
        cx: 30.0,
        cy: 20.0,
        width: 12.0,
        height: 6.0,
        rotation: 0.4,
    }
}

/// Progress sink that records status lines and optionally cancels the run
/// once a given frame count is reached.
struct RecordingProgress {
    statuses: Mutex<Vec<String>>,
    cancel_after: Option<(u64, CancelToken)>,
}

impl RecordingProgress {
    fn new() -> Self {
        Self {
            statuses: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    fn cancelling_after(frames: u64, token: CancelToken) -> Self {
        Self {
            statuses: Mutex::new(Vec::new()),
            cancel_after: Some((frames, token)),
        }
    }

    fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn on_status(&self, text: &str) {
        self.statuses.lock().unwrap().push(text.to_string());
    }

    fn on_progress(&self, current: u64, _total: u64) {
        if let Some((frames, token)) = &self.cancel_after {
            if current >= *frames {
                token.cancel();
            }
        }
    }
}

#[test]
fn run_without_detections_leaves_header_only_log_and_no_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RunConfig::for_input("stub://4");
    config.output_dir = dir.path().join("out");
    config.prepare().unwrap();

    let video = MemoryVideoSink::new();
    let written = video.frames_handle();

    let pipeline = Pipeline::new(
        &config,
        Box::new(StubBackend::empty()),
        Box::new(video),
        Box::new(CsvDetectionLog::new(config.log_path())),
        Box::new(JpegSnapshotSink::new(config.frames_dir())),
    );

    let state = RunState::new();
    let progress = RecordingProgress::new();
    let summary = pipeline
        .run(&state, &CancelToken::new(), &progress)
        .expect("run");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.frames_processed, 4);
    assert_eq!(summary.detections_logged, 0);
    assert_eq!(summary.snapshots_written, 0);

    // N frames in, N frames out, in decode order.
    assert_eq!(*written.lock().unwrap(), vec![0, 1, 2, 3]);

    // Header only.
    let log = std::fs::read_to_string(config.log_path()).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert_eq!(
        log.lines().next().unwrap(),
        "Frame,Class,Confidence,X,Y,Width,Height,Rotation"
    );

    // Frames directory stays empty.
    assert_eq!(std::fs::read_dir(config.frames_dir()).unwrap().count(), 0);

    assert!(!state.is_running());
    assert!(progress
        .statuses()
        .iter()
        .any(|s| s.starts_with("Done!")));
}

#[test]
fn single_frame_with_two_detections_logs_two_rows_and_one_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RunConfig::for_input("stub://4");
    config.output_dir = dir.path().join("out");
    config.prepare().unwrap();

    // Only the third frame (index 2) detects anything.
    let script = vec![vec![], vec![], vec![det(0.91), det(0.8734)], vec![]];

    let video = MemoryVideoSink::new();
    let written = video.frames_handle();

    let pipeline = Pipeline::new(
        &config,
        Box::new(StubBackend::scripted(script)),
        Box::new(video),
        Box::new(CsvDetectionLog::new(config.log_path())),
        Box::new(JpegSnapshotSink::new(config.frames_dir())),
    );

    let summary = pipeline
        .run(&RunState::new(), &CancelToken::new(), &RecordingProgress::new())
        .expect("run");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.detections_logged, 2);
    assert_eq!(summary.snapshots_written, 1);
    assert_eq!(*written.lock().unwrap(), vec![0, 1, 2, 3]);

    let log = std::fs::read_to_string(config.log_path()).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("2,pothole,0.91,"));
    // Confidence rounds to two decimals in the log.
    assert!(lines[2].starts_with("2,pothole,0.87,"));

    let snapshots: Vec<_> = std::fs::read_dir(config.frames_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(snapshots, vec!["frame_2.jpg".to_string()]);
}

#[test]
fn cancellation_after_five_of_ten_frames_terminates_with_partial_artifacts() {
    let config = RunConfig::for_input("stub://10");

    // Every frame would detect one box; only the first five may run.
    let script = (0..10).map(|_| vec![det(0.9)]).collect();

    let video = MemoryVideoSink::new();
    let written = video.frames_handle();
    let log = InMemoryDetectionLog::new();
    let rows = log.rows_handle();
    let snapshots = MemorySnapshotSink::new();
    let saved = snapshots.saved_handle();

    let pipeline = Pipeline::new(
        &config,
        Box::new(StubBackend::scripted(script)),
        Box::new(video),
        Box::new(log),
        Box::new(snapshots),
    );

    let state = RunState::new();
    let cancel = CancelToken::new();
    let progress = RecordingProgress::cancelling_after(5, cancel.clone());

    let summary = pipeline.run(&state, &cancel, &progress).expect("run");

    assert_eq!(summary.status, RunStatus::Terminated);
    assert_eq!(summary.frames_processed, 5);
    assert_eq!(*written.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(*saved.lock().unwrap(), vec![0, 1, 2, 3, 4]);

    // Rows exist only for frames 0..=4.
    let rows = rows.lock().unwrap();
    assert_eq!(rows.len(), 5);
    for (i, row) in rows.iter().enumerate() {
        assert!(row.starts_with(&format!("{},", i)), "row was {}", row);
    }

    assert!(!state.is_running());
    assert!(progress
        .statuses()
        .iter()
        .any(|s| s.contains("terminated")));
    assert!(!progress.statuses().iter().any(|s| s.starts_with("Done!")));
}

#[test]
fn second_run_while_active_fails_without_touching_the_active_run() {
    let config = RunConfig::for_input("stub://4");
    let state = RunState::new();

    // Simulate an active run by holding the run slot.
    let guard = state.begin().unwrap();

    let video = MemoryVideoSink::new();
    let written = video.frames_handle();
    let log = InMemoryDetectionLog::new();
    let rows = log.rows_handle();

    let pipeline = Pipeline::new(
        &config,
        Box::new(StubBackend::empty()),
        Box::new(video),
        Box::new(log),
        Box::new(MemorySnapshotSink::new()),
    );

    let progress = RecordingProgress::new();
    let err = pipeline
        .run(&state, &CancelToken::new(), &progress)
        .expect_err("second run must be rejected");
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::AlreadyRunning)
    ));

    // The rejected run had no side effects and the active run is intact.
    assert!(state.is_running());
    assert!(written.lock().unwrap().is_empty());
    assert!(rows.lock().unwrap().is_empty());

    drop(guard);
    assert!(!state.is_running());
}

#[test]
fn unopenable_source_is_reported_and_has_no_side_effects() {
    let config = RunConfig::for_input("rtsp://not-a-file");

    let log = InMemoryDetectionLog::new();
    let rows = log.rows_handle();

    let pipeline = Pipeline::new(
        &config,
        Box::new(StubBackend::empty()),
        Box::new(MemoryVideoSink::new()),
        Box::new(log),
        Box::new(MemorySnapshotSink::new()),
    );

    let state = RunState::new();
    let progress = RecordingProgress::new();
    let err = pipeline
        .run(&state, &CancelToken::new(), &progress)
        .expect_err("open must fail");
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::SourceUnavailable { .. })
    ));

    assert!(rows.lock().unwrap().is_empty());
    assert!(!state.is_running());
    // The failure reached the status sink as readable text.
    assert!(progress
        .statuses()
        .iter()
        .any(|s| s.contains("failed to open video")));
}
