//! roadscan - run an oriented-box road-defect detector over a video file.
//!
//! Assembles the pipeline from config (JSON file + ROADSCAN_* environment +
//! CLI flags), runs it on a background worker, renders progress on stderr,
//! and wires Ctrl-C to cooperative cancellation. After cancellation the
//! worker gets a bounded grace period to stop on its own; if it does not,
//! the completion state is reported as unknown. The worker thread is never
//! killed.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::Parser;

use roadscan::{CancelToken, ConsoleProgress, Pipeline, RunConfig, RunState, RunStatus, RunSummary};

/// Grace period for the worker to observe cancellation.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "roadscan", version, about = "Oriented-box defect detection over video files")]
struct Args {
    /// Input video file, or stub://<frames> for a synthetic clip.
    input: Option<String>,

    /// Directory for the annotated video, detection log, and snapshots.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Minimum confidence for a detection to be kept.
    #[arg(short, long)]
    threshold: Option<f32>,

    /// ONNX model file (requires the backend-tract feature).
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Replace existing output files instead of failing.
    #[arg(long)]
    overwrite: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = RunConfig::load()?;
    if let Some(input) = args.input {
        config.input_path = input;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(threshold) = args.threshold {
        config.confidence_threshold = threshold;
    }
    if let Some(model) = args.model {
        config.model.path = Some(model);
    }
    if args.overwrite {
        config.overwrite = true;
    }
    config.validate()?;

    let pipeline = Pipeline::from_config(&config)?;

    let state = Arc::new(RunState::new());
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::warn!("termination requested; stopping after the current frame");
            cancel.cancel();
        })?;
    }

    log::info!(
        "roadscan {} processing {}",
        env!("CARGO_PKG_VERSION"),
        config.input_path
    );

    let progress = Arc::new(ConsoleProgress::new());
    let (result_tx, result_rx) = mpsc::channel();
    let worker = {
        let state = state.clone();
        let cancel = cancel.clone();
        let progress = progress.clone();
        thread::spawn(move || {
            let result = pipeline.run(&state, &cancel, progress.as_ref());
            let _ = result_tx.send(result);
        })
    };

    let result = wait_for_worker(&result_rx, &cancel);

    match result {
        None => {
            // Cooperative cancellation was not observed within the grace
            // period. Never kill the thread; report the unknown state.
            progress.finish("Worker did not stop in time; completion state unknown");
            log::warn!(
                "worker still running {}s after cancellation; output in {} may be incomplete",
                JOIN_TIMEOUT.as_secs(),
                config.output_dir.display()
            );
            Ok(())
        }
        Some(result) => {
            let _ = worker.join();
            let summary = result?;
            progress.finish(&final_status(&summary, &config));
            Ok(())
        }
    }
}

fn wait_for_worker(
    result_rx: &mpsc::Receiver<Result<RunSummary>>,
    cancel: &CancelToken,
) -> Option<Result<RunSummary>> {
    let mut cancelled_at: Option<Instant> = None;
    loop {
        match result_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(result) => return Some(result),
            Err(RecvTimeoutError::Disconnected) => {
                return Some(Err(anyhow!("worker exited without reporting a result")));
            }
            Err(RecvTimeoutError::Timeout) => match cancelled_at {
                Some(at) if at.elapsed() > JOIN_TIMEOUT => return None,
                Some(_) => {}
                None if cancel.is_cancelled() => cancelled_at = Some(Instant::now()),
                None => {}
            },
        }
    }
}

fn final_status(summary: &RunSummary, config: &RunConfig) -> String {
    match summary.status {
        RunStatus::Completed => format!(
            "Done! {} frames, {} detections. Output saved to: {}",
            summary.frames_processed,
            summary.detections_logged,
            config.output_dir.display()
        ),
        RunStatus::Terminated => format!(
            "Processing terminated after {} frames. Output may be incomplete in: {}",
            summary.frames_processed,
            config.output_dir.display()
        ),
    }
}
