//! Detection log.
//!
//! One CSV row per detected box, under a fixed header. The file is created
//! (header included) by `open`, which the pipeline calls only after the
//! input video opened successfully, and flushed on finish *and* on drop, so
//! a cancelled or failed run still leaves a valid, parseable log behind.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};

use crate::detect::Detection;

/// Fixed column schema. Confidence is rounded to two decimals; every other
/// numeric field is written at full precision. Rotation is radians.
pub const LOG_HEADER: &str = "Frame,Class,Confidence,X,Y,Width,Height,Rotation";

/// Sink for detection rows.
pub trait DetectionLog: Send {
    /// Create the log and write the header. No side effects before this.
    fn open(&mut self) -> Result<()>;

    fn append(&mut self, frame_index: u64, det: &Detection) -> Result<()>;

    /// Flush and finalize. Called on every pipeline exit path.
    fn finish(&mut self) -> Result<()>;
}

fn format_row(frame_index: u64, det: &Detection) -> String {
    format!(
        "{},{},{:.2},{},{},{},{},{}",
        frame_index,
        escape_csv(&det.class_label),
        det.confidence,
        det.cx,
        det.cy,
        det.width,
        det.height,
        det.rotation,
    )
}

fn escape_csv(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ----------------------------------------------------------------------------
// CSV file log
// ----------------------------------------------------------------------------

pub struct CsvDetectionLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl CsvDetectionLog {
    /// Point the log at `path`. The file is not touched until `open`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DetectionLog for CsvDetectionLog {
    fn open(&mut self) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("failed to create detection log {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", LOG_HEADER)
            .with_context(|| format!("failed to write log header to {}", self.path.display()))?;
        self.writer = Some(writer);
        Ok(())
    }

    fn append(&mut self, frame_index: u64, det: &Detection) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("detection log appended before open"))?;
        writeln!(writer, "{}", format_row(frame_index, det))
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .with_context(|| format!("failed to flush {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl Drop for CsvDetectionLog {
    fn drop(&mut self) {
        // Partial logs must stay parseable even when finish() was skipped.
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

// ----------------------------------------------------------------------------
// In-memory log for tests
// ----------------------------------------------------------------------------

/// Records formatted rows in memory. The shared handle stays readable after
/// the pipeline has consumed the log as a trait object.
pub struct InMemoryDetectionLog {
    rows: Arc<Mutex<Vec<String>>>,
    opened: bool,
}

impl InMemoryDetectionLog {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(Mutex::new(Vec::new())),
            opened: false,
        }
    }

    pub fn rows_handle(&self) -> Arc<Mutex<Vec<String>>> {
        self.rows.clone()
    }
}

impl Default for InMemoryDetectionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionLog for InMemoryDetectionLog {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn append(&mut self, frame_index: u64, det: &Detection) -> Result<()> {
        if !self.opened {
            return Err(anyhow!("detection log appended before open"));
        }
        self.rows
            .lock()
            .map_err(|_| anyhow!("detection log lock poisoned"))?
            .push(format_row(frame_index, det));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
