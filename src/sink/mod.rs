//! Output sinks: annotated video, JPEG snapshots.
//!
//! The video sink learns its dimensions and frame rate at `open` and rejects
//! any frame of a different size before it can corrupt the container. The
//! snapshot sink persists single frames named by frame index; it requires
//! the target directory to exist already (created at configuration time).

#[cfg(feature = "media-ffmpeg")]
pub mod mp4;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use image::ImageEncoder;

use crate::frame::{Frame, VideoMeta};
use crate::PipelineError;

#[cfg(feature = "media-ffmpeg")]
pub use mp4::Mp4Sink;

// ----------------------------------------------------------------------------
// Video sink
// ----------------------------------------------------------------------------

/// Encodes annotated frames into an output container.
pub trait VideoSink: Send {
    /// Declare stream parameters and open the container.
    fn open(&mut self, meta: &VideoMeta) -> Result<()>;

    /// Append one frame. Frame dimensions must match the declared ones.
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the container. Called on every pipeline exit path.
    fn finish(&mut self) -> Result<()>;
}

/// Fail fast instead of silently corrupting the container.
pub(crate) fn ensure_frame_size(declared: Option<(u32, u32)>, frame: &Frame) -> Result<()> {
    let (width, height) =
        declared.ok_or_else(|| anyhow!("video sink written before open"))?;
    if frame.width != width || frame.height != height {
        return Err(anyhow!(
            "frame {} is {}x{}, but the sink was opened for {}x{}",
            frame.index,
            frame.width,
            frame.height,
            width,
            height
        ));
    }
    Ok(())
}

/// Records written frame indices in memory (tests).
pub struct MemoryVideoSink {
    written: Arc<Mutex<Vec<u64>>>,
    declared: Option<(u32, u32)>,
}

impl MemoryVideoSink {
    pub fn new() -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            declared: None,
        }
    }

    /// Shared view of the written frame indices, in write order.
    pub fn frames_handle(&self) -> Arc<Mutex<Vec<u64>>> {
        self.written.clone()
    }
}

impl Default for MemoryVideoSink {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSink for MemoryVideoSink {
    fn open(&mut self, meta: &VideoMeta) -> Result<()> {
        self.declared = Some((meta.width, meta.height));
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        ensure_frame_size(self.declared, frame)?;
        self.written
            .lock()
            .map_err(|_| anyhow!("video sink lock poisoned"))?
            .push(frame.index);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Counts frames and writes nothing. Used by featureless binary runs where
/// no encoder is compiled in.
#[derive(Default)]
pub struct NullVideoSink {
    declared: Option<(u32, u32)>,
    written: u64,
}

impl NullVideoSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }
}

impl VideoSink for NullVideoSink {
    fn open(&mut self, meta: &VideoMeta) -> Result<()> {
        self.declared = Some((meta.width, meta.height));
        Ok(())
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        ensure_frame_size(self.declared, frame)?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Snapshot sink
// ----------------------------------------------------------------------------

/// Persists single frames that contained at least one detection.
pub trait SnapshotSink: Send {
    fn save(&mut self, frame: &Frame) -> Result<PathBuf>;
}

/// Writes `frame_<index>.jpg` into a directory that must already exist.
pub struct JpegSnapshotSink {
    dir: PathBuf,
    quality: u8,
}

impl JpegSnapshotSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            quality: 90,
        }
    }
}

impl SnapshotSink for JpegSnapshotSink {
    fn save(&mut self, frame: &Frame) -> Result<PathBuf> {
        if !self.dir.is_dir() {
            return Err(anyhow!(PipelineError::DirectoryUnavailable {
                path: self.dir.display().to_string(),
            }));
        }
        let path = self.dir.join(format!("frame_{}.jpg", frame.index));
        let file = File::create(&path)
            .with_context(|| format!("failed to create snapshot {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, self.quality);
        encoder
            .write_image(
                frame.data(),
                frame.width,
                frame.height,
                image::ExtendedColorType::Rgb8,
            )
            .with_context(|| format!("failed to encode snapshot {}", path.display()))?;
        Ok(path)
    }
}

/// Records saved frame indices in memory (tests).
pub struct MemorySnapshotSink {
    saved: Arc<Mutex<Vec<u64>>>,
}

impl MemorySnapshotSink {
    pub fn new() -> Self {
        Self {
            saved: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn saved_handle(&self) -> Arc<Mutex<Vec<u64>>> {
        self.saved.clone()
    }
}

impl Default for MemorySnapshotSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSink for MemorySnapshotSink {
    fn save(&mut self, frame: &Frame) -> Result<PathBuf> {
        self.saved
            .lock()
            .map_err(|_| anyhow!("snapshot sink lock poisoned"))?
            .push(frame.index);
        Ok(PathBuf::from(format!("memory://frame_{}.jpg", frame.index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> VideoMeta {
        VideoMeta {
            width: 64,
            height: 48,
            fps_num: 10,
            fps_den: 1,
            frame_count: Some(2),
        }
    }

    #[test]
    fn memory_sink_preserves_write_order() {
        let mut sink = MemoryVideoSink::new();
        let handle = sink.frames_handle();
        sink.open(&meta()).unwrap();
        for index in 0..5 {
            sink.write(&Frame::blank(index, 64, 48)).unwrap();
        }
        sink.finish().unwrap();
        assert_eq!(*handle.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn mismatched_frame_size_is_rejected() {
        let mut sink = MemoryVideoSink::new();
        sink.open(&meta()).unwrap();
        let err = sink.write(&Frame::blank(0, 32, 32)).expect_err("must fail");
        assert!(err.to_string().contains("32x32"));
    }

    #[test]
    fn write_before_open_is_rejected() {
        let mut sink = NullVideoSink::new();
        assert!(sink.write(&Frame::blank(0, 64, 48)).is_err());
    }

    #[test]
    fn jpeg_snapshot_is_named_by_frame_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JpegSnapshotSink::new(dir.path());
        let path = sink.save(&Frame::blank(17, 64, 48)).unwrap();
        assert_eq!(path.file_name().unwrap(), "frame_17.jpg");
        assert!(path.is_file());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn jpeg_snapshot_requires_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not_created");
        let mut sink = JpegSnapshotSink::new(&missing);
        let err = sink.save(&Frame::blank(0, 64, 48)).expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DirectoryUnavailable { .. })
        ));
    }
}
