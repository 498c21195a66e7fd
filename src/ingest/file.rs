//! Local file frame source.

use anyhow::{anyhow, Result};

#[cfg(feature = "media-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::{Frame, VideoMeta};
use crate::PipelineError;

const SYNTHETIC_WIDTH: u32 = 64;
const SYNTHETIC_HEIGHT: u32 = 48;
const SYNTHETIC_DEFAULT_FRAMES: u64 = 30;

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource").finish_non_exhaustive()
    }
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "media-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open a video source. Failures (unreadable file, URL scheme, missing
    /// decode feature) surface as [`PipelineError::SourceUnavailable`].
    pub fn open(path: &str) -> Result<Self> {
        let unavailable = |reason: String| {
            anyhow!(PipelineError::SourceUnavailable {
                path: path.to_string(),
                reason,
            })
        };

        if !is_local_file_path(path) {
            return Err(unavailable(
                "only local file paths are supported (no URL schemes)".to_string(),
            ));
        }

        if let Some(spec) = path.strip_prefix("stub://") {
            let source = SyntheticSource::new(spec)
                .map_err(|e| unavailable(format!("invalid stub source: {}", e)))?;
            log::info!("FileSource: opened {} (synthetic)", path);
            return Ok(Self {
                backend: FileBackend::Synthetic(source),
            });
        }

        #[cfg(feature = "media-ffmpeg")]
        {
            let source =
                FfmpegFileSource::new(path).map_err(|e| unavailable(format!("{:#}", e)))?;
            log::info!("FileSource: opened {} (ffmpeg)", path);
            Ok(Self {
                backend: FileBackend::Ffmpeg(source),
            })
        }
        #[cfg(not(feature = "media-ffmpeg"))]
        {
            Err(unavailable(
                "decoding real video files requires the media-ffmpeg feature".to_string(),
            ))
        }
    }

    /// Stream metadata, known once the source is open.
    pub fn meta(&self) -> VideoMeta {
        match &self.backend {
            FileBackend::Synthetic(source) => source.meta(),
            #[cfg(feature = "media-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.meta(),
        }
    }

    /// Decode the next frame. `None` marks a clean end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            #[cfg(feature = "media-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and featureless runs
// ----------------------------------------------------------------------------

/// `stub://<frames>` yields that many deterministic 64x48 frames at 10 fps;
/// `stub://` alone yields 30.
struct SyntheticSource {
    total: u64,
    next_index: u64,
}

impl SyntheticSource {
    fn new(spec: &str) -> Result<Self> {
        let total = if spec.is_empty() {
            SYNTHETIC_DEFAULT_FRAMES
        } else {
            spec.parse::<u64>()
                .map_err(|_| anyhow!("frame count '{}' is not a number", spec))?
        };
        Ok(Self {
            total,
            next_index: 0,
        })
    }

    fn meta(&self) -> VideoMeta {
        VideoMeta {
            width: SYNTHETIC_WIDTH,
            height: SYNTHETIC_HEIGHT,
            fps_num: 10,
            fps_den: 1,
            frame_count: Some(self.total),
        }
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.next_index >= self.total {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        let pixel_count = (SYNTHETIC_WIDTH * SYNTHETIC_HEIGHT * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + index * 7) % 256) as u8;
        }
        Some(Frame::new(index, SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, pixels))
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_is_finite_and_ordered() {
        let mut source = FileSource::open("stub://3").unwrap();
        let meta = source.meta();
        assert_eq!(meta.frame_count, Some(3));
        assert_eq!((meta.width, meta.height), (64, 48));

        for expected in 0..3 {
            let frame = source.next_frame().unwrap().expect("frame");
            assert_eq!(frame.index, expected);
        }
        assert!(source.next_frame().unwrap().is_none());
        // End of stream is stable.
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn synthetic_frames_differ_between_indices() {
        let mut source = FileSource::open("stub://2").unwrap();
        let a = source.next_frame().unwrap().unwrap();
        let b = source.next_frame().unwrap().unwrap();
        assert_ne!(a.data(), b.data());
    }

    #[test]
    fn rejects_url_schemes() {
        let err = FileSource::open("rtsp://camera-1").expect_err("must reject");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn rejects_bad_stub_spec() {
        assert!(FileSource::open("stub://lots").is_err());
        assert!(FileSource::open("stub://").unwrap().meta().frame_count == Some(30));
    }
}
