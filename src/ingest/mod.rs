//! Video frame sources.
//!
//! [`FileSource`] decodes a local video file into RGB24 [`crate::Frame`]s:
//! - `stub://<frames>`: finite synthetic clips (testing, demos)
//! - any local path: FFmpeg decode (feature: `media-ffmpeg`)
//!
//! Sources report stream metadata once at open and then yield frames in
//! decode order until end of stream. They never write to disk.

pub mod file;
#[cfg(feature = "media-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::FileSource;
