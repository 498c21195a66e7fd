//! Oriented-box detection.
//!
//! The detector is a pluggable backend behind [`DetectorBackend`]: the
//! scripted [`StubBackend`] keeps the pipeline testable and runnable without
//! native dependencies, and [`TractBackend`] (feature `backend-tract`) runs
//! a YOLO-OBB ONNX model.

mod backend;
mod backends;
mod result;

use anyhow::Result;

use crate::config::ModelSettings;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::Detection;

/// Build the detector described by `model`.
///
/// A configured model path requires the `backend-tract` feature; without a
/// path the stub detector (which never detects) is used and a warning is
/// logged.
pub fn open_detector(model: &ModelSettings) -> Result<Box<dyn DetectorBackend>> {
    match &model.path {
        None => {
            log::warn!("no model configured; using the stub detector (no detections)");
            Ok(Box::new(StubBackend::empty()))
        }
        #[cfg(feature = "backend-tract")]
        Some(path) => {
            let backend =
                TractBackend::load(path, model.input_size, model.class_names.clone())?;
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "backend-tract"))]
        Some(_) => Err(anyhow::anyhow!(crate::PipelineError::ModelUnavailable {
            reason: "running an ONNX model requires the backend-tract feature".to_string(),
        })),
    }
}
