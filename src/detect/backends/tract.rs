#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::PipelineError;

/// IoU threshold for greedy non-maximum suppression.
const IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend running a YOLO-OBB ONNX model.
///
/// The model is loaded once at startup; a load failure is fatal for the run
/// and never retried per frame. Frames are resized to the square model input,
/// and decoded boxes are mapped back to frame pixel coordinates.
pub struct TractBackend {
    model: TypedSimplePlan<TypedModel>,
    input_size: u32,
    class_names: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = Self::build_plan(model_path, input_size).map_err(|e| {
            anyhow!(PipelineError::ModelUnavailable {
                reason: format!("{}: {:#}", model_path.display(), e),
            })
        })?;

        Ok(Self {
            model,
            input_size,
            class_names,
        })
    }

    fn build_plan(model_path: &Path, input_size: u32) -> Result<TypedSimplePlan<TypedModel>> {
        tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")
    }

    fn class_label(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let frame = RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let size = self.input_size;
        let resized = image::imageops::resize(&frame, size, size, FilterType::Triangle);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    /// Decode the `[1, 4 + classes + 1, proposals]` OBB head: rows are
    /// cx, cy, w, h in model space, one score per class, and the rotation
    /// angle in radians.
    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame_width: u32,
        frame_height: u32,
        threshold: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 6 {
            return Err(anyhow!(
                "unexpected OBB output shape {:?} (want [1, 4+classes+1, proposals])",
                shape
            ));
        }
        let class_count = shape[1] - 5;
        let proposals = shape[2];
        let angle_row = 4 + class_count;

        let scale_x = frame_width as f32 / self.input_size as f32;
        let scale_y = frame_height as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for i in 0..proposals {
            let mut best_class = 0usize;
            let mut best_score = 0f32;
            for c in 0..class_count {
                let score = view[[0, 4 + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if best_score < threshold {
                continue;
            }

            // Boxes scale back per axis; the angle stays as the model
            // reported it.
            candidates.push(Detection {
                class_label: self.class_label(best_class),
                confidence: best_score,
                cx: view[[0, 0, i]] * scale_x,
                cy: view[[0, 1, i]] * scale_y,
                width: view[[0, 2, i]] * scale_x,
                height: view[[0, 3, i]] * scale_y,
                rotation: view[[0, angle_row, i]],
            });
        }

        Ok(non_max_suppression(candidates))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        threshold: f32,
    ) -> Result<Vec<Detection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, width, height, threshold)
    }
}

/// Greedy NMS over the axis-aligned covering boxes of the rotated rects.
fn non_max_suppression(mut candidates: Vec<Detection>) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let candidate_box = covering_box(&candidate);
        let overlaps = kept
            .iter()
            .any(|k| iou(&covering_box(k), &candidate_box) > IOU_THRESHOLD);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn covering_box(det: &Detection) -> [f32; 4] {
    let corners = det.corners();
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for (x, y) in corners {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    [min_x, min_y, max_x, max_y]
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}
