use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Stub backend producing scripted detections.
///
/// Each `detect` call pops the next scripted result set; the call order is
/// the frame order, which makes per-frame fixtures deterministic. An
/// exhausted (or empty) script detects nothing.
pub struct StubBackend {
    script: VecDeque<Vec<Detection>>,
}

impl StubBackend {
    /// A backend that never detects anything.
    pub fn empty() -> Self {
        Self {
            script: VecDeque::new(),
        }
    }

    /// One entry per expected `detect` call, in call order.
    pub fn scripted(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::empty()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        threshold: f32,
    ) -> Result<Vec<Detection>> {
        let mut detections = self.script.pop_front().unwrap_or_default();
        detections.retain(|det| det.confidence >= threshold);
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(confidence: f32) -> Detection {
        Detection {
            class_label: "pothole".to_string(),
            confidence,
            cx: 8.0,
            cy: 8.0,
            width: 4.0,
            height: 4.0,
            rotation: 0.0,
        }
    }

    #[test]
    fn script_is_consumed_in_call_order() {
        let mut backend = StubBackend::scripted(vec![vec![], vec![det(0.9), det(0.8)]]);

        assert!(backend.detect(&[], 0, 0, 0.5).unwrap().is_empty());
        assert_eq!(backend.detect(&[], 0, 0, 0.5).unwrap().len(), 2);
        // Exhausted script detects nothing.
        assert!(backend.detect(&[], 0, 0, 0.5).unwrap().is_empty());
    }

    #[test]
    fn threshold_filters_scripted_boxes() {
        let mut backend = StubBackend::scripted(vec![vec![det(0.9), det(0.3)]]);
        let kept = backend.detect(&[], 0, 0, 0.5).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }
}
