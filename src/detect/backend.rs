use anyhow::Result;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// Implementations must treat the pixel slice as read-only and ephemeral:
/// no retention beyond the call, no mutation of the frame. Box order is
/// stable within one call but undefined across calls; callers must not
/// assume any particular ordering.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB24 frame, keeping only boxes with
    /// `confidence >= threshold`.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        threshold: f32,
    ) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
