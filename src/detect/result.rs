/// One oriented bounding box produced by a detector.
///
/// Coordinates are frame pixels; `rotation` is radians. Immutable once
/// produced; the annotator and the detection log consume the same value
/// independently.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_label: String,
    /// Model score in [0, 1].
    pub confidence: f32,
    /// Box center.
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
    /// Rotation in radians. Stored as-is in the log; converted to degrees
    /// only where a degree convention is required.
    pub rotation: f32,
}

impl Detection {
    /// The four corners of the rotated rectangle, in drawing order
    /// (a closed polygon follows 0 → 1 → 2 → 3 → 0).
    ///
    /// Degenerate boxes (zero width or height) collapse to a segment or a
    /// point; the geometry is still well defined.
    pub fn corners(&self) -> [(f32, f32); 4] {
        let (sin, cos) = self.rotation.sin_cos();
        let dx = self.width / 2.0;
        let dy = self.height / 2.0;
        let offsets = [(-dx, -dy), (dx, -dy), (dx, dy), (-dx, dy)];
        offsets.map(|(ox, oy)| {
            (
                self.cx + ox * cos - oy * sin,
                self.cy + ox * sin + oy * cos,
            )
        })
    }

    /// `rotation * 180 / π`, for drawing routines that speak degrees.
    pub fn rotation_degrees(&self) -> f32 {
        self.rotation.to_degrees()
    }

    /// Label text rendered next to the box.
    pub fn label_text(&self) -> String {
        format!("{} {:.2}", self.class_label, self.confidence)
    }
}
