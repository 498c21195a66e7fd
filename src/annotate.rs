//! Overlay drawing.
//!
//! Draws each oriented detection onto the frame in place: a closed polygon
//! through the four rotated corners and a `"{class} {confidence:.2}"` label
//! above the box center. Geometry that falls outside the frame is clipped,
//! never an error, so degenerate boxes (zero extent, corners off-screen) are
//! safe to draw.

use image::{ImageBuffer, Rgb};
use imageproc::drawing::draw_line_segment_mut;

use crate::detect::Detection;
use crate::frame::Frame;

const GLYPH_SIZE: u32 = 8;
/// Vertical gap between the box center and the label baseline.
const LABEL_RAISE: i32 = 10;

/// Draws detection overlays. Stateless apart from styling.
#[derive(Clone, Debug)]
pub struct Annotator {
    pub box_color: [u8; 3],
    pub label_color: [u8; 3],
    /// Polygon stroke width in pixels.
    pub thickness: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            box_color: [0, 255, 0],
            label_color: [0, 255, 0],
            thickness: 2,
        }
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw one detection onto `frame`, mutating it in place.
    pub fn draw(&self, frame: &mut Frame, det: &Detection) {
        let corners = det.corners();
        self.draw_polygon(frame, &corners);

        let label = det.label_text();
        let x = det.cx as i32;
        let y = det.cy as i32 - LABEL_RAISE - GLYPH_SIZE as i32;
        self.draw_text(frame, &label, x, y);
    }

    fn draw_polygon(&self, frame: &mut Frame, corners: &[(f32, f32); 4]) {
        let (width, height) = (frame.width, frame.height);
        let Some(mut view) =
            ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(width, height, frame.data_mut())
        else {
            return;
        };

        for i in 0..4 {
            let start = corners[i];
            let end = corners[(i + 1) % 4];
            // Stroke width by repeated offset draws; line segments clip to
            // the image bounds on their own.
            for t in 0..self.thickness.max(1) {
                let offset = t as f32;
                draw_line_segment_mut(
                    &mut view,
                    (start.0 + offset, start.1),
                    (end.0 + offset, end.1),
                    Rgb(self.box_color),
                );
                draw_line_segment_mut(
                    &mut view,
                    (start.0, start.1 + offset),
                    (end.0, end.1 + offset),
                    Rgb(self.box_color),
                );
            }
        }
    }

    /// 8x8 bitmap glyphs; characters outside basic ASCII are skipped.
    fn draw_text(&self, frame: &mut Frame, text: &str, x: i32, y: i32) {
        let mut pen_x = x;
        for ch in text.chars() {
            let code = ch as usize;
            if code >= 128 {
                pen_x += GLYPH_SIZE as i32;
                continue;
            }
            let glyph = font8x8::legacy::BASIC_LEGACY[code];
            for (row, bits) in glyph.iter().enumerate() {
                for bit in 0..8 {
                    if (bits >> bit) & 1 == 1 {
                        let px = pen_x + bit as i32;
                        let py = y + row as i32;
                        if px >= 0 && py >= 0 {
                            frame.put_pixel(px as u32, py as u32, self.label_color);
                        }
                    }
                }
            }
            pen_x += GLYPH_SIZE as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(cx: f32, cy: f32, w: f32, h: f32) -> Detection {
        Detection {
            class_label: "crack".to_string(),
            confidence: 0.91,
            cx,
            cy,
            width: w,
            height: h,
            rotation: 0.6,
        }
    }

    #[test]
    fn draw_marks_pixels_inside_the_frame() {
        let mut frame = Frame::blank(0, 64, 48);
        Annotator::new().draw(&mut frame, &det(32.0, 30.0, 20.0, 10.0));
        assert!(frame.data().iter().any(|&b| b != 0));
    }

    #[test]
    fn degenerate_box_does_not_panic_or_resize() {
        let mut frame = Frame::blank(0, 64, 48);
        Annotator::new().draw(&mut frame, &det(32.0, 24.0, 0.0, 0.0));
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.data().len(), 64 * 48 * 3);
    }

    #[test]
    fn offscreen_box_is_clipped_silently() {
        let mut frame = Frame::blank(0, 32, 32);
        Annotator::new().draw(&mut frame, &det(-500.0, -500.0, 40.0, 40.0));
        Annotator::new().draw(&mut frame, &det(500.0, 500.0, 40.0, 40.0));
        assert_eq!((frame.width, frame.height), (32, 32));
    }
}
