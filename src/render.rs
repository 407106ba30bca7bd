use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};

use crate::BoundingBox;

/// Red marks the helmet-violation box, green the plate box. Downstream
/// review tooling keys on these colors.
pub const VIOLATION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const PLATE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: f32 = 24.0;
const LABEL_OFFSET: u32 = 26;

/// Draws audit annotations onto the pipeline's writable frame copy. The
/// label font is optional; without one only the boxes are drawn.
pub struct EvidenceRenderer {
    font: Option<FontArc>,
}

impl EvidenceRenderer {
    pub fn new(font: Option<FontArc>) -> Self {
        if font.is_none() {
            log::debug!("No label font configured, evidence boxes will be drawn without text.");
        }
        Self { font }
    }

    /// Draws a hollow box with an optional label above it. Mutates only the
    /// designated annotated copy; degenerate boxes are skipped.
    pub fn draw_box(&self, frame: &mut RgbImage, bounds: &BoundingBox, color: Rgb<u8>, label: &str) {
        if bounds.width() == 0 || bounds.height() == 0 {
            log::trace!("Skipping degenerate evidence box {bounds:?}");
            return;
        }

        for inset in 0..BOX_THICKNESS {
            let width = bounds.width().saturating_sub(inset * 2);
            let height = bounds.height().saturating_sub(inset * 2);
            if width == 0 || height == 0 {
                break;
            }
            let rect = Rect::at((bounds.x1 + inset) as i32, (bounds.y1 + inset) as i32)
                .of_size(width, height);
            draw_hollow_rect_mut(frame, rect, color);
        }

        if let Some(font) = &self.font {
            let y = bounds.y1.saturating_sub(LABEL_OFFSET);
            draw_text_mut(
                frame,
                color,
                bounds.x1 as i32,
                y as i32,
                PxScale::from(LABEL_SCALE),
                font,
                label,
            );
        }
    }
}
