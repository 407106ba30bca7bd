use image::RgbImage;

/// Axis-aligned rectangle in frame pixel coordinates, `x1 <= x2`, `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Builds a box from raw model output, clipping to the frame extent.
    /// Coordinates are half-open, so `x2`/`y2` may equal the frame size and
    /// a box touching the right or bottom edge keeps its last pixel line.
    pub fn from_model_output(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let clamp_x = |v: f32| (v.max(0.0) as u32).min(frame_width);
        let clamp_y = |v: f32| (v.max(0.0) as u32).min(frame_height);
        Self::new(clamp_x(x1), clamp_y(y1), clamp_x(x2), clamp_y(y2))
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Grows the box by `margin` pixels on every side, clamped to the frame
    /// extent. Never produces negative coordinates or exceeds the frame.
    pub fn expanded(&self, margin: u32, frame_width: u32, frame_height: u32) -> Self {
        Self {
            x1: self.x1.saturating_sub(margin),
            y1: self.y1.saturating_sub(margin),
            x2: (self.x2 + margin).min(frame_width),
            y2: (self.y2 + margin).min(frame_height),
        }
    }

    pub fn iou(&self, other: &Self) -> f32 {
        let ix1 = self.x1.max(other.x1) as f32;
        let iy1 = self.y1.max(other.y1) as f32;
        let ix2 = self.x2.min(other.x2) as f32;
        let iy2 = self.y2.min(other.y2) as f32;
        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let area_a = self.width() as f32 * self.height() as f32;
        let area_b = other.width() as f32 * other.height() as f32;
        let union = area_a + area_b - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// A labeled box with confidence from an object detector.
#[derive(Debug, Clone)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bounds: BoundingBox,
}

/// One text span produced by the reader on a plate crop.
#[derive(Debug, Clone)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f32,
}

/// Evidence attached to a detected violation. `plate_text` only exists here,
/// so a plate read implies a violation by construction.
#[derive(Debug, Clone)]
pub struct ViolationEvidence {
    pub violation_type: String,
    pub plate_text: Option<String>,
}

/// Outcome of one pipeline run.
#[derive(Debug)]
pub struct Verdict {
    violation: Option<ViolationEvidence>,
    annotated_frame: RgbImage,
}

impl Verdict {
    pub(crate) fn clean(annotated_frame: RgbImage) -> Self {
        Self {
            violation: None,
            annotated_frame,
        }
    }

    pub(crate) fn violation(
        violation_type: String,
        plate_text: Option<String>,
        annotated_frame: RgbImage,
    ) -> Self {
        Self {
            violation: Some(ViolationEvidence {
                violation_type,
                plate_text,
            }),
            annotated_frame,
        }
    }

    pub fn violation_detected(&self) -> bool {
        self.violation.is_some()
    }

    pub fn violation_type(&self) -> Option<&str> {
        self.violation.as_ref().map(|v| v.violation_type.as_str())
    }

    pub fn plate_text(&self) -> Option<&str> {
        self.violation
            .as_ref()
            .and_then(|v| v.plate_text.as_deref())
    }

    pub fn evidence(&self) -> Option<&ViolationEvidence> {
        self.violation.as_ref()
    }

    pub fn annotated_frame(&self) -> &RgbImage {
        &self.annotated_frame
    }

    pub fn into_annotated_frame(self) -> RgbImage {
        self.annotated_frame
    }
}
