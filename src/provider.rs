use image::RgbImage;

use crate::{Detection, RecognizedText};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Detects riders and whether they wear head protection. Labels come from
/// the closed set {"with-protection", "without-protection"}. Ordering of the
/// returned detections is provider-defined.
pub trait HelmetClassifier: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, BoxError>;
}

/// Locates license-plate candidates in a frame. Every returned detection is
/// labeled "plate"; the floor filters out candidates below that confidence.
pub trait PlateLocator: Send + Sync {
    fn locate(&self, frame: &RgbImage, confidence_floor: f32)
        -> Result<Vec<Detection>, BoxError>;
}

/// Reads text spans from a plate crop. Must tolerate degenerate crops
/// (zero or near-zero size) by returning no spans.
pub trait TextReader: Send + Sync {
    fn read(&self, crop: &RgbImage) -> Result<Vec<RecognizedText>, BoxError>;
}
