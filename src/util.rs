use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use ndarray::Array3;
use tracing::instrument;
use uuid::Uuid;

/// Geometry of a letterboxed resize: the frame is scaled to fit the square
/// model input while preserving aspect ratio, then centered on padding.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
}

pub fn letterbox(width: u32, height: u32, target_size: u32) -> Letterbox {
    let scale = (target_size as f32 / width as f32).min(target_size as f32 / height as f32);
    let scaled_width = (width as f32 * scale) as u32;
    let scaled_height = (height as f32 * scale) as u32;
    let pad_x = (target_size - scaled_width) as f32 / 2.0;
    let pad_y = (target_size - scaled_height) as f32 / 2.0;
    log::debug!(
        "Letterbox will change image dimensions from (w: {width}, h: {height}) to (w: {scaled_width}, h: {scaled_height}) inside {target_size}x{target_size} with padding ({pad_x}, {pad_y})."
    );
    Letterbox {
        scale,
        pad_x,
        pad_y,
        scaled_width,
        scaled_height,
    }
}

/// Resizes a frame per the letterbox geometry onto a gray canvas ready for
/// model input.
pub(crate) fn letterbox_image(frame: &RgbImage, lb: &Letterbox, target_size: u32) -> RgbImage {
    let resized = imageops::resize(frame, lb.scaled_width, lb.scaled_height, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(target_size, target_size, Rgb([114, 114, 114]));
    imageops::replace(&mut canvas, &resized, lb.pad_x as i64, lb.pad_y as i64);
    canvas
}

#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &RgbImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| {
            let pixel = image.get_pixel(x as u32, y as u32).0[ch] as f32 / 255.0;
            pixel * norm_vals[ch] - mean_vals[ch] * norm_vals[ch]
        },
    )
}

/// Crops the frame to a box already clipped to frame bounds.
pub(crate) fn crop_frame(frame: &RgbImage, bounds: &crate::BoundingBox) -> RgbImage {
    log::trace!("Slicing plate crop to {bounds:?}");
    imageops::crop_imm(
        frame,
        bounds.x1,
        bounds.y1,
        bounds.width(),
        bounds.height(),
    )
    .to_image()
}

/// Canonicalizes a raw OCR read into a plate identifier: every
/// non-alphanumeric character is dropped and the remainder uppercased.
/// Idempotent.
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Suggests a unique evidence file name, honoring an extension hint from the
/// original upload when one is available.
pub fn evidence_file_name(extension_hint: Option<&str>) -> String {
    let extension = extension_hint
        .map(|ext| ext.trim_start_matches('.'))
        .filter(|ext| !ext.is_empty())
        .unwrap_or("jpg");
    format!("{}.{extension}", Uuid::new_v4())
}
