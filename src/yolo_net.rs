use std::path::PathBuf;

use float_ord::FloatOrd;
use image::RgbImage;
use ndarray::Axis;
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    provider::{BoxError, HelmetClassifier, PlateLocator},
    util::{self, subtract_mean_normalize},
    BoundingBox, Detection, ExecutionProvider, HELMET_LABELS, PLATE_LABEL,
};

const INPUT_SIZE: u32 = 640;
const IOU_THRESHOLD: f32 = 0.45;

const MEAN_VALUES: [f32; 3] = [0.0, 0.0, 0.0];
const NORM_VALUES: [f32; 3] = [1.0, 1.0, 1.0];

/// Session wrapper for the single-image YOLO-family detectors. Both the
/// helmet classifier and the plate locator are models of this shape; they
/// differ only in their class labels.
pub struct YoloNet {
    session: Session,
    labels: Vec<String>,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(format!("images:1x3x{INPUT_SIZE}x{INPUT_SIZE}"))
        .with_profile_max_shapes(format!("images:1x3x{INPUT_SIZE}x{INPUT_SIZE}"))
        .with_profile_opt_shapes(format!("images:1x3x{INPUT_SIZE}x{INPUT_SIZE}"))
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .with_detailed_build_log(true)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

impl YoloNet {
    #[instrument(level = "debug", skip(labels))]
    pub fn init(
        path: PathBuf,
        labels: &[&str],
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> ort::Result<Self> {
        #[cfg(feature = "directml")]
        let parallel = execution_providers.contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        let parallel = true;

        let execution_providers = execution_providers.iter().filter_map(
            |provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "tensorrt")]
                    ExecutionProvider::TensorRT => Some(setup_tensorrt(
                        cache_path
                            .clone()
                            .unwrap_or_else(|| path.parent().unwrap().join(".cache")),
                    )),
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml()),
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                }
            },
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(path)?;

        log::debug!("YOLO inputs: {:?}", session.inputs);
        log::debug!("YOLO outputs: {:?}", session.outputs);

        Ok(Self {
            session,
            labels: labels.iter().map(|label| label.to_string()).collect(),
        })
    }

    /// Runs one frame through the detector. Output is `[1, 4+nc, anchors]`
    /// in letterbox coordinates; boxes are unmapped to frame coordinates,
    /// clipped, and suppressed down to confidence-descending survivors.
    #[instrument(level = "debug", skip(self, frame))]
    pub fn detect(&self, frame: &RgbImage, confidence_floor: f32) -> ort::Result<Vec<Detection>> {
        let lb = util::letterbox(frame.width(), frame.height(), INPUT_SIZE);
        let canvas = util::letterbox_image(frame, &lb, INPUT_SIZE);
        let input_values =
            subtract_mean_normalize(&canvas, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["images" => input_values]?)?;
        let pred_mat = outputs
            .first_key_value()
            .unwrap()
            .1
            .try_extract_tensor::<f32>()?;

        let channels = pred_mat.len_of(Axis(1));
        let anchors = pred_mat.len_of(Axis(2));

        let pred_data = pred_mat.to_owned().remove_axis(Axis(0));
        let pred_data = pred_data.to_shape((channels, anchors)).unwrap();

        let mut detections = Vec::new();
        for anchor in pred_data.columns() {
            let (class_index, confidence) = anchor
                .iter()
                .skip(4)
                .enumerate()
                .max_by_key(|(_, score)| FloatOrd(**score))
                .map(|(i, score)| (i, *score))
                .unwrap();
            if confidence < confidence_floor {
                continue;
            }

            let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
            let x1 = (cx - w / 2.0 - lb.pad_x) / lb.scale;
            let y1 = (cy - h / 2.0 - lb.pad_y) / lb.scale;
            let x2 = (cx + w / 2.0 - lb.pad_x) / lb.scale;
            let y2 = (cy + h / 2.0 - lb.pad_y) / lb.scale;

            detections.push(Detection {
                label: self.labels[class_index].clone(),
                confidence,
                bounds: BoundingBox::from_model_output(
                    x1,
                    y1,
                    x2,
                    y2,
                    frame.width(),
                    frame.height(),
                ),
            });
        }

        Ok(non_max_suppression(detections, IOU_THRESHOLD))
    }
}

#[instrument(level = "trace", skip(detections))]
fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by_key(|detection| std::cmp::Reverse(FloatOrd(detection.confidence)));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep
            .iter()
            .all(|kept| kept.bounds.iou(&candidate.bounds) < iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

/// Helmet classifier backed by a two-class YOLO model.
pub struct HelmetNet {
    net: YoloNet,
    confidence_floor: f32,
}

impl HelmetNet {
    pub fn init(
        path: PathBuf,
        confidence_floor: f32,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> ort::Result<Self> {
        Ok(Self {
            net: YoloNet::init(
                path,
                &HELMET_LABELS,
                num_threads,
                execution_providers,
                cache_path,
            )?,
            confidence_floor,
        })
    }
}

impl HelmetClassifier for HelmetNet {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, BoxError> {
        self.net
            .detect(frame, self.confidence_floor)
            .map_err(Into::into)
    }
}

/// Plate locator backed by a single-class YOLO model.
pub struct PlateNet {
    net: YoloNet,
}

impl PlateNet {
    pub fn init(
        path: PathBuf,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> ort::Result<Self> {
        Ok(Self {
            net: YoloNet::init(
                path,
                &[PLATE_LABEL],
                num_threads,
                execution_providers,
                cache_path,
            )?,
        })
    }
}

impl PlateLocator for PlateNet {
    fn locate(
        &self,
        frame: &RgbImage,
        confidence_floor: f32,
    ) -> Result<Vec<Detection>, BoxError> {
        self.net.detect(frame, confidence_floor).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(confidence: f32, bounds: BoundingBox) -> Detection {
        Detection {
            label: PLATE_LABEL.to_string(),
            confidence,
            bounds,
        }
    }

    #[test]
    fn suppression_keeps_highest_confidence_overlap() {
        let detections = vec![
            detection(0.6, BoundingBox::new(12, 12, 52, 52)),
            detection(0.9, BoundingBox::new(10, 10, 50, 50)),
            detection(0.8, BoundingBox::new(200, 200, 240, 240)),
        ];

        let kept = non_max_suppression(detections, IOU_THRESHOLD);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.8);
    }

    #[test]
    fn suppression_output_is_confidence_descending() {
        let detections = vec![
            detection(0.2, BoundingBox::new(0, 0, 10, 10)),
            detection(0.7, BoundingBox::new(100, 100, 120, 120)),
            detection(0.5, BoundingBox::new(300, 0, 320, 20)),
        ];

        let kept = non_max_suppression(detections, IOU_THRESHOLD);

        let scores = kept.iter().map(|d| d.confidence).collect::<Vec<_>>();
        assert_eq!(scores, vec![0.7, 0.5, 0.2]);
    }
}
