use float_ord::FloatOrd;
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::{ArrayView2, Axis};
use ort::ExecutionProviderDispatch;
use ort::{inputs, GraphOptimizationLevel, Session};
use std::path::PathBuf;
use tracing::instrument;

use crate::{
    provider::{BoxError, TextReader},
    util::subtract_mean_normalize,
    ExecutionProvider, RecognizedText,
};

const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

/// CRNN-style plate recognizer. Decodes the session output with a CTC argmax
/// over the character keys loaded at init.
pub struct CrnnNet {
    session: Session,
    keys: Vec<String>,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes("x:1x3x48x1")
        .with_profile_max_shapes(format!("x:1x3x48x{}", u16::MAX))
        .with_profile_opt_shapes("x:1x3x48x256")
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

impl CrnnNet {
    #[instrument(level = "debug")]
    pub fn init(
        model_path: PathBuf,
        keys_path: PathBuf,
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
                    ExecutionProvider::TensorRT => {
                        Some(setup_tensorrt(cache_path.clone().unwrap_or_else(|| {
                            model_path.parent().unwrap().join(".cache")
                        })))
                    }
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
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(model_path)?;

        let keys =
            std::fs::read_to_string(&keys_path).map_err(|_| ort::Error::FileDoesNotExist {
                filename: keys_path,
            })?;
        let keys = keys.lines().map(|line| line.to_string());
        // Index 0 is the CTC blank, trailing entry is the space character.
        let keys = ["#".to_string()]
            .into_iter()
            .chain(keys)
            .chain([" ".to_string()]);

        log::debug!("CRNN Inputs: {:?}", session.inputs);
        log::debug!("CRNN Outputs: {:?}", session.outputs);

        let keys = keys.collect::<Vec<_>>();

        // The class axis of the recognizer output must line up with the keys
        // table, otherwise CTC decoding misreads every column. Dynamic
        // dimensions can only be checked at run time and are skipped here.
        let declared_classes = session.outputs.first().and_then(|output| {
            match &output.output_type {
                ort::ValueType::Tensor { dimensions, .. } => dimensions.last().copied(),
                _ => None,
            }
        });
        validate_key_count(declared_classes, keys.len())?;

        Ok(Self { session, keys })
    }

    #[instrument(level = "trace", skip(self, crop))]
    fn read_crop(&self, crop: &RgbImage) -> ort::Result<Vec<RecognizedText>> {
        if crop.width() == 0 || crop.height() == 0 {
            log::debug!("Plate crop is degenerate, skipping recognition.");
            return Ok(Vec::new());
        }

        let scale = DEST_HEIGHT as f32 / crop.height() as f32;
        let dest_width = (crop.width() as f32 * scale) as u32;
        let dest_width = dest_width.clamp(1, u16::MAX as u32);
        let crop = imageops::resize(crop, dest_width, DEST_HEIGHT, FilterType::Nearest);

        let tensor_values =
            subtract_mean_normalize(&crop, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => tensor_values]?)?;
        let output_tensor = outputs
            .first_key_value()
            .unwrap()
            .1
            .try_extract_tensor::<f32>()?;

        log::trace!("Output tensor size: {:?}", output_tensor.dim());
        let width = output_tensor.len_of(Axis(1));

        let output_tensor = output_tensor.remove_axis(Axis(0));
        let output = output_tensor.to_shape((width, self.keys.len())).unwrap();

        Ok(self.score_to_spans(output.view()))
    }

    #[instrument(level = "trace", skip(self, data))]
    fn score_to_spans(&self, data: ArrayView2<f32>) -> Vec<RecognizedText> {
        let keys_size = self.keys.len();

        let max_scores = data
            .outer_iter()
            .map(|it| {
                let (i, value) = it
                    .indexed_iter()
                    .max_by_key(|(_, value)| FloatOrd(**value))
                    .unwrap();
                (i, *value)
            })
            .filter(|(i, _)| *i > 0 && *i < keys_size)
            .map(|(i, score)| (self.keys[i].as_str(), score))
            .collect::<Vec<_>>();

        if max_scores.is_empty() {
            return Vec::new();
        }

        let text = max_scores.iter().map(|(text, _)| *text).collect::<String>();
        let confidence =
            max_scores.iter().map(|(_, score)| *score).sum::<f32>() / max_scores.len() as f32;

        vec![RecognizedText { text, confidence }]
    }
}

impl TextReader for CrnnNet {
    fn read(&self, crop: &RgbImage) -> Result<Vec<RecognizedText>, BoxError> {
        self.read_crop(crop).map_err(Into::into)
    }
}

fn validate_key_count(declared_classes: Option<i64>, keys_len: usize) -> ort::Result<()> {
    match declared_classes {
        Some(declared) if declared > 0 && declared as usize != keys_len => {
            Err(ort::Error::CustomError(
                format!(
                    "recognizer declares {declared} classes but the keys file provides {keys_len}"
                )
                .into(),
            ))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_count_mismatch_is_rejected() {
        assert!(validate_key_count(Some(6625), 97).is_err());
    }

    #[test]
    fn matching_key_count_passes() {
        assert!(validate_key_count(Some(97), 97).is_ok());
    }

    #[test]
    fn dynamic_class_dimension_is_skipped() {
        assert!(validate_key_count(Some(-1), 97).is_ok());
        assert!(validate_key_count(None, 97).is_ok());
    }
}
