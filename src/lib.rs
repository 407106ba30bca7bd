use std::path::PathBuf;

use ab_glyph::FontArc;
use crnn_net::CrnnNet;
use image::RgbImage;
use yolo_net::{HelmetNet, PlateNet};

pub mod crnn_net;
mod error;
pub mod provider;
pub mod render;
mod result;
pub mod util;
pub mod yolo_net;

pub use error::PipelineError;
pub use provider::{HelmetClassifier, PlateLocator, TextReader};
pub use render::EvidenceRenderer;
pub use result::*;
use tracing::instrument;

pub use ort as runtime;

/// Closed label set the helmet classifier draws from.
pub const WITH_PROTECTION_LABEL: &str = "with-protection";
pub const WITHOUT_PROTECTION_LABEL: &str = "without-protection";
pub const PLATE_LABEL: &str = "plate";

pub(crate) const HELMET_LABELS: [&str; 2] = [WITH_PROTECTION_LABEL, WITHOUT_PROTECTION_LABEL];

pub struct ViolationPipelineBuilder {
    threads: usize,
    helmet_path: Option<PathBuf>,
    plate_path: Option<PathBuf>,
    reader_paths: Option<(PathBuf, PathBuf)>,
    font_path: Option<PathBuf>,
    cache_path: Option<PathBuf>,
    options: PipelineOptions,
    execution_providers: Vec<ExecutionProvider>,
}

impl ViolationPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn helmet_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.helmet_path = Some(path.into());
        self
    }

    pub fn plate_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.plate_path = Some(path.into());
        self
    }

    pub fn reader_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.reader_paths = Some((model_path.into(), keys_path.into()));
        self
    }

    /// Font used for evidence labels. Without one, boxes are drawn bare.
    pub fn label_font(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_path = Some(path.into());
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self), level = "debug")]
    fn init_models(&mut self) -> ort::Result<(HelmetNet, PlateNet, CrnnNet)> {
        let helmet_path = self
            .helmet_path
            .take()
            .unwrap_or_else(|| "models/helmet_detector.onnx".into());
        let plate_path = self
            .plate_path
            .take()
            .unwrap_or_else(|| "models/license_plate_detector.onnx".into());
        let (reader_path, keys_path) = self
            .reader_paths
            .take()
            .unwrap_or_else(|| ("models/plate_rec.onnx".into(), "models/plate_keys.txt".into()));
        Ok((
            HelmetNet::init(
                helmet_path,
                self.options.helmet_confidence_floor,
                self.threads,
                &self.execution_providers,
                self.cache_path.clone(),
            )?,
            PlateNet::init(
                plate_path,
                self.threads,
                &self.execution_providers,
                self.cache_path.clone(),
            )?,
            CrnnNet::init(
                reader_path,
                keys_path,
                self.threads,
                &self.execution_providers,
                self.cache_path.clone(),
            )?,
        ))
    }

    /// Initializes all capability providers once. Any failure here is fatal;
    /// a pipeline is only handed out fully operational.
    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<ViolationPipeline, PipelineError> {
        let (helmet_net, plate_net, reader) = self
            .init_models()
            .map_err(PipelineError::ModelUnavailable)?;
        let font = match self.font_path.take() {
            Some(path) => {
                let data = std::fs::read(&path).map_err(|err| PipelineError::FontLoad {
                    path: path.clone(),
                    source: err.into(),
                })?;
                Some(
                    FontArc::try_from_vec(data).map_err(|err| PipelineError::FontLoad {
                        path,
                        source: err.into(),
                    })?,
                )
            }
            None => None,
        };
        Ok(ViolationPipeline::from_providers(
            Box::new(helmet_net),
            Box::new(plate_net),
            Box::new(reader),
            EvidenceRenderer::new(font),
            self.options,
        ))
    }
}

impl Default for ViolationPipelineBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            helmet_path: None,
            plate_path: None,
            reader_paths: None,
            font_path: None,
            cache_path: None,
            options: PipelineOptions::default(),
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

/// Policy knobs for one pipeline instance.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub helmet_confidence_floor: f32,
    /// Deliberately permissive: missing a real plate is worse than accepting
    /// a noisy candidate, normalization filters the noise downstream.
    pub plate_confidence_floor: f32,
    /// Pixels added on each side of the located plate box before cropping.
    pub plate_padding: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            helmet_confidence_floor: 0.25,
            plate_confidence_floor: 0.1,
            plate_padding: 5,
        }
    }
}

pub struct ViolationPipeline {
    classifier: Box<dyn HelmetClassifier>,
    locator: Box<dyn PlateLocator>,
    reader: Box<dyn TextReader>,
    renderer: EvidenceRenderer,
    options: PipelineOptions,
}

impl ViolationPipeline {
    /// Assembles a pipeline from already-initialized providers. This is the
    /// seam for scripted providers in tests.
    pub fn from_providers(
        classifier: Box<dyn HelmetClassifier>,
        locator: Box<dyn PlateLocator>,
        reader: Box<dyn TextReader>,
        renderer: EvidenceRenderer,
        options: PipelineOptions,
    ) -> Self {
        Self {
            classifier,
            locator,
            reader,
            renderer,
            options,
        }
    }

    /// Decodes uploaded bytes and evaluates the resulting frame. Decode
    /// failure is terminal.
    #[instrument(skip(self, bytes))]
    pub fn evaluate_bytes(&self, bytes: &[u8]) -> Result<Verdict, PipelineError> {
        let frame = image::load_from_memory(bytes)?.to_rgb8();
        self.evaluate(&frame)
    }

    /// Runs the full detection workflow on one frame. "No violation" and
    /// "violation with unreadable plate" are ordinary verdicts, not errors;
    /// the caller's frame is never mutated.
    #[instrument(skip(self, frame))]
    pub fn evaluate(&self, frame: &RgbImage) -> Result<Verdict, PipelineError> {
        let mut annotated = frame.clone();

        let detections = self
            .classifier
            .detect(frame)
            .map_err(PipelineError::Provider)?;
        // First match wins; later violations in the same frame are ignored
        // so each image yields at most one annotated violation.
        let Some(violation) = detections
            .iter()
            .find(|detection| detection.label == WITHOUT_PROTECTION_LABEL)
        else {
            log::debug!("No violations found in this frame.");
            return Ok(Verdict::clean(annotated));
        };

        self.renderer.draw_box(
            &mut annotated,
            &violation.bounds,
            render::VIOLATION_COLOR,
            &violation.label,
        );
        log::debug!(
            "Violation detected ({}), searching for license plate...",
            violation.label
        );

        let candidates = self
            .locator
            .locate(frame, self.options.plate_confidence_floor)
            .map_err(PipelineError::Provider)?;
        let Some(plate) = candidates.first() else {
            log::debug!("Violation found, but no plate candidate was located.");
            return Ok(Verdict::violation(violation.label.clone(), None, annotated));
        };

        let padded =
            plate
                .bounds
                .expanded(self.options.plate_padding, frame.width(), frame.height());
        let crop = util::crop_frame(frame, &padded);

        // The reader runs at most once per violation. A failure here is
        // recovered as "no plate read", never surfaced to the caller.
        let plate_text = match self.reader.read(&crop) {
            Ok(spans) => spans
                .first()
                .map(|span| util::normalize_plate(&span.text))
                .filter(|text| !text.is_empty()),
            Err(err) => {
                log::warn!("Text reader failed on plate crop: {err}");
                None
            }
        };

        match &plate_text {
            Some(text) => {
                self.renderer
                    .draw_box(&mut annotated, &padded, render::PLATE_COLOR, text);
                log::debug!("Plate found: {text}");
            }
            None => log::debug!("Violation found, but no license plate was read."),
        }

        Ok(Verdict::violation(
            violation.label.clone(),
            plate_text,
            annotated,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
