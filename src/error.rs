use std::path::PathBuf;

use thiserror::Error;

use crate::provider::BoxError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Uploaded bytes could not be decoded into a frame. Terminal for the
    /// request, never retried.
    #[error("failed to decode image bytes: {0}")]
    InputDecode(#[from] image::ImageError),

    /// A capability provider could not be initialized. Fatal at startup;
    /// the pipeline refuses to run rather than degrade silently.
    #[error("model could not be initialized: {0}")]
    ModelUnavailable(#[source] ort::Error),

    /// The label font configured for evidence rendering could not be loaded.
    #[error("failed to load label font {}: {source}", path.display())]
    FontLoad {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// The classifier or locator failed during an evaluation. Reader
    /// failures are recovered inside the pipeline and never surface here.
    #[error("capability provider failed: {0}")]
    Provider(#[source] BoxError),
}
