use std::path::PathBuf;

/// Failure kinds surfaced by the pipelines.
///
/// These travel inside `anyhow::Error`; callers that need to branch on the
/// kind use `err.downcast_ref::<PipelineError>()`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Unsupported file format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("{format} extraction failed: {message}")]
    ExtractionFailure {
        format: &'static str,
        message: String,
    },

    #[error("No text could be extracted from the file.")]
    NoText,

    #[error("encoder not configured: {0}")]
    EncoderNotConfigured(String),

    #[error("encoder exited with {status}:\n{diagnostics}")]
    EncodingFailure { status: String, diagnostics: String },

    #[error("chunk translation failed after {attempts} attempt(s): {message}")]
    ChunkTranslationFailure { attempts: usize, message: String },

    #[error("output path has no file stem: {}", .0.display())]
    InvalidSourcePath(PathBuf),
}

impl PipelineError {
    pub fn extraction(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::ExtractionFailure {
            format,
            message: err.to_string(),
        }
    }
}
