use thiserror::Error;

/// Fatal and recoverable failures of a translation run.
///
/// Parse, translation, write and size errors abort the run. `BlockDraw` is only ever
/// logged by the reconstructor; it is part of the enum so writers can report it
/// in the same vocabulary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read document: {0:#}")]
    DocumentParse(anyhow::Error),

    #[error("translation failed for chunk {index}/{total}: {cause:#}")]
    ChunkTranslation {
        index: usize,
        total: usize,
        cause: anyhow::Error,
    },

    #[error("failed to write translated document: {0:#}")]
    DocumentWrite(anyhow::Error),

    #[error("could not draw block '{text}': {reason}")]
    BlockDraw { text: String, reason: String },

    #[error("file is too large: {size} bytes (maximum {limit} bytes)")]
    OversizeInput { size: u64, limit: u64 },

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::BlockDraw { .. })
    }
}
