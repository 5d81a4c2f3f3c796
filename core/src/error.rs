use thiserror::Error;

/// Failures surfaced by the analysis pipeline.
///
/// Unsupported languages and grammar load failures are not represented here:
/// both degrade to "no segments" (or the regex fallback) without an error.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("tokenizer is not initialized")]
    NotInitialized,
    #[error("failed to initialize tokenizer: {0}")]
    Initialization(String),
    #[error("tokenization failed: {0}")]
    Tokenize(String),
    #[error("enrichment request failed: {0}")]
    Network(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
