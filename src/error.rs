// src/error.rs

use thiserror::Error;

/// Failure taxonomy for the extraction pipeline.
///
/// Everything except `StoreCorruption` is local to one document: the
/// coordinator degrades to the next strategy and the batch moves on.
/// A corrupt vendor store is fatal: swallowing it would silently
/// mis-rename files.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No extractable text from any source (native layer or OCR).
    #[error("no extractable text: {0}")]
    Acquisition(String),

    /// Cloud extraction path not usable: missing credentials, service
    /// error, zero detected documents, or an incomplete result. Always
    /// recoverable; the coordinator falls through to the pattern engine.
    #[error("cloud extraction unavailable: {0}")]
    AdapterUnavailable(String),

    /// The pattern cascade resolved fewer than two of the three
    /// primary fields.
    #[error("extraction incomplete: {resolved}/3 fields resolved")]
    Incomplete { resolved: usize },

    /// The vendor knowledge store exists but cannot be deserialized.
    #[error("vendor store corrupted at {path}")]
    StoreCorruption {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the batch must abort instead of skipping this document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::StoreCorruption { .. })
    }
}
