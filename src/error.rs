//! Crate-wide error type used at the orchestrator/CLI boundary.
//!
//! Each module (`provider`, `tags`, `epub`, `srt`, `job`) owns its own
//! `thiserror` enum for the failure kinds it can produce. [`DoctranError`]
//! only exists to give the binary and the job orchestrator a single type to
//! report through `anyhow`; library callers that need module-specific detail
//! should match on the module error types directly instead of this one.

use thiserror::Error;

use crate::epub::EpubError;
use crate::provider::ProviderError;
use crate::srt::SrtError;

/// Top-level error returned at the orchestrator/CLI boundary.
#[derive(Debug, Error)]
pub enum DoctranError {
    /// The configured LLM provider failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// EPUB parsing, splicing, or repackaging failed.
    #[error("epub error: {0}")]
    Epub(#[from] EpubError),

    /// SRT parsing or reconstruction failed.
    #[error("srt error: {0}")]
    Srt(#[from] SrtError),

    /// The job referenced by a caller does not exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// An I/O operation failed outside of a more specific module error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
