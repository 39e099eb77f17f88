//! Error types for the fund ledger orchestrator

use crate::extraction::values::CellError;
use crate::models::RowDiagnostic;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for ledger and query operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {

    // =============================
    // Extraction Errors
    // =============================

    /// Row-level, recoverable: the row is skipped and extraction continues.
    #[error("Row {row_index} rejected: {source}")]
    RowParsing {
        row_index: usize,
        #[source]
        source: CellError,
    },

    /// Table-level, recoverable: the table is flagged for manual review.
    #[error("Table classification ambiguous: {0}")]
    TableClassificationAmbiguous(String),

    #[error("Document {document_id} extraction failed: {reason}")]
    DocumentExtractionFailed {
        document_id: Uuid,
        reason: String,
        diagnostics: Vec<RowDiagnostic>,
    },

    #[error("Invalid ledger entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid document status transition: {0}")]
    InvalidStatusTransition(String),

    // =============================
    // Query Errors (user visible)
    // =============================

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Division undefined: {0}")]
    DivisionUndefined(String),

    #[error("IRR undefined: {0}")]
    IrrUndefined(String),

    #[error("No known metric found in query: {0}")]
    UnknownMetric(String),

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("No answer available: {0}")]
    NoAnswerAvailable(String),

    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    // =============================
    // Collaborators & Storage
    // =============================

    #[error("{service} is unavailable ({reason}), please try again")]
    UpstreamUnavailable { service: String, reason: String },

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl LedgerError {
    /// Errors that describe the question or the ledger rather than a system fault.
    /// They are returned to the user as a message, never as a crash.
    pub fn is_query_level(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientData(_)
                | LedgerError::DivisionUndefined(_)
                | LedgerError::IrrUndefined(_)
                | LedgerError::UnknownMetric(_)
                | LedgerError::UnsupportedFilter(_)
                | LedgerError::NoAnswerAvailable(_)
                | LedgerError::ArithmeticOverflow(_)
        )
    }

    pub fn upstream(service: impl Into<String>, reason: impl Into<String>) -> Self {
        LedgerError::UpstreamUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }
}
