//! Error type shared by the library layers.
//!
//! The CLI wraps these in `anyhow` with context; library callers match on the
//! variants to tell per-file source failures apart from cancellation and
//! request validation.

use thiserror::Error;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The request failed validation before any I/O was attempted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("source '{id}' not found")]
    NotFound { id: String },

    #[error("i/o error on '{id}': {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("sheet '{sheet}' not found (available: {})", available.join(", "))]
    SheetNotFound {
        sheet: String,
        available: Vec<String>,
    },

    #[error("unknown encoding '{0}'")]
    UnknownEncoding(String),

    /// Raised by the merger when no file produced a schema.
    #[error("no files were parsed successfully; nothing to merge")]
    NoParsableFiles,

    #[error("operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("table '{db}.{table}' already exists")]
    TableExists { db: String, table: String },

    #[error("table '{db}.{table}' does not exist")]
    TableMissing { db: String, table: String },

    #[error("table store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn io(id: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return IngestError::NotFound { id: id.into() };
        }
        IngestError::Io {
            id: id.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled { .. })
    }

    /// Short machine-readable code used in streaming error frames.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::InvalidRequest(_) => "invalid_request",
            IngestError::NotFound { .. } => "not_found",
            IngestError::Io { .. } => "io",
            IngestError::Csv(_) => "format",
            IngestError::Spreadsheet(_) => "format",
            IngestError::SheetNotFound { .. } => "sheet_not_found",
            IngestError::UnknownEncoding(_) => "invalid_request",
            IngestError::NoParsableFiles => "no_parsable_files",
            IngestError::Cancelled { .. } => "cancelled",
            IngestError::TableExists { .. } => "table_exists",
            IngestError::TableMissing { .. } => "table_missing",
            IngestError::Store(_) => "store",
            IngestError::Config(_) => "config",
        }
    }
}
