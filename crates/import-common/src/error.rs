//! Error types for the import pipeline

use thiserror::Error;

/// Result type alias for import operations
pub type Result<T> = std::result::Result<T, ImportError>;

/// Main error type for the import pipeline
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested byte range starts at or beyond the end of the staged object.
    ///
    /// Chunk fetching treats this as the end of the stream, not as a failure.
    #[error("Range not satisfiable: {key} at offset {start}")]
    RangeNotSatisfiable { key: String, start: u64 },

    #[error("Source error: {0}")]
    Source(String),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Importer error: {0}")]
    Importer(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chunk fetcher closed before the request was answered")]
    FetcherClosed,

    #[error("Import aborted: {0}")]
    Aborted(String),
}

impl ImportError {
    pub fn is_range_not_satisfiable(&self) -> bool {
        matches!(self, ImportError::RangeNotSatisfiable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_not_satisfiable_is_detected() {
        let err = ImportError::RangeNotSatisfiable {
            key: "imports/a.csv".to_string(),
            start: 42,
        };
        assert!(err.is_range_not_satisfiable());
        assert_eq!(err.to_string(), "Range not satisfiable: imports/a.csv at offset 42");
        assert!(!ImportError::FetcherClosed.is_range_not_satisfiable());
    }
}
