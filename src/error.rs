//! Error handling for extract retrieval and variable derivation.
//!
//! Hard failures (I/O, HTTP, archive, dataframe) propagate as
//! [`NhgisError`]. Variables that cannot be resolved against a codebook
//! are not errors of this kind; they are reported as [`ResolutionFailure`]
//! values so the caller can log and continue.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NhgisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ZIP archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Extract archive {path} contains no {kind} file")]
    MissingExtractFile { path: PathBuf, kind: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Unexpected API response: {message}")]
    ApiResponse { message: String },

    #[error("Extract {number} finished with status '{status}'")]
    ExtractFailed { number: u64, status: String },

    #[error("Extract {number} not completed after {waited_secs}s")]
    ExtractTimeout { number: u64, waited_secs: u64 },

    #[error("Processing interrupted: {reason}")]
    ProcessingInterrupted { reason: String },
}

impl NhgisError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an API response error
    pub fn api_response(message: impl Into<String>) -> Self {
        Self::ApiResponse {
            message: message.into(),
        }
    }

    /// Create a processing interrupted error
    pub fn processing_interrupted(reason: impl Into<String>) -> Self {
        Self::ProcessingInterrupted {
            reason: reason.into(),
        }
    }
}

/// A requested variable that could not be located in the extract.
///
/// Recoverable: the dataset is left untouched and the caller decides
/// whether to treat it as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    #[error("Could not find source code {source_code}")]
    UnknownSourceCode { source_code: String },

    #[error("Could not find column {column}")]
    MissingColumn { column: String },
}

pub type Result<T> = std::result::Result<T, NhgisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_failure_messages() {
        let missing_source = ResolutionFailure::UnknownSourceCode {
            source_code: "B99999".to_string(),
        };
        assert_eq!(
            missing_source.to_string(),
            "Could not find source code B99999"
        );

        let missing_column = ResolutionFailure::MissingColumn {
            column: "AQM5E009".to_string(),
        };
        assert_eq!(missing_column.to_string(), "Could not find column AQM5E009");
    }

    #[test]
    fn test_extract_error_messages() {
        let failed = NhgisError::ExtractFailed {
            number: 12,
            status: "canceled".to_string(),
        };
        assert_eq!(failed.to_string(), "Extract 12 finished with status 'canceled'");

        let config = NhgisError::configuration("Missing required parameters: api_key");
        assert!(config.to_string().contains("api_key"));
    }
}
