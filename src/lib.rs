//! NHGIS Extract Library
//!
//! Retrieves NHGIS aggregate data extracts through the IPUMS API and
//! reconciles the source agency's table codes with NHGIS variable codes
//! using the codebook shipped with every extract.
//!
//! This library provides tools for:
//! - Parsing codebooks into source-code and variable-label crosswalks
//! - Deriving labelled numeric columns from text-typed extract data
//! - Submitting, polling and downloading extracts
//! - Unpacking table data packages and writing Parquet output

pub mod api;
pub mod archive;
pub mod codebook;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod materialize;
pub mod models;

// CLI modules
pub mod cli {
    pub mod args;
    pub mod commands;
}

// Re-export commonly used types
pub use codebook::{Crosswalk, ParseOptions, VariableMatch, parse_codebook};
pub use config::NhgisConfig;
pub use dataset::ExtractTable;
pub use error::{NhgisError, ResolutionFailure, Result};
pub use materialize::{Materialization, VariableRequest, materialize};
