//! Application constants for the NHGIS extract tool
//!
//! Codebook markers, IPUMS API endpoints and default values used
//! throughout the crate.

// =============================================================================
// Codebook Format
// =============================================================================

/// Codebook markers and naming conventions
pub mod codebook {
    /// Line label introducing the source agency's table identifier
    pub const SOURCE_CODE_LABEL: &str = "Source code:";

    /// Line label introducing the archive's table identifier
    pub const NHGIS_CODE_LABEL: &str = "NHGIS code:";

    /// Separator between a variable code and its description
    pub const VARIABLE_SEPARATOR: char = ':';

    /// Characters a suffix may consist of when strict matching is enabled
    pub const STRICT_SUFFIX_PATTERN: &str = "[A-Za-z0-9]+";

    /// Extension of the codebook file inside an extract package
    pub const CODEBOOK_EXTENSION: &str = "txt";

    /// Extension of the table data file inside an extract package
    pub const DATA_EXTENSION: &str = "csv";
}

/// Attribute name under which a derived column's description is stored
pub const LABEL_ATTRIBUTE: &str = "label";

// =============================================================================
// IPUMS API
// =============================================================================

/// IPUMS extract API settings
pub mod api {
    /// Base URL of the IPUMS API
    pub const DEFAULT_BASE_URL: &str = "https://api.ipums.org";

    /// Data collection served by the aggregate data extract endpoint
    pub const COLLECTION: &str = "nhgis";

    /// API version requested on every call
    pub const API_VERSION: u32 = 2;

    /// Table data format requested for extracts (header row only)
    pub const DATA_FORMAT: &str = "csv_no_header";

    /// Environment variable consulted for the API key
    pub const API_KEY_ENV: &str = "IPUMS_API_KEY";

    /// Environment variable consulted for the download directory
    pub const DOWNLOAD_DIR_ENV: &str = "NHGIS_DOWNLOAD_DIR";
}

// =============================================================================
// Defaults
// =============================================================================

/// Seconds between extract status checks
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Give up waiting for an extract after this many seconds
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 60 * 60;

/// HTTP request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Application directory name under the user config directory
pub const APP_DIR_NAME: &str = "nhgis-extract";

/// Config file name inside the application config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// File name of the table data package for an extract number
pub fn table_data_zip_name(extract_number: u64) -> String {
    format!("nhgis{:04}_csv.zip", extract_number)
}

/// Default output file name, following the `acs{year}_5yr_{geog}` convention
pub fn default_output_name(year: Option<u32>, geog: &str) -> String {
    match year {
        Some(year) => format!("acs{}_5yr_{}.parquet", year, geog),
        None => format!("nhgis_{}.parquet", geog),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_data_zip_name_is_zero_padded() {
        assert_eq!(table_data_zip_name(1), "nhgis0001_csv.zip");
        assert_eq!(table_data_zip_name(12345), "nhgis12345_csv.zip");
    }

    #[test]
    fn test_default_output_name() {
        assert_eq!(default_output_name(Some(2023), "state"), "acs2023_5yr_state.parquet");
        assert_eq!(default_output_name(None, "county"), "nhgis_county.parquet");
    }
}
