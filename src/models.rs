//! Core data structures for extract requests and results.
//!
//! Request and response bodies of the IPUMS aggregate data extract API,
//! extract status values, and the files unpacked from a table data
//! package.

use crate::constants::api::{COLLECTION, DATA_FORMAT};
use crate::error::{NhgisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Tables and geographic levels requested from one NHGIS dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSelection {
    pub data_tables: Vec<String>,
    pub geog_levels: Vec<String>,
}

/// Body of an extract submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub description: String,
    pub datasets: BTreeMap<String, DatasetSelection>,
    pub data_format: String,
    pub breakdown_and_data_type_layout: String,
}

impl ExtractRequest {
    /// Request tables from a single dataset at one geographic level
    pub fn new(dataset: impl Into<String>, tables: Vec<String>, geog: impl Into<String>) -> Self {
        let dataset = dataset.into();
        let geog = geog.into();
        let description = format!("{} {} file", dataset, geog);

        let mut datasets = BTreeMap::new();
        datasets.insert(
            dataset,
            DatasetSelection {
                data_tables: tables,
                geog_levels: vec![geog],
            },
        );

        Self {
            description,
            datasets,
            data_format: DATA_FORMAT.to_string(),
            breakdown_and_data_type_layout: "single_file".to_string(),
        }
    }

    /// Describe the extract the way ACS five-year files are usually named
    pub fn with_acs_description(mut self, year: u32) -> Self {
        let geog = self
            .datasets
            .values()
            .flat_map(|selection| selection.geog_levels.iter())
            .next()
            .cloned()
            .unwrap_or_default();
        self.description = format!("ACS {} 5yr {} file", year, geog);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn collection(&self) -> &'static str {
        COLLECTION
    }

    /// Reject requests with missing dataset, tables or geography
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.datasets.is_empty() || self.datasets.keys().any(|name| name.trim().is_empty()) {
            missing.push("dataset");
        }
        for selection in self.datasets.values() {
            if selection.geog_levels.iter().all(|geog| geog.trim().is_empty()) {
                missing.push("geog");
            }
            if selection.data_tables.iter().all(|table| table.trim().is_empty()) {
                missing.push("tables");
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            missing.dedup();
            Err(NhgisError::configuration(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Extract lifecycle states reported by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractStatus {
    Queued,
    Started,
    Produced,
    Completed,
    Failed,
    Canceled,
    Other(String),
}

impl ExtractStatus {
    /// No further status changes are expected
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExtractStatus::Completed | ExtractStatus::Failed | ExtractStatus::Canceled
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExtractStatus::Failed | ExtractStatus::Canceled)
    }
}

impl From<&str> for ExtractStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "queued" => ExtractStatus::Queued,
            "started" => ExtractStatus::Started,
            "produced" => ExtractStatus::Produced,
            "completed" => ExtractStatus::Completed,
            "failed" => ExtractStatus::Failed,
            "canceled" | "cancelled" => ExtractStatus::Canceled,
            _ => ExtractStatus::Other(value.to_string()),
        }
    }
}

impl fmt::Display for ExtractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExtractStatus::Queued => "queued",
            ExtractStatus::Started => "started",
            ExtractStatus::Produced => "produced",
            ExtractStatus::Completed => "completed",
            ExtractStatus::Failed => "failed",
            ExtractStatus::Canceled => "canceled",
            ExtractStatus::Other(other) => other.as_str(),
        };
        f.write_str(text)
    }
}

/// A downloadable file of a finished extract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub url: String,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLinks {
    #[serde(default)]
    pub table_data: Option<DownloadLink>,
    #[serde(default)]
    pub codebook_preview: Option<DownloadLink>,
    #[serde(default)]
    pub gis_data: Option<DownloadLink>,
}

/// Extract record as returned by submission and status calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractInfo {
    pub number: u64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub download_links: Option<DownloadLinks>,
}

impl ExtractInfo {
    pub fn status(&self) -> ExtractStatus {
        ExtractStatus::from(self.status.as_str())
    }

    pub fn table_data_url(&self) -> Option<&str> {
        self.download_links
            .as_ref()
            .and_then(|links| links.table_data.as_ref())
            .map(|link| link.url.as_str())
    }
}

/// Files unpacked from a table data package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractFiles {
    /// Table data file
    pub data_csv: PathBuf,
    /// Codebook accompanying the table data
    pub codebook: PathBuf,
    /// Every file written while unpacking
    pub unpacked: Vec<PathBuf>,
}
