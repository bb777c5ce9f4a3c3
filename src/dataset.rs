//! Tabular extract data with per-column labels.
//!
//! [`ExtractTable`] wraps a polars `DataFrame` loaded from an NHGIS table
//! data file. Every column is read as text so that numeric conversion
//! happens explicitly when a variable is derived. Column descriptions are
//! kept in a side-table keyed by column name instead of on the column
//! data, so labels never affect the values or equality of a column.

use crate::codebook::VariableLabel;
use crate::constants::LABEL_ATTRIBUTE;
use crate::error::{NhgisError, Result};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extract data plus the labels of derived columns
#[derive(Debug, Clone)]
pub struct ExtractTable {
    frame: DataFrame,
    labels: BTreeMap<String, VariableLabel>,
}

impl ExtractTable {
    /// Wrap an existing frame; no labels are attached
    pub fn from_frame(frame: DataFrame) -> Self {
        Self {
            frame,
            labels: BTreeMap::new(),
        }
    }

    /// Load an extract CSV with every column typed as text
    pub fn read_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(NhgisError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;

        debug!(
            "Loaded {}: {} rows x {} columns",
            path.display(),
            frame.height(),
            frame.width()
        );

        Ok(Self::from_frame(frame))
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.get_column_index(name).is_some()
    }

    /// Label attached to a column, if any
    pub fn label(&self, column: &str) -> Option<&str> {
        self.labels.get(column).map(String::as_str)
    }

    /// All column labels
    pub fn labels(&self) -> &BTreeMap<String, VariableLabel> {
        &self.labels
    }

    /// Attach a label to an existing column; returns false if the column is absent
    pub fn set_label(&mut self, column: &str, label: impl Into<VariableLabel>) -> bool {
        if !self.has_column(column) {
            return false;
        }
        self.labels.insert(column.to_string(), label.into());
        true
    }

    pub fn clear_label(&mut self, column: &str) -> Option<VariableLabel> {
        self.labels.remove(column)
    }

    /// Add or replace a column, keeping row alignment
    pub(crate) fn put_column(&mut self, series: Series) -> Result<()> {
        self.frame.with_column(series)?;
        Ok(())
    }

    /// A new table with only the named columns and their labels
    pub fn select(&self, columns: &[String]) -> Result<Self> {
        let frame = self.frame.select(columns.iter().map(String::as_str))?;
        let labels = self
            .labels
            .iter()
            .filter(|(column, _)| columns.contains(column))
            .map(|(column, label)| (column.clone(), label.clone()))
            .collect();

        Ok(Self { frame, labels })
    }

    /// Write the data to a Parquet file; returns the file size in bytes
    pub fn write_parquet(&self, path: &Path, compression: ParquetCompression) -> Result<u64> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut frame = self.frame.clone();
        let file = File::create(path)?;
        let size = ParquetWriter::new(file)
            .with_compression(compression)
            .finish(&mut frame)?;

        info!("Wrote {} rows to {}", frame.height(), path.display());
        Ok(size)
    }

    /// Write the label side-table as a `column,label` CSV file
    pub fn write_labels(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let columns: Vec<&str> = self.labels.keys().map(String::as_str).collect();
        let labels: Vec<&str> = self.labels.values().map(String::as_str).collect();
        let mut frame = DataFrame::new(vec![
            Column::new("column".into(), columns),
            Column::new(LABEL_ATTRIBUTE.into(), labels),
        ])?;

        let file = File::create(path)?;
        CsvWriter::new(file)
            .include_header(true)
            .finish(&mut frame)?;

        debug!("Wrote {} labels to {}", frame.height(), path.display());
        Ok(())
    }
}

/// Path of the label file written next to a data output file
pub fn labels_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{}_labels.csv", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn sample_table() -> ExtractTable {
        let frame = df!(
            "GISJOIN" => ["G010", "G020"],
            "AQM5E001" => ["30.2", "41.0"]
        )
        .unwrap();
        ExtractTable::from_frame(frame)
    }

    #[test]
    fn test_read_csv_keeps_text_types() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "GISJOIN,STATEA,AQM5E001\nG010,01,39.2\nG020,02,35.0\n").unwrap();

        let table = ExtractTable::read_csv(file.path()).unwrap();

        assert_eq!(table.height(), 2);
        assert_eq!(table.width(), 3);
        let states = table.frame().column("STATEA").unwrap();
        assert_eq!(states.dtype(), &DataType::String);
        // Leading zeros survive because nothing is inferred as numeric
        assert_eq!(
            states.as_materialized_series().str().unwrap().get(0),
            Some("01")
        );
    }

    #[test]
    fn test_read_csv_missing_file() {
        let result = ExtractTable::read_csv(Path::new("/nonexistent/extract.csv"));
        assert!(matches!(result, Err(NhgisError::FileNotFound { .. })));
    }

    #[test]
    fn test_labels_only_attach_to_existing_columns() {
        let mut table = sample_table();

        assert!(table.set_label("AQM5E001", "Median age: Total"));
        assert!(!table.set_label("MISSING", "Nothing"));
        assert_eq!(table.label("AQM5E001"), Some("Median age: Total"));
        assert_eq!(table.label("MISSING"), None);
        assert_eq!(table.labels().len(), 1);

        assert_eq!(table.clear_label("AQM5E001"), Some("Median age: Total".to_string()));
        assert!(table.labels().is_empty());
    }

    #[test]
    fn test_select_keeps_matching_labels() {
        let mut table = sample_table();
        table.set_label("AQM5E001", "Median age: Total");
        table.set_label("GISJOIN", "GIS Join Match Code");

        let selected = table.select(&["AQM5E001".to_string()]).unwrap();

        assert_eq!(selected.column_names(), vec!["AQM5E001".to_string()]);
        assert_eq!(selected.labels().len(), 1);
        assert_eq!(selected.label("AQM5E001"), Some("Median age: Total"));
    }

    #[test]
    fn test_select_unknown_column_fails() {
        let table = sample_table();
        assert!(table.select(&["NOPE".to_string()]).is_err());
    }

    #[test]
    fn test_write_parquet_and_labels() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out").join("acs2023_5yr_state.parquet");
        let mut table = sample_table();
        table.set_label("AQM5E001", "Median age: Total");

        let size = table
            .write_parquet(&output, ParquetCompression::Snappy)
            .unwrap();
        assert!(size > 0);
        assert!(output.exists());

        let labels_path = labels_path_for(&output);
        table.write_labels(&labels_path).unwrap();
        let contents = std::fs::read_to_string(&labels_path).unwrap();
        assert!(contents.starts_with("column,label"));
        assert!(contents.contains("AQM5E001,Median age: Total"));
    }

    #[test]
    fn test_labels_path_for() {
        assert_eq!(
            labels_path_for(Path::new("/data/acs2023_5yr_state.parquet")),
            PathBuf::from("/data/acs2023_5yr_state_labels.csv")
        );
    }
}
