//! Extract retrieval workflow.
//!
//! Submit → wait → download → unpack, then parse the codebook and load the
//! table data so variables can be derived. The codebook is parsed exactly
//! once per extract, before any variable is materialized.

use crate::api::IpumsClient;
use crate::archive::{locate_extract_files, unpack_extract};
use crate::codebook::{Crosswalk, ParseOptions, parse_codebook_file};
use crate::config::NhgisConfig;
use crate::dataset::{ExtractTable, labels_path_for};
use crate::error::{NhgisError, Result};
use crate::materialize::{MaterializeReport, VariableRequest, materialize_all};
use crate::models::{ExtractFiles, ExtractInfo, ExtractRequest};
use polars::prelude::ParquetCompression;
use std::path::{Path, PathBuf};
use tracing::info;

/// Codebook crosswalk and table data of one extract
#[derive(Debug, Clone)]
pub struct LoadedExtract {
    /// Extract number, when the extract was fetched in this run
    pub number: Option<u64>,
    pub files: ExtractFiles,
    pub crosswalk: Crosswalk,
    pub table: ExtractTable,
}

impl LoadedExtract {
    /// Derive the requested variables on the loaded table
    pub fn derive(&mut self, requests: &[VariableRequest]) -> Result<MaterializeReport> {
        materialize_all(&mut self.table, requests, &self.crosswalk)
    }
}

/// Files written for a set of derived variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    pub data: PathBuf,
    pub labels: PathBuf,
    pub data_bytes: u64,
}

/// Run the whole remote workflow for one extract request
pub async fn fetch_extract<S>(
    config: &NhgisConfig,
    request: &ExtractRequest,
    on_status: S,
) -> Result<LoadedExtract>
where
    S: FnMut(&ExtractInfo),
{
    request.validate()?;
    let client = IpumsClient::new(config)?;

    let submitted = client.submit_extract(request).await?;
    let finished = client.wait_for_extract(submitted.number, on_status).await?;
    let zip_path = client
        .download_table_data(&finished, &config.download_dir)
        .await?;

    let download_dir = config.download_dir.clone();
    let files = tokio::task::spawn_blocking(move || unpack_extract(&zip_path, &download_dir))
        .await
        .map_err(|e| NhgisError::Io(std::io::Error::other(e)))??;

    let mut loaded = load_extract(files, config.parse_options())?;
    loaded.number = Some(finished.number);
    Ok(loaded)
}

/// Parse the codebook and load the table data of unpacked extract files
pub fn load_extract(files: ExtractFiles, options: ParseOptions) -> Result<LoadedExtract> {
    let crosswalk = parse_codebook_file(&files.codebook, options)?;
    let table = ExtractTable::read_csv(&files.data_csv)?;

    info!(
        "Loaded extract {}: {} tables in codebook, {} rows",
        files.data_csv.display(),
        crosswalk.table_count(),
        table.height()
    );

    Ok(LoadedExtract {
        number: None,
        files,
        crosswalk,
        table,
    })
}

/// Load an extract that was unpacked into `dir` by an earlier run
pub fn load_extract_dir(dir: &Path, options: ParseOptions) -> Result<LoadedExtract> {
    load_extract(locate_extract_files(dir)?, options)
}

/// Write the derived columns and their labels next to each other
pub fn write_derived(
    table: &ExtractTable,
    columns: &[String],
    output: &Path,
    compression: ParquetCompression,
) -> Result<OutputFiles> {
    let derived = table.select(columns)?;
    let data_bytes = derived.write_parquet(output, compression)?;

    let labels = labels_path_for(output);
    derived.write_labels(&labels)?;

    Ok(OutputFiles {
        data: output.to_path_buf(),
        labels,
        data_bytes,
    })
}
