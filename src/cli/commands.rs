//! Command implementations for the NHGIS extract CLI
//!
//! This module contains the command execution logic, progress reporting,
//! and the printed summaries of each subcommand.

use anyhow::{Context, Result};
use crate::cli::args::{
    Args, CodebookArgs, Commands, CommonArgs, DeriveArgs, FetchArgs, OutputArgs,
};
use crate::codebook::{Crosswalk, parse_codebook_file};
use crate::config::NhgisConfig;
use crate::constants::default_output_name;
use crate::error::NhgisError;
use crate::extract::{
    LoadedExtract, OutputFiles, fetch_extract, load_extract, load_extract_dir, write_derived,
};
use crate::materialize::MaterializeReport;
use crate::models::{ExtractFiles, ExtractInfo, ExtractRequest};
use colored::*;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Run statistics for reporting
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Extract number, when an extract was fetched
    pub extract_number: Option<u64>,
    /// Number of tables paired in the codebook
    pub tables_in_codebook: usize,
    /// Number of variables derived
    pub variables_created: usize,
    /// Number of variable requests that could not be resolved
    pub variables_unresolved: usize,
    /// Files written
    pub output: Option<OutputFiles>,
    /// Total run time
    pub processing_time: Duration,
}

impl RunStats {
    /// Format a size in bytes in human-readable form
    pub fn format_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", bytes, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }
}

/// Main command runner
pub async fn run(args: Args) -> Result<RunStats> {
    let Some(command) = args.command else {
        return Err(NhgisError::configuration("No command given").into());
    };

    setup_logging(command.common());
    debug!("Command line arguments: {:?}", command);

    let start_time = Instant::now();
    let mut stats = match &command {
        Commands::Fetch(fetch) => run_fetch(fetch).await?,
        Commands::Derive(derive) => run_derive(derive).await?,
        Commands::Codebook(codebook) => run_codebook(codebook)?,
    };
    stats.processing_time = start_time.elapsed();

    if command.common().show_progress() && !matches!(command, Commands::Codebook(_)) {
        print_summary(&stats);
    }

    Ok(stats)
}

/// Set up structured logging based on CLI arguments
fn setup_logging(common: &CommonArgs) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = common.get_log_level();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nhgis_extract={}", log_level)));

    if common.quiet {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    debug!("Logging initialized at level: {}", log_level);
}

/// Load configuration using the layered approach (file -> env -> args)
fn load_configuration(common: &CommonArgs, output: Option<&OutputArgs>) -> Result<NhgisConfig> {
    let mut config = NhgisConfig::load_layered(common.config_file.as_deref())
        .context("Failed to load configuration")?;

    if common.strict_codebook {
        config = config.with_strict_codebook();
    }
    if let Some(compression) = output.and_then(|output| output.compression) {
        config = config.with_compression(compression);
    }

    Ok(config)
}

fn apply_fetch_overrides(mut config: NhgisConfig, args: &FetchArgs) -> NhgisConfig {
    if let Some(api_key) = &args.api_key {
        config = config.with_api_key(api_key.trim());
    }
    if let Some(dir) = &args.download_dir {
        config = config.with_download_dir(dir);
    }
    if let Some(secs) = args.poll_interval {
        config = config.with_poll_interval(secs);
    }
    if let Some(secs) = args.wait_timeout {
        config = config.with_wait_timeout(secs);
    }
    config
}

/// Build the extract request described by the fetch arguments
fn build_request(args: &FetchArgs) -> ExtractRequest {
    let request = ExtractRequest::new(
        args.dataset.trim(),
        args.tables.tables.clone(),
        args.geog.trim(),
    );
    match args.year {
        Some(year) => request.with_acs_description(year),
        None => request,
    }
}

async fn run_fetch(args: &FetchArgs) -> Result<RunStats> {
    args.validate()?;

    let config = apply_fetch_overrides(load_configuration(&args.common, Some(&args.output))?, args);
    config.validate()?;
    config.require_api_key()?;

    let request = build_request(args);
    request.validate()?;
    info!("Submitting extract: {}", request.description);

    let spinner = args.common.show_progress().then(|| create_spinner("Submitting extract..."));
    let on_status = |extract: &ExtractInfo| {
        if let Some(pb) = &spinner {
            pb.set_message(format!("Extract {}: {}", extract.number, extract.status));
        }
    };

    let result = fetch_extract(&config, &request, on_status)
        .await
        .with_context(|| format!("Failed to fetch extract '{}'", request.description));
    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    let mut loaded = result?;

    let output = args
        .output
        .output
        .clone()
        .unwrap_or_else(|| config.download_dir.join(default_output_name(args.year, args.geog.trim())));

    derive_and_write(&mut loaded, &args.output, &output, &config)
}

async fn run_derive(args: &DeriveArgs) -> Result<RunStats> {
    args.validate()?;

    let config = load_configuration(&args.common, Some(&args.output))?;
    let options = config.parse_options();

    let mut loaded = match (&args.dir, &args.codebook, &args.csv) {
        (Some(dir), _, _) => load_extract_dir(dir, options)
            .with_context(|| format!("Failed to load extract from {}", dir.display()))?,
        (None, Some(codebook), Some(csv)) => load_extract(
            ExtractFiles {
                data_csv: csv.clone(),
                codebook: codebook.clone(),
                unpacked: Vec::new(),
            },
            options,
        )
        .with_context(|| format!("Failed to load extract {}", csv.display()))?,
        _ => {
            return Err(NhgisError::configuration(
                "Either --dir or both --codebook and --csv must be given",
            )
            .into());
        }
    };

    let output = args
        .output
        .output
        .clone()
        .unwrap_or_else(|| derived_output_path(&loaded.files.data_csv));

    derive_and_write(&mut loaded, &args.output, &output, &config)
}

/// Default output next to the data file, e.g. `nhgis0001_state_derived.parquet`
fn derived_output_path(data_csv: &Path) -> PathBuf {
    let stem = data_csv
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "nhgis".to_string());
    data_csv.with_file_name(format!("{}_derived.parquet", stem))
}

fn derive_and_write(
    loaded: &mut LoadedExtract,
    output_args: &OutputArgs,
    output: &Path,
    config: &NhgisConfig,
) -> Result<RunStats> {
    let mut stats = RunStats {
        extract_number: loaded.number,
        tables_in_codebook: loaded.crosswalk.table_count(),
        ..RunStats::default()
    };

    if output_args.variables.is_empty() {
        info!("No variables requested, nothing to derive");
        return Ok(stats);
    }

    let report = loaded.derive(&output_args.variables)?;
    stats.variables_created = report.created.len();
    stats.variables_unresolved = report.unresolved.len();
    print_report(loaded, &report, output_args.dry_run);

    if report.created.is_empty() {
        warn!("No variables could be derived, no output written");
        return Ok(stats);
    }

    if output_args.dry_run {
        info!("Dry run, would write {}", output.display());
        return Ok(stats);
    }

    let files = write_derived(
        &loaded.table,
        &report.created,
        output,
        config.compression.to_polars_compression(),
    )
    .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Wrote {} and {}", files.data.display(), files.labels.display());
    stats.output = Some(files);

    Ok(stats)
}

fn run_codebook(args: &CodebookArgs) -> Result<RunStats> {
    let config = load_configuration(&args.common, None)?;
    let crosswalk = parse_codebook_file(&args.path, config.parse_options())
        .with_context(|| format!("Failed to read codebook {}", args.path.display()))?;

    let filter = args.tables.as_ref().map(|list| list.tables.as_slice());
    print_crosswalk(&crosswalk, filter, args.detailed);

    Ok(RunStats {
        tables_in_codebook: crosswalk.table_count(),
        ..RunStats::default()
    })
}

/// Create a spinner for the extract wait
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Print the source codes, NHGIS codes and optionally variable labels
fn print_crosswalk(crosswalk: &Crosswalk, tables: Option<&[String]>, detailed: bool) {
    let wanted = |source: &str| tables.is_none_or(|tables| tables.iter().any(|t| t == source));

    println!("{}", "Codebook crosswalk".bold());
    for (source, archive) in &crosswalk.source_to_archive {
        if !wanted(source) {
            continue;
        }

        let variable_count = crosswalk.variables(archive).map_or(0, |vars| vars.len());
        println!(
            "  {} -> {} ({} variables)",
            source.cyan(),
            archive.green(),
            variable_count
        );

        if detailed {
            if let Some(vars) = crosswalk.variables(archive) {
                for (suffix, label) in vars {
                    println!("      {}{}  {}", archive, suffix.yellow(), label);
                }
            }
        }
    }

    if let Some(tables) = tables {
        for missing in tables
            .iter()
            .filter(|t| !crosswalk.source_to_archive.contains_key(t.as_str()))
        {
            println!("  {} {}", missing.cyan(), "not in codebook".red());
        }
    }

    println!(
        "{} tables, {} variables",
        crosswalk.table_count(),
        crosswalk.variable_count()
    );
}

/// Print the derived variables with their labels and any failures
fn print_report(loaded: &LoadedExtract, report: &MaterializeReport, dry_run: bool) {
    let heading = if dry_run {
        "Derived variables (dry run)"
    } else {
        "Derived variables"
    };
    println!("{}", heading.bold());

    for column in &report.created {
        let label = loaded.table.label(column).unwrap_or("(no label)");
        println!("  {} {}  {}", "✓".green(), column, label.dimmed());
    }
    for (request, failure) in &report.unresolved {
        println!("  {} {}  {}", "✗".red(), request, failure.to_string().red());
    }
}

fn print_summary(stats: &RunStats) {
    println!();
    println!("{}", "NHGIS extract complete".green().bold());
    if let Some(number) = stats.extract_number {
        println!("  Extract number: {}", number);
    }
    println!("  Tables in codebook: {}", stats.tables_in_codebook);
    println!("  Variables derived: {}", stats.variables_created);
    if stats.variables_unresolved > 0 {
        println!(
            "  {} {}",
            "Unresolved variables:".yellow(),
            stats.variables_unresolved
        );
    }
    if let Some(output) = &stats.output {
        println!(
            "  Output: {} ({})",
            output.data.display(),
            RunStats::format_size(output.data_bytes)
        );
        println!("  Labels: {}", output.labels.display());
    }
    println!("  Time: {}", HumanDuration(stats.processing_time));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::TableList;
    use crate::config::CompressionAlgorithm;
    use crate::materialize::VariableRequest;
    use std::fs;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn fetch_args() -> FetchArgs {
        FetchArgs {
            dataset: "2018_2022_ACS5a".to_string(),
            geog: "county".to_string(),
            tables: TableList::from_str("B01002,B03002").unwrap(),
            year: Some(2023),
            api_key: Some(" secret ".to_string()),
            download_dir: Some(PathBuf::from("/tmp/nhgis")),
            poll_interval: Some(5),
            wait_timeout: None,
            output: OutputArgs::default(),
            common: CommonArgs::default(),
        }
    }

    fn write_extract(dir: &Path) {
        fs::write(
            dir.join("nhgis0007_ds262_20225_county_codebook.txt"),
            "Source code: B01002\nNHGIS code: AQM5\n    AQM5E001:    Median age: Total\n",
        )
        .unwrap();
        fs::write(
            dir.join("nhgis0007_ds262_20225_county.csv"),
            "GISJOIN,AQM5E001\nG0100010,39.2\nG0100030,n/a\n",
        )
        .unwrap();
    }

    #[test]
    fn test_format_size() {
        assert_eq!(RunStats::format_size(0), "0 B");
        assert_eq!(RunStats::format_size(512), "512 B");
        assert_eq!(RunStats::format_size(1536), "1.50 KB");
        assert_eq!(RunStats::format_size(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_build_request() {
        let request = build_request(&fetch_args());

        assert_eq!(request.description, "ACS 2023 5yr county file");
        let selection = &request.datasets["2018_2022_ACS5a"];
        assert_eq!(selection.data_tables, vec!["B01002", "B03002"]);
        assert_eq!(selection.geog_levels, vec!["county"]);
    }

    #[test]
    fn test_fetch_overrides() {
        let config = apply_fetch_overrides(NhgisConfig::default(), &fetch_args());

        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.download_dir, PathBuf::from("/tmp/nhgis"));
        assert_eq!(config.poll_interval_secs, 5);
    }

    #[test]
    fn test_load_configuration_applies_output_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "compression = \"zstd\"\n").unwrap();

        let common = CommonArgs {
            config_file: Some(config_path),
            strict_codebook: true,
            ..CommonArgs::default()
        };
        let output = OutputArgs {
            compression: Some(CompressionAlgorithm::Lz4),
            ..OutputArgs::default()
        };

        let config = load_configuration(&common, Some(&output)).unwrap();
        assert_eq!(config.compression, CompressionAlgorithm::Lz4);
        assert!(config.parse_options() == crate::codebook::ParseOptions::strict());

        let config = load_configuration(&common, None).unwrap();
        assert_eq!(config.compression, CompressionAlgorithm::Zstd);
    }

    #[test]
    fn test_derived_output_path() {
        assert_eq!(
            derived_output_path(Path::new("/data/nhgis0007_county.csv")),
            PathBuf::from("/data/nhgis0007_county_derived.parquet")
        );
    }

    #[tokio::test]
    async fn test_run_derive_writes_output() {
        let temp_dir = TempDir::new().unwrap();
        write_extract(temp_dir.path());
        let output = temp_dir.path().join("out").join("acs2023_5yr_county.parquet");

        let args = DeriveArgs {
            dir: Some(temp_dir.path().to_path_buf()),
            codebook: None,
            csv: None,
            output: OutputArgs {
                variables: vec![
                    VariableRequest::new("medage", "B01002", "E001"),
                    VariableRequest::new("pop", "B03002", "E001"),
                ],
                output: Some(output.clone()),
                ..OutputArgs::default()
            },
            common: CommonArgs {
                quiet: true,
                ..CommonArgs::default()
            },
        };

        let stats = run_derive(&args).await.unwrap();
        assert_eq!(stats.tables_in_codebook, 1);
        assert_eq!(stats.variables_created, 1);
        assert_eq!(stats.variables_unresolved, 1);

        let files = stats.output.unwrap();
        assert_eq!(files.data, output);
        assert!(output.exists());
        assert!(files.labels.exists());
    }

    #[tokio::test]
    async fn test_run_derive_dry_run_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        write_extract(temp_dir.path());

        let args = DeriveArgs {
            dir: None,
            codebook: Some(temp_dir.path().join("nhgis0007_ds262_20225_county_codebook.txt")),
            csv: Some(temp_dir.path().join("nhgis0007_ds262_20225_county.csv")),
            output: OutputArgs {
                variables: vec![VariableRequest::new("medage", "B01002", "E001")],
                dry_run: true,
                ..OutputArgs::default()
            },
            common: CommonArgs::default(),
        };

        let stats = run_derive(&args).await.unwrap();
        assert_eq!(stats.variables_created, 1);
        assert!(stats.output.is_none());
        assert!(
            !temp_dir
                .path()
                .join("nhgis0007_ds262_20225_county_derived.parquet")
                .exists()
        );
    }

    #[test]
    fn test_run_codebook() {
        let temp_dir = TempDir::new().unwrap();
        write_extract(temp_dir.path());

        let args = CodebookArgs {
            path: temp_dir.path().join("nhgis0007_ds262_20225_county_codebook.txt"),
            tables: Some(TableList::from_str("B01002,B99999").unwrap()),
            detailed: true,
            common: CommonArgs::default(),
        };

        let stats = run_codebook(&args).unwrap();
        assert_eq!(stats.tables_in_codebook, 1);
    }
}
