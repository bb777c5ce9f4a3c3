//! Command-line argument definitions for the NHGIS extract tool
//!
//! This module defines the complete CLI interface using the clap derive API.

use crate::config::CompressionAlgorithm;
use crate::constants::api::API_KEY_ENV;
use crate::error::{NhgisError, Result};
use crate::materialize::VariableRequest;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

/// CLI arguments for the NHGIS extract tool
///
/// Fetches NHGIS aggregate data extracts and derives labelled numeric
/// variables using the codebook that accompanies each extract.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nhgis-extract",
    version,
    about = "Fetch NHGIS aggregate data extracts and derive labelled variables",
    long_about = "Submits NHGIS extract requests through the IPUMS API, downloads and unpacks \
                  the table data, and derives numeric variables named by their source table \
                  code and suffix (e.g. medage=B01002:E001). Variable labels are taken from \
                  the extract's codebook."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Submit an extract, wait for it, download it and derive variables
    Fetch(FetchArgs),
    /// Derive variables from an extract downloaded earlier
    Derive(DeriveArgs),
    /// Show the source code and variable crosswalk of a codebook
    Codebook(CodebookArgs),
}

/// Options shared by every subcommand
#[derive(Debug, Clone, Default, ClapArgs)]
pub struct CommonArgs {
    /// Path to configuration file
    ///
    /// TOML configuration file. If not specified, looks for
    /// ~/.config/nhgis-extract/config.toml
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    pub config_file: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help = "Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)"
    )]
    pub verbose: u8,

    /// Only show errors
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Suppress output except errors",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Require variable lines to be the NHGIS code plus an alphanumeric suffix
    #[arg(
        long = "strict-codebook",
        help = "Only accept codebook variable lines of the form <NHGIS code><suffix>:"
    )]
    pub strict_codebook: bool,
}

impl CommonArgs {
    /// Determine the appropriate log level based on verbosity flags
    pub fn get_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        }
    }

    /// Check if we should show progress output (not in quiet mode)
    pub fn show_progress(&self) -> bool {
        !self.quiet
    }
}

/// Arguments for the fetch command
#[derive(Debug, Clone, Parser)]
pub struct FetchArgs {
    /// NHGIS dataset name
    #[arg(
        short = 'd',
        long = "dataset",
        value_name = "NAME",
        help = "NHGIS dataset name (e.g. 2018_2022_ACS5a)"
    )]
    pub dataset: String,

    /// Geographic level
    #[arg(
        short = 'g',
        long = "geog",
        value_name = "LEVEL",
        help = "Geographic level (e.g. state, county, tract)"
    )]
    pub geog: String,

    /// Source table codes to include (comma-separated list)
    #[arg(
        short = 't',
        long = "tables",
        value_name = "LIST",
        help = "Comma-separated list of source table codes (e.g. B01002,B03002)"
    )]
    pub tables: TableList,

    /// Data year, used for the extract description and output name
    #[arg(long = "year", value_name = "YEAR")]
    pub year: Option<u32>,

    /// IPUMS API key
    #[arg(
        long = "api-key",
        value_name = "KEY",
        help = "IPUMS API key (defaults to the IPUMS_API_KEY environment variable)"
    )]
    pub api_key: Option<String>,

    /// Directory receiving the downloaded extract
    #[arg(long = "download-dir", value_name = "PATH")]
    pub download_dir: Option<PathBuf>,

    /// Seconds between extract status checks
    #[arg(long = "poll-interval", value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Seconds to wait for the extract before giving up
    #[arg(long = "wait-timeout", value_name = "SECS")]
    pub wait_timeout: Option<u64>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Arguments for the derive command
#[derive(Debug, Clone, Parser)]
pub struct DeriveArgs {
    /// Directory holding an unpacked extract (nhgis*.csv and nhgis*.txt)
    #[arg(
        long = "dir",
        value_name = "PATH",
        conflicts_with_all = ["codebook", "csv"]
    )]
    pub dir: Option<PathBuf>,

    /// Codebook file of the extract
    #[arg(long = "codebook", value_name = "FILE", requires = "csv")]
    pub codebook: Option<PathBuf>,

    /// Table data CSV of the extract
    #[arg(long = "csv", value_name = "FILE", requires = "codebook")]
    pub csv: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Arguments for the codebook command
#[derive(Debug, Clone, Parser)]
pub struct CodebookArgs {
    /// Codebook file to inspect
    #[arg(value_name = "FILE")]
    pub path: PathBuf,

    /// Only show these source table codes (comma-separated list)
    #[arg(short = 't', long = "tables", value_name = "LIST")]
    pub tables: Option<TableList>,

    /// List every variable with its label
    #[arg(long = "detailed")]
    pub detailed: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Variables to derive and where to write them
#[derive(Debug, Clone, Default, ClapArgs)]
pub struct OutputArgs {
    /// Variable to derive, may be repeated
    #[arg(
        long = "var",
        value_name = "NAME=SOURCE:SUFFIX",
        value_parser = parse_variable,
        help = "Variable to derive, e.g. medage=B01002:E001 (repeatable)"
    )]
    pub variables: Vec<VariableRequest>,

    /// Output Parquet file for the derived variables
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Parquet compression algorithm
    #[arg(long = "compression", value_enum)]
    pub compression: Option<CompressionAlgorithm>,

    /// Derive and report without writing files
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

fn parse_variable(s: &str) -> std::result::Result<VariableRequest, String> {
    VariableRequest::from_str(s).map_err(|e| e.to_string())
}

/// Wrapper for parsing comma-separated table code lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableList {
    pub tables: Vec<String>,
}

impl FromStr for TableList {
    type Err = NhgisError;

    fn from_str(s: &str) -> Result<Self> {
        let tables: Vec<String> = s
            .split(',')
            .map(|s| s.trim().trim_matches('\'').trim_matches('"').to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if tables.is_empty() {
            return Err(NhgisError::configuration(
                "Table list cannot be empty".to_string(),
            ));
        }

        Ok(TableList { tables })
    }
}

impl Args {
    /// Get the command if one was specified
    pub fn get_command(&self) -> Option<&Commands> {
        self.command.as_ref()
    }
}

impl Commands {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Commands::Fetch(args) => &args.common,
            Commands::Derive(args) => &args.common,
            Commands::Codebook(args) => &args.common,
        }
    }
}

impl FetchArgs {
    /// Validate the fetch command arguments for consistency
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.dataset.trim().is_empty() {
            missing.push("dataset");
        }
        if self.geog.trim().is_empty() {
            missing.push("geog");
        }
        if !missing.is_empty() {
            return Err(NhgisError::configuration(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            )));
        }

        if let Some(key) = &self.api_key {
            if key.trim().is_empty() {
                return Err(NhgisError::configuration(format!(
                    "--api-key must not be empty (or set {})",
                    API_KEY_ENV
                )));
            }
        }

        validate_config_file(&self.common)
    }
}

impl DeriveArgs {
    /// Validate the derive command arguments for consistency
    pub fn validate(&self) -> Result<()> {
        if self.dir.is_none() && (self.codebook.is_none() || self.csv.is_none()) {
            return Err(NhgisError::configuration(
                "Either --dir or both --codebook and --csv must be given".to_string(),
            ));
        }

        if self.output.variables.is_empty() {
            return Err(NhgisError::configuration(
                "At least one --var NAME=SOURCE:SUFFIX is required".to_string(),
            ));
        }

        validate_config_file(&self.common)
    }
}

fn validate_config_file(common: &CommonArgs) -> Result<()> {
    if let Some(config_file) = &common.config_file {
        if !config_file.exists() {
            return Err(NhgisError::configuration(format!(
                "Config file does not exist: {}",
                config_file.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_table_list_parsing() {
        let result = TableList::from_str("B01002").unwrap();
        assert_eq!(result.tables, vec!["B01002"]);

        let result = TableList::from_str(" B01002 , 'B03002' ").unwrap();
        assert_eq!(result.tables, vec!["B01002", "B03002"]);

        assert!(TableList::from_str("").is_err());
        assert!(TableList::from_str(",,,").is_err());
    }

    #[test]
    fn test_fetch_command_parsing() {
        let args = Args::try_parse_from([
            "nhgis-extract",
            "fetch",
            "--dataset",
            "2018_2022_ACS5a",
            "--geog",
            "state",
            "--tables",
            "B01002,B03002",
            "--year",
            "2023",
            "--var",
            "medage=B01002:E001",
            "--var",
            "pop=B03002:E001",
            "-vv",
        ])
        .unwrap();

        let Some(Commands::Fetch(fetch)) = args.get_command() else {
            panic!("expected fetch command");
        };
        assert_eq!(fetch.tables.tables, vec!["B01002", "B03002"]);
        assert_eq!(fetch.year, Some(2023));
        assert_eq!(fetch.output.variables.len(), 2);
        assert_eq!(fetch.output.variables[0].source_code, "B01002");
        assert_eq!(fetch.common.get_log_level(), "debug");
        assert!(fetch.validate().is_ok());
    }

    #[test]
    fn test_invalid_variable_rejected() {
        let result = Args::try_parse_from([
            "nhgis-extract",
            "derive",
            "--dir",
            "/tmp",
            "--var",
            "medage",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_derive_args_validation() {
        let temp_dir = TempDir::new().unwrap();

        let args = DeriveArgs {
            dir: Some(temp_dir.path().to_path_buf()),
            codebook: None,
            csv: None,
            output: OutputArgs {
                variables: vec![VariableRequest::new("medage", "B01002", "E001")],
                ..OutputArgs::default()
            },
            common: CommonArgs::default(),
        };
        assert!(args.validate().is_ok());

        let no_vars = DeriveArgs {
            output: OutputArgs::default(),
            ..args.clone()
        };
        assert!(no_vars.validate().is_err());

        let no_source = DeriveArgs { dir: None, ..args.clone() };
        assert!(no_source.validate().is_err());

        let missing_config = DeriveArgs {
            common: CommonArgs {
                config_file: Some(temp_dir.path().join("missing.toml")),
                ..CommonArgs::default()
            },
            ..args
        };
        assert!(missing_config.validate().is_err());
    }

    #[test]
    fn test_log_levels() {
        let quiet = CommonArgs {
            quiet: true,
            ..CommonArgs::default()
        };
        assert_eq!(quiet.get_log_level(), "error");
        assert!(!quiet.show_progress());
        assert_eq!(CommonArgs::default().get_log_level(), "warn");
    }

    #[test]
    fn test_codebook_command_parsing() {
        let args =
            Args::try_parse_from(["nhgis-extract", "codebook", "codebook.txt", "--detailed"]).unwrap();

        let Some(Commands::Codebook(codebook)) = args.get_command() else {
            panic!("expected codebook command");
        };
        assert_eq!(codebook.path, PathBuf::from("codebook.txt"));
        assert!(codebook.detailed);
        assert!(codebook.tables.is_none());
    }
}
