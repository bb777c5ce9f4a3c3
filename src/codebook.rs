//! NHGIS codebook parsing and cross-reference building.
//!
//! A codebook is a flat text report in which every table is announced by a
//! `Source code:` line, paired with an `NHGIS code:` line, and followed by
//! a block of variable definitions scoped to that NHGIS code:
//!
//! ```text
//! Source code: B01002
//! NHGIS code:  AQM5
//!     AQM5E001:    Median age: Total
//!     AQM5M001:    Median age: Total
//! ```
//!
//! The parser is a single forward pass over the lines. It keeps the last
//! seen source and NHGIS codes as state and never looks ahead, so each
//! variable line is attributed to the NHGIS code declared most recently.
//! Lines it does not recognise are skipped; the parser never fails on
//! malformed text.

use crate::constants::codebook::{
    NHGIS_CODE_LABEL, SOURCE_CODE_LABEL, STRICT_SUFFIX_PATTERN, VARIABLE_SEPARATOR,
};
use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, trace};

/// Table identifier in the source agency's naming scheme (e.g. `B01002`)
pub type SourceCode = String;

/// Table identifier in the archive's naming scheme (e.g. `AQM5`)
pub type ArchiveCode = String;

/// Part of a physical column name following the archive code (e.g. `E001`)
pub type VariableSuffix = String;

/// Human-readable variable description, verbatim from the codebook
pub type VariableLabel = String;

pub type SourceToArchiveMap = BTreeMap<SourceCode, ArchiveCode>;
pub type ArchiveToVariablesMap = BTreeMap<ArchiveCode, BTreeMap<VariableSuffix, VariableLabel>>;

/// Both lookup tables derived from a single codebook
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Crosswalk {
    /// Source code -> NHGIS code, last pairing wins
    pub source_to_archive: SourceToArchiveMap,
    /// NHGIS code -> (suffix -> label)
    pub archive_to_vars: ArchiveToVariablesMap,
}

impl Crosswalk {
    /// NHGIS code paired with a source code
    pub fn archive_code(&self, source_code: &str) -> Option<&str> {
        self.source_to_archive.get(source_code).map(String::as_str)
    }

    /// Variables defined under an NHGIS code
    pub fn variables(&self, archive_code: &str) -> Option<&BTreeMap<VariableSuffix, VariableLabel>> {
        self.archive_to_vars.get(archive_code)
    }

    /// Label of a single variable
    pub fn label(&self, archive_code: &str, suffix: &str) -> Option<&str> {
        self.variables(archive_code)
            .and_then(|vars| vars.get(suffix))
            .map(String::as_str)
    }

    /// Physical column name for a source code and suffix.
    ///
    /// The column name is the NHGIS code immediately followed by the suffix,
    /// with no separator.
    pub fn column_name(&self, source_code: &str, suffix: &str) -> Option<String> {
        self.archive_code(source_code)
            .map(|archive| format!("{}{}", archive, suffix))
    }

    /// Number of paired tables
    pub fn table_count(&self) -> usize {
        self.source_to_archive.len()
    }

    /// Number of variable definitions across all NHGIS codes
    pub fn variable_count(&self) -> usize {
        self.archive_to_vars.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.source_to_archive.is_empty() && self.archive_to_vars.is_empty()
    }
}

/// How variable definition lines are recognised
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableMatch {
    /// Any line with a colon that starts with the current NHGIS code
    #[default]
    Prefix,
    /// The code before the colon must be the NHGIS code followed by an
    /// alphanumeric suffix
    Strict,
}

/// Codebook parsing options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    pub variable_match: VariableMatch,
}

impl ParseOptions {
    pub fn strict() -> Self {
        Self {
            variable_match: VariableMatch::Strict,
        }
    }
}

/// Parse codebook text with the default (prefix) variable matching
pub fn parse_codebook(text: &str) -> Crosswalk {
    parse_codebook_with(text, ParseOptions::default())
}

/// Parse codebook text
pub fn parse_codebook_with(text: &str, options: ParseOptions) -> Crosswalk {
    let (_, crosswalk) = text.lines().fold(
        (ScanState::new(options), Crosswalk::default()),
        |(mut state, mut crosswalk), line| {
            state.scan_line(line, &mut crosswalk);
            (state, crosswalk)
        },
    );

    debug!(
        "Parsed codebook: {} tables, {} NHGIS codes, {} variables",
        crosswalk.table_count(),
        crosswalk.archive_to_vars.len(),
        crosswalk.variable_count()
    );

    crosswalk
}

/// Read and parse a codebook file.
///
/// Read failures are returned as errors; the content itself never is.
pub fn parse_codebook_file(path: &Path, options: ParseOptions) -> Result<Crosswalk> {
    let text = std::fs::read_to_string(path)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    debug!("Parsing codebook {}", path.display());
    Ok(parse_codebook_with(text, options))
}

/// Parser state carried from one line to the next
struct ScanState {
    options: ParseOptions,
    current_source: Option<SourceCode>,
    current_archive: Option<ArchiveCode>,
    strict_pattern: Option<Regex>,
}

impl ScanState {
    fn new(options: ParseOptions) -> Self {
        Self {
            options,
            current_source: None,
            current_archive: None,
            strict_pattern: None,
        }
    }

    fn scan_line(&mut self, raw_line: &str, crosswalk: &mut Crosswalk) {
        let line = raw_line.trim();

        if line.starts_with(SOURCE_CODE_LABEL) {
            self.current_source = labelled_value(line);
        } else if line.starts_with(NHGIS_CODE_LABEL) {
            self.set_archive(labelled_value(line));

            if let Some(archive) = &self.current_archive {
                if let Some(source) = &self.current_source {
                    crosswalk
                        .source_to_archive
                        .insert(source.clone(), archive.clone());
                }
                // Keep variables already gathered under an earlier source
                crosswalk
                    .archive_to_vars
                    .entry(archive.clone())
                    .or_default();
            }
        } else if let Some(archive) = &self.current_archive {
            if let Some((suffix, label)) = self.variable_definition(archive, line) {
                trace!("{}{} -> {}", archive, suffix, label);
                crosswalk
                    .archive_to_vars
                    .entry(archive.clone())
                    .or_default()
                    .insert(suffix, label);
            }
        }
    }

    fn set_archive(&mut self, archive: Option<ArchiveCode>) {
        self.strict_pattern = match (&archive, self.options.variable_match) {
            (Some(code), VariableMatch::Strict) => Regex::new(&format!(
                "^{}{}$",
                regex::escape(code),
                STRICT_SUFFIX_PATTERN
            ))
            .ok(),
            _ => None,
        };
        self.current_archive = archive;
    }

    /// Split a variable line into (suffix, label)
    fn variable_definition(&self, archive: &str, line: &str) -> Option<(VariableSuffix, VariableLabel)> {
        if !line.starts_with(archive) {
            return None;
        }
        let (code, description) = line.split_once(VARIABLE_SEPARATOR)?;
        let code = code.trim();

        if self.options.variable_match == VariableMatch::Strict {
            let pattern = self.strict_pattern.as_ref()?;
            if !pattern.is_match(code) {
                return None;
            }
        }

        let suffix = code.strip_prefix(archive)?;
        Some((suffix.to_string(), description.trim().to_string()))
    }
}

/// Text after the first colon, trimmed; `None` when empty
fn labelled_value(line: &str) -> Option<String> {
    line.split_once(':')
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
