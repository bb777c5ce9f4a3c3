//! Derive labelled numeric variables from extract columns.
//!
//! A variable is requested by its source table code and suffix, e.g.
//! (`B01002`, `E001`). The codebook crosswalk resolves the source code to
//! an NHGIS code, the physical column is `AQM5E001`, and its text values are
//! converted to `f64` under the requested name.

use crate::codebook::{Crosswalk, SourceCode, VariableLabel, VariableSuffix};
use crate::dataset::ExtractTable;
use crate::error::{NhgisError, ResolutionFailure, Result};
use polars::prelude::*;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Outcome of deriving one variable
#[derive(Debug, Clone, PartialEq)]
pub enum Materialization {
    /// The column was created (or overwritten)
    Created {
        column: String,
        source_column: String,
        label: Option<VariableLabel>,
        missing: usize,
    },
    /// Nothing was changed
    Unresolved(ResolutionFailure),
}

impl Materialization {
    pub fn is_success(&self) -> bool {
        matches!(self, Materialization::Created { .. })
    }
}

/// Derive `new_column` from the column named by `source_code` + `suffix`.
///
/// Cells that do not parse as numbers become nulls. When the crosswalk
/// has a label for the variable it is attached to `new_column`; otherwise
/// any label left over from an earlier column of that name is removed.
/// Resolution failures leave the table untouched.
pub fn materialize(
    table: &mut ExtractTable,
    new_column: &str,
    source_code: &str,
    suffix: &str,
    crosswalk: &Crosswalk,
) -> Result<Materialization> {
    let Some(archive_code) = crosswalk.archive_code(source_code) else {
        let failure = ResolutionFailure::UnknownSourceCode {
            source_code: source_code.to_string(),
        };
        warn!("{}", failure);
        return Ok(Materialization::Unresolved(failure));
    };

    let source_column = format!("{}{}", archive_code, suffix);
    if !table.has_column(&source_column) {
        let failure = ResolutionFailure::MissingColumn {
            column: source_column,
        };
        warn!("{}", failure);
        return Ok(Materialization::Unresolved(failure));
    }

    let values = coerce_numeric(table.frame().column(&source_column)?, new_column)?;
    let missing = values.null_count();
    table.put_column(values.into_series())?;

    let label = crosswalk.label(archive_code, suffix).map(str::to_string);
    match &label {
        Some(label) => {
            table.set_label(new_column, label.as_str());
        }
        None => {
            table.clear_label(new_column);
        }
    }

    debug!(
        "Derived {} from {} ({} missing values)",
        new_column, source_column, missing
    );

    Ok(Materialization::Created {
        column: new_column.to_string(),
        source_column,
        label,
        missing,
    })
}

/// Convert a column's values to `f64`, one cell at a time
fn coerce_numeric(column: &Column, name: &str) -> Result<Float64Chunked> {
    let text = column.as_materialized_series().cast(&DataType::String)?;
    let values: Float64Chunked = text
        .str()?
        .into_iter()
        .map(|cell| cell.and_then(parse_numeric))
        .collect();

    Ok(values.with_name(name.into()))
}

/// NaN text counts as missing, like any other non-number
fn parse_numeric(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|value| !value.is_nan())
}

/// A variable to derive: `name=SOURCE:SUFFIX`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRequest {
    pub name: String,
    pub source_code: SourceCode,
    pub suffix: VariableSuffix,
}

impl VariableRequest {
    pub fn new(
        name: impl Into<String>,
        source_code: impl Into<SourceCode>,
        suffix: impl Into<VariableSuffix>,
    ) -> Self {
        Self {
            name: name.into(),
            source_code: source_code.into(),
            suffix: suffix.into(),
        }
    }
}

impl FromStr for VariableRequest {
    type Err = NhgisError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || {
            NhgisError::configuration(format!(
                "Invalid variable '{}', expected NAME=SOURCE:SUFFIX (e.g. medage=B01002:E001)",
                s
            ))
        };

        let (name, reference) = s.split_once('=').ok_or_else(invalid)?;
        let (source_code, suffix) = reference.split_once(':').ok_or_else(invalid)?;
        let (name, source_code, suffix) = (name.trim(), source_code.trim(), suffix.trim());

        if name.is_empty() || source_code.is_empty() || suffix.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(name, source_code, suffix))
    }
}

impl fmt::Display for VariableRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.name, self.source_code, self.suffix)
    }
}

/// Result of deriving a batch of variables
#[derive(Debug, Clone, Default)]
pub struct MaterializeReport {
    /// Derived column names in request order
    pub created: Vec<String>,
    /// Requests that could not be resolved
    pub unresolved: Vec<(VariableRequest, ResolutionFailure)>,
}

impl MaterializeReport {
    pub fn all_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Derive every requested variable; each request is independent
pub fn materialize_all(
    table: &mut ExtractTable,
    requests: &[VariableRequest],
    crosswalk: &Crosswalk,
) -> Result<MaterializeReport> {
    let mut report = MaterializeReport::default();

    for request in requests {
        match materialize(
            table,
            &request.name,
            &request.source_code,
            &request.suffix,
            crosswalk,
        )? {
            Materialization::Created { column, .. } => {
                if !report.created.contains(&column) {
                    report.created.push(column);
                }
            }
            Materialization::Unresolved(failure) => {
                report.unresolved.push((request.clone(), failure));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebook::parse_codebook;

    const CODEBOOK: &str = "\
Source code: B01002
NHGIS code: AQM5
AQM5E001:    Median age: Total
Source code: B03002
NHGIS code: AQYY
AQYYE001:    Total
";

    fn table_with(column: &str, values: &[&str]) -> ExtractTable {
        let frame = DataFrame::new(vec![
            Column::new("GISJOIN".into(), vec!["G"; values.len()]),
            Column::new(column.into(), values.to_vec()),
        ])
        .unwrap();
        ExtractTable::from_frame(frame)
    }

    fn f64_values(table: &ExtractTable, column: &str) -> Vec<Option<f64>> {
        table
            .frame()
            .column(column)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .collect()
    }

    #[test]
    fn test_end_to_end_median_age() {
        let crosswalk = parse_codebook(CODEBOOK);
        let mut table = table_with("AQM5E001", &["30.2", "41.0"]);

        let outcome = materialize(&mut table, "medage", "B01002", "E001", &crosswalk).unwrap();

        assert!(outcome.is_success());
        assert_eq!(f64_values(&table, "medage"), vec![Some(30.2), Some(41.0)]);
        assert_eq!(table.label("medage"), Some("Median age: Total"));
    }

    #[test]
    fn test_unknown_source_code_leaves_table_untouched() {
        let crosswalk = parse_codebook(CODEBOOK);
        let mut table = table_with("AQM5E001", &["30.2"]);
        let before = table.frame().clone();

        let outcome = materialize(&mut table, "x", "B99999", "E001", &crosswalk).unwrap();

        assert_eq!(
            outcome,
            Materialization::Unresolved(ResolutionFailure::UnknownSourceCode {
                source_code: "B99999".to_string()
            })
        );
        assert!(table.frame().equals_missing(&before));
        assert!(table.labels().is_empty());
    }

    #[test]
    fn test_missing_physical_column_leaves_table_untouched() {
        let crosswalk = parse_codebook(CODEBOOK);
        let mut table = table_with("AQM5E001", &["30.2"]);

        let outcome = materialize(&mut table, "x", "B01002", "E002", &crosswalk).unwrap();

        assert_eq!(
            outcome,
            Materialization::Unresolved(ResolutionFailure::MissingColumn {
                column: "AQM5E002".to_string()
            })
        );
        assert!(!table.has_column("x"));
        assert_eq!(table.width(), 2);
    }

    #[test]
    fn test_unparseable_cells_become_missing() {
        let crosswalk = parse_codebook(CODEBOOK);
        let mut table = table_with("AQM5E001", &["12.5", "abc", "7"]);

        let outcome = materialize(&mut table, "medage", "B01002", "E001", &crosswalk).unwrap();

        assert!(matches!(outcome, Materialization::Created { missing: 1, .. }));
        assert_eq!(f64_values(&table, "medage"), vec![Some(12.5), None, Some(7.0)]);
    }

    #[test]
    fn test_nan_cells_become_missing() {
        let crosswalk = parse_codebook(CODEBOOK);
        let mut table = table_with("AQM5E001", &["NaN", "nan", " NAN ", "1"]);

        let outcome = materialize(&mut table, "medage", "B01002", "E001", &crosswalk).unwrap();

        assert!(matches!(outcome, Materialization::Created { missing: 3, .. }));
        assert_eq!(
            f64_values(&table, "medage"),
            vec![None, None, None, Some(1.0)]
        );
    }

    #[test]
    fn test_whitespace_and_empty_cells() {
        let crosswalk = parse_codebook(CODEBOOK);
        let mut table = table_with("AQM5E001", &[" 3 ", "", "-1.5e2"]);

        materialize(&mut table, "medage", "B01002", "E001", &crosswalk).unwrap();

        assert_eq!(f64_values(&table, "medage"), vec![Some(3.0), None, Some(-150.0)]);
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let crosswalk = parse_codebook(CODEBOOK);
        let mut table = table_with("AQM5E001", &["30.2", "n/a"]);

        materialize(&mut table, "medage", "B01002", "E001", &crosswalk).unwrap();
        let first_frame = table.frame().clone();
        let first_labels = table.labels().clone();

        materialize(&mut table, "medage", "B01002", "E001", &crosswalk).unwrap();

        assert!(table.frame().equals_missing(&first_frame));
        assert_eq!(table.labels(), &first_labels);
        assert_eq!(table.width(), 3);
    }

    #[test]
    fn test_variable_without_label_clears_stale_label() {
        let crosswalk = parse_codebook(CODEBOOK);
        let frame = df!(
            "AQM5E001" => ["1"],
            "AQM5M001" => ["0.5"]
        )
        .unwrap();
        let mut table = ExtractTable::from_frame(frame);

        materialize(&mut table, "v", "B01002", "E001", &crosswalk).unwrap();
        assert_eq!(table.label("v"), Some("Median age: Total"));

        let outcome = materialize(&mut table, "v", "B01002", "M001", &crosswalk).unwrap();
        assert!(matches!(outcome, Materialization::Created { label: None, .. }));
        assert_eq!(table.label("v"), None);
        assert_eq!(f64_values(&table, "v"), vec![Some(0.5)]);
    }

    #[test]
    fn test_label_does_not_change_values() {
        let crosswalk = parse_codebook(CODEBOOK);
        let mut labelled = table_with("AQM5E001", &["30.2", "41.0"]);
        materialize(&mut labelled, "medage", "B01002", "E001", &crosswalk).unwrap();

        let mut unlabelled_crosswalk = crosswalk.clone();
        unlabelled_crosswalk.archive_to_vars.clear();
        let mut unlabelled = table_with("AQM5E001", &["30.2", "41.0"]);
        materialize(&mut unlabelled, "medage", "B01002", "E001", &unlabelled_crosswalk).unwrap();

        assert!(labelled.frame().equals_missing(unlabelled.frame()));
        assert_ne!(labelled.label("medage"), unlabelled.label("medage"));
    }

    #[test]
    fn test_materialize_all_reports_each_request() {
        let crosswalk = parse_codebook(CODEBOOK);
        let frame = df!(
            "AQM5E001" => ["30.2"],
            "AQYYE001" => ["1000"]
        )
        .unwrap();
        let mut table = ExtractTable::from_frame(frame);
        let requests = vec![
            VariableRequest::new("pop", "B03002", "E001"),
            VariableRequest::new("hisp", "B03002", "E012"),
            VariableRequest::new("medage", "B01002", "E001"),
            VariableRequest::new("income", "B19013", "E001"),
        ];

        let report = materialize_all(&mut table, &requests, &crosswalk).unwrap();

        assert_eq!(report.created, vec!["pop".to_string(), "medage".to_string()]);
        assert_eq!(report.unresolved.len(), 2);
        assert!(!report.all_resolved());
        assert_eq!(report.unresolved[0].0.name, "hisp");
        assert_eq!(
            report.unresolved[1].1.to_string(),
            "Could not find source code B19013"
        );
        assert_eq!(table.label("pop"), Some("Total"));
    }

    #[test]
    fn test_variable_request_parsing() {
        let request: VariableRequest = "medage=B01002:E001".parse().unwrap();
        assert_eq!(request, VariableRequest::new("medage", "B01002", "E001"));
        assert_eq!(request.to_string(), "medage=B01002:E001");

        let spaced: VariableRequest = " pop = B03002 : E001 ".parse().unwrap();
        assert_eq!(spaced, VariableRequest::new("pop", "B03002", "E001"));

        assert!("medage".parse::<VariableRequest>().is_err());
        assert!("medage=B01002".parse::<VariableRequest>().is_err());
        assert!("=B01002:E001".parse::<VariableRequest>().is_err());
        assert!("medage=B01002:".parse::<VariableRequest>().is_err());
    }
}
