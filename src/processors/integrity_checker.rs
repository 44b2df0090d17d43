use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::analyzers::night_radiation::detect_night_anomalies;
use crate::error::{ProcessingError, Result};
use crate::models::{
    ColumnType, DuplicateKey, NanScope, NormalizationStats, NormalizedWideTable, RawRecordSet,
    Settings,
};
use crate::processors::schema_normalizer::SchemaNormalizer;
use crate::readers::{CsvTableReader, FormatReport, HeaderLayout};

/// The checks, in the order they are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityCheck {
    Extension,
    Encoding,
    NoNan,
    NoNat,
    NoDuplicates,
    Dtypes,
    NightRadiation,
}

impl IntegrityCheck {
    pub const ALL: [IntegrityCheck; 7] = [
        IntegrityCheck::Extension,
        IntegrityCheck::Encoding,
        IntegrityCheck::NoNan,
        IntegrityCheck::NoNat,
        IntegrityCheck::NoDuplicates,
        IntegrityCheck::Dtypes,
        IntegrityCheck::NightRadiation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            IntegrityCheck::Extension => "extension",
            IntegrityCheck::Encoding => "encoding",
            IntegrityCheck::NoNan => "no_nan",
            IntegrityCheck::NoNat => "no_nat",
            IntegrityCheck::NoDuplicates => "no_duplicates",
            IntegrityCheck::Dtypes => "dtypes",
            IntegrityCheck::NightRadiation => "night_radiation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    Failed(String),
    /// The check could not run; counts as not passed
    Error(String),
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, CheckOutcome::Passed)
    }

    fn from_count(count: usize, what: &str) -> Self {
        if count == 0 {
            CheckOutcome::Passed
        } else {
            CheckOutcome::Failed(format!("{} {}", count, what))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckEntry {
    pub check: IntegrityCheck,
    pub outcome: CheckOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub file: PathBuf,
    pub encoding: String,
    pub header_layout: HeaderLayout,
    pub rows: usize,
    pub entries: Vec<CheckEntry>,
    pub null_counts: Vec<(String, usize)>,
    pub observed_types: Vec<(String, ColumnType)>,
    pub stats: NormalizationStats,
}

impl IntegrityReport {
    pub fn get(&self, check: IntegrityCheck) -> Option<&CheckOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.check == check)
            .map(|entry| &entry.outcome)
    }

    pub fn passed(&self, check: IntegrityCheck) -> bool {
        self.get(check).is_some_and(CheckOutcome::passed)
    }

    pub fn all_passed(&self) -> bool {
        self.entries.iter().all(|entry| entry.outcome.passed())
    }

    /// `(check name, passed)` in report order
    pub fn as_bool_map(&self) -> Vec<(&'static str, bool)> {
        self.entries
            .iter()
            .map(|entry| (entry.check.name(), entry.outcome.passed()))
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckEntry> {
        self.entries.iter().filter(|entry| !entry.outcome.passed())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs the seven integrity checks over one station file
pub struct IntegrityChecker<'a> {
    settings: &'a Settings,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Read, normalize and check a file.
    ///
    /// I/O, decode and schema errors abort; every other problem becomes a
    /// report entry.
    pub fn run_checks(&self, path: &Path) -> Result<IntegrityReport> {
        let reader = CsvTableReader::from_settings(self.settings)?;
        let (raw, format) = reader.read(path)?;
        self.check_records(path, &raw, format)
    }

    pub fn check_records(
        &self,
        path: &Path,
        raw: &RawRecordSet,
        format: FormatReport,
    ) -> Result<IntegrityReport> {
        let table = SchemaNormalizer::new(self.settings).normalize(raw)?;

        let entries = IntegrityCheck::ALL
            .iter()
            .map(|&check| CheckEntry {
                check,
                outcome: self.evaluate(check, path, &format, &table),
            })
            .collect();

        let report = IntegrityReport {
            file: path.to_path_buf(),
            encoding: format.encoding.name().to_string(),
            header_layout: format.header_layout,
            rows: table.row_count(),
            entries,
            null_counts: table.null_counts(),
            observed_types: table.observed_types().to_vec(),
            stats: table.stats().clone(),
        };

        info!(
            "{}: {} of {} checks passed",
            path.display(),
            report.entries.iter().filter(|e| e.outcome.passed()).count(),
            report.entries.len()
        );
        Ok(report)
    }

    fn evaluate(
        &self,
        check: IntegrityCheck,
        path: &Path,
        format: &FormatReport,
        table: &NormalizedWideTable,
    ) -> CheckOutcome {
        let stats = table.stats();
        let outcome = match check {
            // Suffix match, so a file named just ".csv" passes
            IntegrityCheck::Extension if path.to_string_lossy().ends_with(".csv") => {
                CheckOutcome::Passed
            }
            IntegrityCheck::Extension => CheckOutcome::Failed(format!(
                "expected a .csv file, found {}",
                path.extension()
                    .map_or("no extension".to_string(), |e| format!(".{}", e.to_string_lossy()))
            )),
            IntegrityCheck::Encoding => {
                if format.is_utf8 {
                    CheckOutcome::Passed
                } else {
                    CheckOutcome::Failed(format!(
                        "file is not UTF-8, decoded as {}",
                        format.encoding.name()
                    ))
                }
            }
            IntegrityCheck::NoNan => {
                let timestamp_nulls = match self.settings.checks.nan_scope {
                    NanScope::AllColumns => stats.unparseable_timestamps,
                    NanScope::ValuesOnly => 0,
                };
                CheckOutcome::from_count(table.nan_count() + timestamp_nulls, "missing values")
            }
            IntegrityCheck::NoNat => {
                CheckOutcome::from_count(stats.unparseable_timestamps, "unparseable timestamps")
            }
            IntegrityCheck::NoDuplicates => match self.settings.checks.duplicate_key {
                DuplicateKey::Timestamp => {
                    CheckOutcome::from_count(stats.duplicate_timestamps, "duplicate timestamps")
                }
                DuplicateKey::FullRow => {
                    CheckOutcome::from_count(stats.duplicate_rows, "duplicate rows")
                }
            },
            IntegrityCheck::Dtypes => self.check_dtypes(table),
            IntegrityCheck::NightRadiation => match detect_night_anomalies(table, self.settings, None) {
                Ok(anomalies) => {
                    CheckOutcome::from_count(anomalies.len(), "rows with irradiance at night")
                }
                Err(e) => CheckOutcome::Error(e.to_string()),
            },
        };

        debug!("{} -> {:?}", check.name(), outcome);
        outcome
    }

    /// Compare the expected type of every configured column with what the file holds
    fn check_dtypes(&self, table: &NormalizedWideTable) -> CheckOutcome {
        let observed: HashMap<&str, ColumnType> = table
            .observed_types()
            .iter()
            .map(|(name, column_type)| (name.as_str(), *column_type))
            .collect();

        let mut missing = Vec::new();
        let mut mismatches = Vec::new();
        for (name, expected) in self.settings.expected_types() {
            match observed.get(name.as_str()) {
                None => missing.push(name),
                Some(found) if *found != expected => {
                    mismatches.push(format!("{}: expected {}, found {}", name, expected, found))
                }
                Some(_) => {}
            }
        }

        if !missing.is_empty() {
            CheckOutcome::Error(ProcessingError::MissingColumn(missing.join(", ")).to_string())
        } else if !mismatches.is_empty() {
            CheckOutcome::Failed(mismatches.join("; "))
        } else {
            CheckOutcome::Passed
        }
    }

    /// Generate a summary report
    pub fn generate_summary(&self, report: &IntegrityReport) -> String {
        let catalog = &self.settings.variables;
        let mut summary = String::new();

        summary.push_str("=== Integrity Check Report ===\n");
        summary.push_str(&format!("File: {}\n", report.file.display()));
        summary.push_str(&format!(
            "Encoding: {} ({:?})\n",
            report.encoding, report.header_layout
        ));
        summary.push_str(&format!(
            "Rows: {} kept of {} read ({} dropped)\n",
            report.rows,
            report.stats.input_rows,
            report.stats.dropped_rows()
        ));

        summary.push_str("\nChecks:\n");
        for entry in &report.entries {
            let line = match &entry.outcome {
                CheckOutcome::Passed => format!("  ✅ {}\n", entry.check.name()),
                CheckOutcome::Failed(detail) => format!("  ❌ {}: {}\n", entry.check.name(), detail),
                CheckOutcome::Error(detail) => format!("  ⚠️  {}: {}\n", entry.check.name(), detail),
            };
            summary.push_str(&line);
        }

        let with_nulls: Vec<&(String, usize)> =
            report.null_counts.iter().filter(|(_, n)| *n > 0).collect();
        if !with_nulls.is_empty() {
            summary.push_str("\nMissing Values:\n");
            for (name, count) in with_nulls {
                summary.push_str(&format!("  {}: {}\n", catalog.alias_for(name), count));
            }
        }

        summary.push_str("\nColumn Types:\n");
        for (name, column_type) in &report.observed_types {
            summary.push_str(&format!("  {}: {}\n", catalog.alias_for(name), column_type));
        }

        if !report.stats.dropped_columns.is_empty() {
            summary.push_str(&format!(
                "\nIgnored Columns: {}\n",
                report.stats.dropped_columns.join(", ")
            ));
        }

        summary
    }
}
