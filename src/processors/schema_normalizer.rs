//! Raw station table to canonical wide table.
//!
//! The steps run in a fixed order: timestamp parsing, renaming, column
//! pruning, numeric coercion, minimum-year filter, deduplication and sorting.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::error::{ProcessingError, Result};
use crate::models::{ColumnType, NormalizationStats, NormalizedWideTable, RawRecordSet, Settings};
use crate::utils::constants::{
    DATE_FORMATS, NULL_TOKENS, RECORD_COLUMN, TIMESTAMP_COLUMN, TIMESTAMP_FORMATS, UNNAMED_PREFIX,
};

/// Columns kept from a raw table, in allow-list order
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSelection {
    /// `(raw column index, canonical name)`
    pub columns: Vec<(usize, String)>,
    /// Raw headers removed by pruning
    pub dropped: Vec<String>,
}

impl ColumnSelection {
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(_, name)| name.clone()).collect()
    }
}

pub struct SchemaNormalizer<'a> {
    settings: &'a Settings,
}

impl<'a> SchemaNormalizer<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Rename raw headers and keep only allow-listed columns.
    ///
    /// The first column is the timestamp and is never part of the selection.
    pub fn select_columns(&self, raw: &RawRecordSet) -> Result<ColumnSelection> {
        self.select_from_headers(&raw.headers)
    }

    pub fn select_from_headers(&self, headers: &[String]) -> Result<ColumnSelection> {
        if headers.is_empty() {
            return Err(ProcessingError::Schema("Table has no columns".to_string()));
        }

        let catalog = &self.settings.variables;
        let mut columns: Vec<(usize, String)> = Vec::new();
        let mut dropped = Vec::new();
        let mut taken: HashSet<&str> = HashSet::new();

        for (index, header) in headers.iter().enumerate().skip(1) {
            if header == RECORD_COLUMN || header.starts_with(UNNAMED_PREFIX) {
                dropped.push(header.clone());
                continue;
            }

            let canonical = catalog.canonical_for(header).or_else(|| {
                catalog
                    .contains_canonical(header)
                    .then_some(header.as_str())
            });

            match canonical {
                Some(name) if taken.insert(name) => columns.push((index, name.to_string())),
                Some(name) => {
                    warn!(
                        "Column '{}' maps to '{}' which is already taken, dropping it",
                        header, name
                    );
                    dropped.push(header.clone());
                }
                None => dropped.push(header.clone()),
            }
        }

        if columns.is_empty() {
            return Err(ProcessingError::Schema(format!(
                "None of the {} configured variables is present in the input",
                catalog.len()
            )));
        }

        columns.sort_by_key(|(_, name)| catalog.position(name).unwrap_or(usize::MAX));

        if !dropped.is_empty() {
            debug!("Dropped columns: {:?}", dropped);
        }

        Ok(ColumnSelection { columns, dropped })
    }

    /// Convert a raw table into a `NormalizedWideTable`
    pub fn normalize(&self, raw: &RawRecordSet) -> Result<NormalizedWideTable> {
        let selection = self.select_columns(raw)?;
        let observed_types = self.observed_types(raw, &selection);

        let mut stats = NormalizationStats {
            input_rows: raw.len(),
            dropped_columns: selection.dropped.clone(),
            ..Default::default()
        };

        let mut rows: Vec<(NaiveDateTime, Vec<f64>)> = Vec::with_capacity(raw.len());
        for row in &raw.rows {
            let Some(timestamp) = parse_timestamp(&row[0]) else {
                stats.unparseable_timestamps += 1;
                continue;
            };

            if let Some(min_year) = self.settings.min_year {
                if timestamp.year() < min_year {
                    stats.before_min_year += 1;
                    continue;
                }
            }

            let values = selection
                .columns
                .iter()
                .map(|(index, _)| coerce_value(&row[*index]))
                .collect();
            rows.push((timestamp, values));
        }

        let mut seen_timestamps: HashSet<NaiveDateTime> = HashSet::with_capacity(rows.len());
        let mut seen_rows: HashSet<(NaiveDateTime, Vec<u64>)> = HashSet::with_capacity(rows.len());
        let mut unique = Vec::with_capacity(rows.len());

        for (timestamp, values) in rows {
            if !seen_rows.insert((timestamp, row_key(&values))) {
                stats.duplicate_rows += 1;
            }
            if seen_timestamps.insert(timestamp) {
                unique.push((timestamp, values));
            } else {
                stats.duplicate_timestamps += 1;
            }
        }

        unique.sort_by_key(|(timestamp, _)| *timestamp);

        let names = selection.names();
        let mut values = vec![Vec::with_capacity(unique.len()); names.len()];
        let mut timestamps = Vec::with_capacity(unique.len());
        for (timestamp, row) in unique {
            timestamps.push(timestamp);
            for (column, value) in values.iter_mut().zip(row) {
                column.push(value);
            }
        }

        info!(
            "Normalized {} of {} rows ({} unparseable timestamps, {} before min year, {} duplicate timestamps)",
            timestamps.len(),
            stats.input_rows,
            stats.unparseable_timestamps,
            stats.before_min_year,
            stats.duplicate_timestamps
        );

        Ok(NormalizedWideTable::new(timestamps, names, values)?
            .with_observed_types(observed_types)
            .with_stats(stats))
    }

    /// Types of the pruned columns before any coercion, timestamp first
    pub fn observed_types(
        &self,
        raw: &RawRecordSet,
        selection: &ColumnSelection,
    ) -> Vec<(String, ColumnType)> {
        let timestamp_type = infer_timestamp_type(raw.column(0));

        std::iter::once((TIMESTAMP_COLUMN.to_string(), timestamp_type))
            .chain(
                selection
                    .columns
                    .iter()
                    .map(|(index, name)| (name.clone(), infer_value_type(raw.column(*index)))),
            )
            .collect()
    }
}

/// Parse a timestamp, year-first layouts first and day-first otherwise
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_FORMATS.iter().find_map(|format| {
                NaiveDate::parse_from_str(value, format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
        })
}

pub fn is_null_token(value: &str) -> bool {
    NULL_TOKENS.contains(&value.trim())
}

/// Numeric value of a cell; anything unparseable is NaN
pub fn coerce_value(value: &str) -> f64 {
    if is_null_token(value) {
        return f64::NAN;
    }
    value.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn infer_timestamp_type<'a>(mut cells: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut any = false;
    let parsed = cells.any(|cell| {
        any = true;
        parse_timestamp(cell).is_some()
    });

    if parsed || !any {
        ColumnType::DateTime
    } else {
        ColumnType::Text
    }
}

fn infer_value_type<'a>(mut cells: impl Iterator<Item = &'a str>) -> ColumnType {
    let numeric = cells.all(|cell| is_null_token(cell) || cell.trim().parse::<f64>().is_ok());

    if numeric {
        ColumnType::Float64
    } else {
        ColumnType::Text
    }
}

/// Hashable row identity where every NaN compares equal, as do `0.0` and `-0.0`
fn row_key(values: &[f64]) -> Vec<u64> {
    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                f64::NAN.to_bits()
            } else if v == 0.0 {
                0.0f64.to_bits()
            } else {
                v.to_bits()
            }
        })
        .collect()
}
