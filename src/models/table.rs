use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProcessingError, Result};
use crate::utils::constants::TIMESTAMP_COLUMN;

/// Wide table exactly as read from disk: header names plus string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecordSet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub encoding: String,
}

impl RawRecordSet {
    /// Rows are padded (or cut) to the header width.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>, encoding: &str) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();

        Self {
            headers,
            rows,
            encoding: encoding.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows.iter().map(move |row| row[index].as_str())
    }
}

/// Column dtype, named the way pandas reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    DateTime,
    Float64,
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::DateTime => "datetime64[ns]",
            ColumnType::Float64 => "float64",
            ColumnType::Text => "object",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows and columns removed while normalizing, per reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizationStats {
    pub input_rows: usize,
    pub unparseable_timestamps: usize,
    pub before_min_year: usize,
    pub duplicate_timestamps: usize,
    pub duplicate_rows: usize,
    pub dropped_columns: Vec<String>,
}

impl NormalizationStats {
    pub fn dropped_rows(&self) -> usize {
        self.unparseable_timestamps + self.before_min_year + self.duplicate_timestamps
    }
}

/// Timestamp-indexed table of canonical `f64` columns.
///
/// Timestamps are naive local time, strictly increasing. Values are stored
/// column by column; missing values are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWideTable {
    timestamps: Vec<NaiveDateTime>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
    observed_types: Vec<(String, ColumnType)>,
    stats: NormalizationStats,
}

impl NormalizedWideTable {
    pub fn new(
        timestamps: Vec<NaiveDateTime>,
        columns: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if columns.len() != values.len() {
            return Err(ProcessingError::Schema(format!(
                "{} column names for {} value columns",
                columns.len(),
                values.len()
            )));
        }

        if let Some((name, column)) = columns
            .iter()
            .zip(&values)
            .find(|(_, column)| column.len() != timestamps.len())
        {
            return Err(ProcessingError::Schema(format!(
                "Column '{}' has {} values for {} timestamps",
                name,
                column.len(),
                timestamps.len()
            )));
        }

        if let Some(pair) = timestamps.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(ProcessingError::Schema(format!(
                "Timestamp index is not strictly increasing at {}",
                pair[1]
            )));
        }

        Ok(Self {
            timestamps,
            columns,
            values,
            observed_types: Vec::new(),
            stats: NormalizationStats::default(),
        })
    }

    pub(crate) fn with_observed_types(mut self, observed_types: Vec<(String, ColumnType)>) -> Self {
        self.observed_types = observed_types;
        self
    }

    pub(crate) fn with_stats(mut self, stats: NormalizationStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|index| self.values[index].as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Types of the pruned columns before coercion, timestamp first
    pub fn observed_types(&self) -> &[(String, ColumnType)] {
        &self.observed_types
    }

    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }

    pub fn nan_count(&self) -> usize {
        self.values
            .iter()
            .map(|column| column.iter().filter(|v| v.is_nan()).count())
            .sum()
    }

    /// Per-column missing counts, timestamp first
    pub fn null_counts(&self) -> Vec<(String, usize)> {
        std::iter::once((
            TIMESTAMP_COLUMN.to_string(),
            self.stats.unparseable_timestamps,
        ))
        .chain(self.columns.iter().zip(&self.values).map(|(name, column)| {
            (name.clone(), column.iter().filter(|v| v.is_nan()).count())
        }))
        .collect()
    }

    /// Every non-NaN cell as `(timestamp, column, value)`, row-major
    pub fn non_null_cells(&self) -> impl Iterator<Item = (NaiveDateTime, &str, f64)> + '_ {
        self.timestamps
            .iter()
            .enumerate()
            .flat_map(move |(row, ts)| {
                self.columns
                    .iter()
                    .zip(&self.values)
                    .filter_map(move |(name, column)| {
                        let value = column[row];
                        (!value.is_nan()).then_some((*ts, name.as_str(), value))
                    })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_raw_rows_padded_to_header_width() {
        let raw = RawRecordSet::new(
            vec!["TIMESTAMP".into(), "a".into(), "b".into()],
            vec![vec!["2023-01-01 00:00".into()]],
            "UTF-8",
        );
        assert_eq!(raw.rows[0].len(), 3);
        assert_eq!(raw.column(2).collect::<Vec<_>>(), vec![""]);
    }

    #[test]
    fn test_rejects_unsorted_index() {
        let result = NormalizedWideTable::new(
            vec![ts(2), ts(1)],
            vec!["a".into()],
            vec![vec![1.0, 2.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_duplicate_index() {
        let result = NormalizedWideTable::new(
            vec![ts(1), ts(1)],
            vec!["a".into()],
            vec![vec![1.0, 2.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_null_counts_and_cells() {
        let table = NormalizedWideTable::new(
            vec![ts(0), ts(1)],
            vec!["a".into(), "b".into()],
            vec![vec![1.0, f64::NAN], vec![f64::NAN, f64::NAN]],
        )
        .unwrap();

        assert_eq!(table.nan_count(), 3);
        assert_eq!(
            table.null_counts(),
            vec![
                ("TIMESTAMP".to_string(), 0),
                ("a".to_string(), 1),
                ("b".to_string(), 2)
            ]
        );
        let cells: Vec<_> = table.non_null_cells().collect();
        assert_eq!(cells, vec![(ts(0), "a", 1.0)]);
    }
}
