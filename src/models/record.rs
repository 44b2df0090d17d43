use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{ProcessingError, Result};
use crate::models::NormalizedWideTable;
use crate::utils::constants::EXPORT_TIMESTAMP_FORMAT;

/// One stored fact, keyed by `(fecha, variable)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongFormRecord {
    #[serde(rename = "fecha")]
    pub timestamp: String,

    pub variable: String,

    #[serde(rename = "valor")]
    pub value: f64,
}

impl LongFormRecord {
    pub fn new(timestamp: NaiveDateTime, variable: &str, value: f64) -> Self {
        Self {
            timestamp: timestamp.format(EXPORT_TIMESTAMP_FORMAT).to_string(),
            variable: variable.to_string(),
            value,
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.timestamp, &self.variable)
    }

    pub fn parsed_timestamp(&self) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, EXPORT_TIMESTAMP_FORMAT).map_err(|_| {
            ProcessingError::InvalidFormat(format!(
                "Stored timestamp '{}' is not in {} format",
                self.timestamp, EXPORT_TIMESTAMP_FORMAT
            ))
        })
    }
}

/// Rebuild a wide table from long records.
///
/// Columns follow `column_order` when given (unknown variables are appended in
/// first-seen order). A repeated key keeps its first value; absent cells are NaN.
pub fn pivot_to_wide(
    records: &[LongFormRecord],
    column_order: Option<&[String]>,
) -> Result<NormalizedWideTable> {
    let mut columns: Vec<String> = Vec::new();
    let mut column_index: HashMap<&str, usize> = HashMap::new();

    if let Some(order) = column_order {
        for name in order {
            if records.iter().any(|r| &r.variable == name) && !column_index.contains_key(name.as_str()) {
                column_index.insert(name.as_str(), columns.len());
                columns.push(name.clone());
            }
        }
    }

    let mut cells: BTreeMap<NaiveDateTime, HashMap<usize, f64>> = BTreeMap::new();
    for record in records {
        let column = match column_index.get(record.variable.as_str()) {
            Some(&index) => index,
            None => {
                let index = columns.len();
                column_index.insert(record.variable.as_str(), index);
                columns.push(record.variable.clone());
                index
            }
        };

        cells
            .entry(record.parsed_timestamp()?)
            .or_default()
            .entry(column)
            .or_insert(record.value);
    }

    let timestamps: Vec<NaiveDateTime> = cells.keys().copied().collect();
    let mut values = vec![vec![f64::NAN; timestamps.len()]; columns.len()];
    for (row, row_cells) in cells.values().enumerate() {
        for (&column, &value) in row_cells {
            values[column][row] = value;
        }
    }

    NormalizedWideTable::new(timestamps, columns, values)
}
