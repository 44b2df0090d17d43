use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use crate::analyzers::solar_position::SolarPositionEngine;
use crate::error::{ProcessingError, Result};
use crate::models::{NormalizedWideTable, Settings};

/// A row with positive irradiance while the sun is at or below the horizon
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NightRadiationRow {
    pub timestamp: NaiveDateTime,
    /// Apparent elevation rounded to 2 decimals
    pub solar_elevation: f64,
    /// Irradiance values in `NightAnomalyTable::columns` order
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NightAnomalyTable {
    pub columns: Vec<String>,
    pub rows: Vec<NightRadiationRow>,
}

impl NightAnomalyTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Irradiance columns of the table to check.
///
/// `selected` names may be canonical names, aliases or raw names; without a
/// selection every configured irradiance variable is used.
pub fn irradiance_columns(
    table: &NormalizedWideTable,
    settings: &Settings,
    selected: Option<&[String]>,
) -> Result<Vec<String>> {
    let catalog = &settings.variables;
    let wanted: Vec<String> = match selected {
        Some(names) => names
            .iter()
            .map(|name| catalog.resolve(name).unwrap_or(name.as_str()).to_string())
            .collect(),
        None => catalog
            .irradiance_columns()
            .into_iter()
            .map(str::to_string)
            .collect(),
    };

    let present: Vec<String> = wanted
        .iter()
        .filter(|name| table.has_column(name))
        .cloned()
        .collect();

    if present.is_empty() {
        return Err(ProcessingError::MissingColumn(if wanted.is_empty() {
            "no irradiance variable is configured".to_string()
        } else {
            wanted.join(", ")
        }));
    }

    Ok(present)
}

/// Rows where the apparent solar elevation is <= 0 and any irradiance value is > 0
pub fn detect_night_anomalies(
    table: &NormalizedWideTable,
    settings: &Settings,
    selected: Option<&[String]>,
) -> Result<NightAnomalyTable> {
    let columns = irradiance_columns(table, settings, selected)?;
    let series: Vec<&[f64]> = columns
        .iter()
        .filter_map(|name| table.column(name))
        .collect();

    let elevations = SolarPositionEngine::from_settings(settings).apparent_elevation(table.timestamps());

    let rows: Vec<NightRadiationRow> = table
        .timestamps()
        .iter()
        .zip(&elevations)
        .enumerate()
        .filter(|(row, (_, elevation))| {
            **elevation <= 0.0 && series.iter().any(|column| column[*row] > 0.0)
        })
        .map(|(row, (timestamp, elevation))| NightRadiationRow {
            timestamp: *timestamp,
            solar_elevation: (elevation * 100.0).round() / 100.0,
            values: series.iter().map(|column| column[row]).collect(),
        })
        .collect();

    debug!(
        "{} of {} rows show irradiance with the sun below the horizon",
        rows.len(),
        table.row_count()
    );

    Ok(NightAnomalyTable { columns, rows })
}

pub fn count_night_radiation(table: &NormalizedWideTable, settings: &Settings) -> Result<usize> {
    Ok(detect_night_anomalies(table, settings, None)?.len())
}
