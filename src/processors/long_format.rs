use chrono::{Datelike, NaiveDateTime};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::error::{ProcessingError, Result};
use crate::models::{LongFormRecord, NormalizedWideTable, RawRecordSet, Settings};
use crate::processors::schema_normalizer::{is_null_token, parse_timestamp, SchemaNormalizer};
use crate::readers::{CsvTableReader, RowStream};
use crate::utils::constants::EXPORT_TIMESTAMP_FORMAT;

/// Counters collected while streaming records out of a raw table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub rows: usize,
    pub unparseable_timestamps: usize,
    pub before_min_year: usize,
    pub null_values: usize,
    pub duplicate_keys: usize,
    pub emitted: usize,
}

/// Turns a raw station table into `(fecha, variable, valor)` records.
pub struct LongFormatExporter<'a> {
    settings: &'a Settings,
}

impl<'a> LongFormatExporter<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Lazy record stream over an in-memory table
    pub fn records<'r>(
        &self,
        raw: &'r RawRecordSet,
    ) -> Result<LongFormIter<impl Iterator<Item = Result<&'r Vec<String>>> + 'r, &'r Vec<String>>> {
        self.from_rows(&raw.headers, raw.rows.iter().map(Ok))
    }

    /// Lazy record stream over rows still being read from disk
    pub fn stream(&self, rows: RowStream) -> Result<LongFormIter<RowStream, Vec<String>>> {
        let headers = rows.headers.clone();
        self.from_rows(&headers, rows)
    }

    /// Row-major records with columns in allow-list order.
    ///
    /// The first accepted row of a timestamp wins; later rows with the same
    /// timestamp are skipped whole.
    pub fn from_rows<I, R>(&self, headers: &[String], rows: I) -> Result<LongFormIter<I, R>>
    where
        I: Iterator<Item = Result<R>>,
        R: AsRef<[String]>,
    {
        let selection = SchemaNormalizer::new(self.settings).select_from_headers(headers)?;

        Ok(LongFormIter {
            rows,
            columns: selection.columns,
            min_year: self.settings.min_year,
            coerce: self.settings.export.coerce_non_numeric,
            column: 0,
            current: None,
            seen_timestamps: HashSet::new(),
            stats: ExportStats::default(),
        })
    }

    pub fn export(&self, raw: &RawRecordSet) -> Result<Vec<LongFormRecord>> {
        collect_logged(self.records(raw)?)
    }

    /// Export a file without holding the raw table in memory
    pub fn export_file(&self, path: &Path) -> Result<Vec<LongFormRecord>> {
        let rows = CsvTableReader::from_settings(self.settings)?.stream(path)?;
        collect_logged(self.stream(rows)?)
    }
}

fn collect_logged<I, R>(mut iter: LongFormIter<I, R>) -> Result<Vec<LongFormRecord>>
where
    I: Iterator<Item = Result<R>>,
    R: AsRef<[String]>,
{
    let records = iter.by_ref().collect::<Result<Vec<_>>>()?;

    let stats = iter.stats();
    debug!(
        "Exported {} records from {} rows ({} nulls, {} duplicate keys)",
        stats.emitted, stats.rows, stats.null_values, stats.duplicate_keys
    );
    Ok(records)
}

pub struct LongFormIter<I, R> {
    rows: I,
    columns: Vec<(usize, String)>,
    min_year: Option<i32>,
    coerce: bool,
    column: usize,
    current: Option<(String, R)>,
    seen_timestamps: HashSet<NaiveDateTime>,
    stats: ExportStats,
}

impl<I, R> LongFormIter<I, R>
where
    I: Iterator<Item = Result<R>>,
    R: AsRef<[String]>,
{
    pub fn stats(&self) -> &ExportStats {
        &self.stats
    }

    /// Move to the next row with a usable, not yet seen timestamp
    fn advance_row(&mut self) -> Option<Result<()>> {
        loop {
            let cells = match self.rows.next()? {
                Ok(cells) => cells,
                Err(e) => return Some(Err(e)),
            };
            self.stats.rows += 1;

            let row = cells.as_ref();
            let Some(timestamp) = row.first().and_then(|cell| parse_timestamp(cell)) else {
                self.stats.unparseable_timestamps += 1;
                continue;
            };
            if self.min_year.is_some_and(|min| timestamp.year() < min) {
                self.stats.before_min_year += 1;
                continue;
            }
            if !self.seen_timestamps.insert(timestamp) {
                self.stats.duplicate_keys += self
                    .columns
                    .iter()
                    .filter(|(index, _)| !is_null_token(cell_at(row, *index)))
                    .count();
                continue;
            }

            let fecha = timestamp.format(EXPORT_TIMESTAMP_FORMAT).to_string();
            self.current = Some((fecha, cells));
            self.column = 0;
            return Some(Ok(()));
        }
    }
}

fn cell_at(row: &[String], index: usize) -> &str {
    row.get(index).map_or("", |cell| cell.trim())
}

impl<I, R> Iterator for LongFormIter<I, R>
where
    I: Iterator<Item = Result<R>>,
    R: AsRef<[String]>,
{
    type Item = Result<LongFormRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                if let Err(e) = self.advance_row()? {
                    return Some(Err(e));
                }
            }
            let Some((fecha, cells)) = &self.current else {
                return None;
            };

            while self.column < self.columns.len() {
                let (index, variable) = &self.columns[self.column];
                self.column += 1;

                let cell = cell_at(cells.as_ref(), *index);
                if is_null_token(cell) {
                    self.stats.null_values += 1;
                    continue;
                }

                let Some(value) = cell.parse::<f64>().ok().filter(|v| !v.is_nan()) else {
                    if self.coerce {
                        self.stats.null_values += 1;
                        continue;
                    }
                    return Some(Err(ProcessingError::Cast {
                        timestamp: fecha.clone(),
                        variable: variable.clone(),
                        value: cell.to_string(),
                    }));
                };

                self.stats.emitted += 1;
                return Some(Ok(LongFormRecord {
                    timestamp: fecha.clone(),
                    variable: variable.clone(),
                    value,
                }));
            }

            self.current = None;
        }
    }
}

/// Non-null cells of a normalized table as long records
pub fn melt(table: &NormalizedWideTable) -> Vec<LongFormRecord> {
    table
        .non_null_cells()
        .map(|(timestamp, variable, value)| LongFormRecord::new(timestamp, variable, value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExportSettings, UtcOffset, VariableSpec};
    use pretty_assertions::assert_eq;

    fn settings() -> Settings {
        Settings::new(
            "test",
            18.84,
            -99.24,
            UtcOffset::from_hours(-6).unwrap(),
            vec![VariableSpec::new("I_glo_Avg"), VariableSpec::renamed("AirTC_Avg", "Ta")],
        )
        .unwrap()
    }

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawRecordSet {
        RawRecordSet::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
            "UTF-8",
        )
    }

    fn record(fecha: &str, variable: &str, value: f64) -> LongFormRecord {
        LongFormRecord {
            timestamp: fecha.to_string(),
            variable: variable.to_string(),
            value,
        }
    }

    #[test]
    fn test_row_major_order_and_renaming() {
        let settings = settings();
        let table = raw(
            &["TIMESTAMP", "RECORD", "AirTC_Avg", "I_glo_Avg"],
            &[
                &["2023-01-01 00:00", "1", "20.5", "0"],
                &["2023-01-01 00:10", "2", "20.4", "1.5"],
            ],
        );
        let records = LongFormatExporter::new(&settings).export(&table).unwrap();

        assert_eq!(
            records,
            vec![
                record("2023-01-01 00:00:00", "I_glo_Avg", 0.0),
                record("2023-01-01 00:00:00", "Ta", 20.5),
                record("2023-01-01 00:10:00", "I_glo_Avg", 1.5),
                record("2023-01-01 00:10:00", "Ta", 20.4),
            ]
        );
    }

    #[test]
    fn test_null_tokens_are_dropped() {
        let settings = settings();
        let table = raw(
            &["TIMESTAMP", "I_glo_Avg", "AirTC_Avg"],
            &[&["2023-01-01 00:00", "-", " NaN "], &["2023-01-01 00:10", "", "Na"]],
        );
        let exporter = LongFormatExporter::new(&settings);
        let mut iter = exporter.records(&table).unwrap();

        assert!(iter.next().is_none());
        assert_eq!(iter.stats().null_values, 4);
    }

    #[test]
    fn test_duplicate_rows_export_once() {
        let settings = settings();
        let table = raw(
            &["TIMESTAMP", "I_glo_Avg"],
            &[&["2023-01-01 00:00", "5"], &["2023-01-01 00:00", "5"], &["2023-01-01 00:00", "7"]],
        );
        let records = LongFormatExporter::new(&settings).export(&table).unwrap();
        assert_eq!(records, vec![record("2023-01-01 00:00:00", "I_glo_Avg", 5.0)]);
    }

    #[test]
    fn test_repeated_timestamp_keeps_first_row_whole() {
        let settings = settings();
        let table = raw(
            &["TIMESTAMP", "I_glo_Avg", "AirTC_Avg"],
            &[
                &["bad", "1", "1"],
                &["2023-01-01 12:00:00", "-", "5"],
                &["2023-01-01 12:00:00", "7", "6"],
            ],
        );
        let exporter = LongFormatExporter::new(&settings);
        let mut iter = exporter.records(&table).unwrap();
        let records: Vec<_> = iter.by_ref().collect::<Result<_>>().unwrap();

        assert_eq!(records, vec![record("2023-01-01 12:00:00", "Ta", 5.0)]);
        assert_eq!(iter.stats().duplicate_keys, 2);
        assert_eq!(iter.stats().null_values, 1);

        let normalized = SchemaNormalizer::new(&settings).normalize(&table).unwrap();
        assert_eq!(melt(&normalized), records);
    }

    #[test]
    fn test_row_source_error_is_surfaced() {
        let settings = settings();
        let headers = vec!["TIMESTAMP".to_string(), "I_glo_Avg".to_string()];
        let rows = vec![
            Ok(vec!["2023-01-01 00:00".to_string(), "1".to_string()]),
            Err(ProcessingError::InvalidFormat("truncated".to_string())),
        ];
        let exporter = LongFormatExporter::new(&settings);
        let mut iter = exporter.from_rows(&headers, rows.into_iter()).unwrap();

        assert_eq!(iter.next().unwrap().unwrap(), record("2023-01-01 00:00:00", "I_glo_Avg", 1.0));
        assert!(matches!(iter.next(), Some(Err(ProcessingError::InvalidFormat(_)))));
    }

    #[test]
    fn test_unparseable_and_old_rows_skipped() {
        let settings = settings();
        let table = raw(
            &["TIMESTAMP", "I_glo_Avg"],
            &[&["bad", "1"], &["2005-06-01 12:00", "2"], &["2023-01-01 00:00", "3"]],
        );
        let exporter = LongFormatExporter::new(&settings);
        let mut iter = exporter.records(&table).unwrap();
        let records: Vec<_> = iter.by_ref().collect::<Result<_>>().unwrap();

        assert_eq!(records, vec![record("2023-01-01 00:00:00", "I_glo_Avg", 3.0)]);
        assert_eq!(iter.stats().unparseable_timestamps, 1);
        assert_eq!(iter.stats().before_min_year, 1);
    }

    #[test]
    fn test_non_numeric_coerced_to_null() {
        let settings = settings();
        let table = raw(&["TIMESTAMP", "I_glo_Avg"], &[&["2023-01-01 00:00", "error"]]);
        let records = LongFormatExporter::new(&settings).export(&table).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_non_numeric_is_cast_error_in_strict_mode() {
        let settings = settings().with_export(ExportSettings {
            coerce_non_numeric: false,
            ..Default::default()
        });
        let table = raw(
            &["TIMESTAMP", "I_glo_Avg"],
            &[&["2023-01-01 00:00", "1"], &["2023-01-01 00:10", "error"]],
        );

        match LongFormatExporter::new(&settings).export(&table) {
            Err(ProcessingError::Cast { variable, value, .. }) => {
                assert_eq!(variable, "I_glo_Avg");
                assert_eq!(value, "error");
            }
            other => panic!("expected cast error, got {:?}", other),
        }
    }

    #[test]
    fn test_melt_normalized_table() {
        let settings = settings();
        let table = raw(
            &["TIMESTAMP", "I_glo_Avg", "AirTC_Avg"],
            &[&["2023-01-01 00:00", "1", "-"]],
        );
        let normalized = SchemaNormalizer::new(&settings).normalize(&table).unwrap();
        assert_eq!(melt(&normalized), vec![record("2023-01-01 00:00:00", "I_glo_Avg", 1.0)]);
    }
}
