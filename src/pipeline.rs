use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analyzers::{detect_night_anomalies, NightAnomalyTable};
use crate::error::Result;
use crate::models::{NormalizedWideTable, RawRecordSet, Settings};
use crate::processors::{ExportStats, IntegrityChecker, IntegrityReport, LongFormatExporter, SchemaNormalizer};
use crate::readers::{CsvTableReader, FormatReport};
use crate::utils::filename::parquet_path_for;
use crate::utils::progress::ProgressReporter;
use crate::writers::{load_records, InsertOutcome, ParquetWriter, RecordSink};

/// Result of loading one file into a sink
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub stats: ExportStats,
    pub outcome: InsertOutcome,
    /// Configured variables the file does not carry
    pub unmatched: Vec<String>,
}

impl ExportSummary {
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Export of {}\n", self.path.display()));
        summary.push_str(&format!("  Rows read: {}\n", self.stats.rows));
        summary.push_str(&format!(
            "  Rows dropped: {} unparseable timestamps, {} before min year\n",
            self.stats.unparseable_timestamps, self.stats.before_min_year
        ));
        summary.push_str(&format!(
            "  Cells dropped: {} null, {} duplicate keys\n",
            self.stats.null_values, self.stats.duplicate_keys
        ));
        summary.push_str(&format!(
            "  Records: {} inserted, {} ignored, {} replaced\n",
            self.outcome.inserted, self.outcome.ignored, self.outcome.replaced
        ));
        if !self.unmatched.is_empty() {
            summary.push_str(&format!("  Not in file: {}\n", self.unmatched.join(", ")));
        }
        summary
    }
}

/// Per-file ingestion: read, check, normalize and load one station export
pub struct IngestPipeline<'a> {
    settings: &'a Settings,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn read(&self, path: &Path) -> Result<(RawRecordSet, FormatReport)> {
        let (raw, format) = CsvTableReader::from_settings(self.settings)?.read(path)?;

        let unmatched = self.settings.unmatched_variables(&raw.headers);
        if !unmatched.is_empty() {
            warn!(
                "{}: configured variables not in header: {}",
                path.display(),
                unmatched.join(", ")
            );
        }

        Ok((raw, format))
    }

    pub fn normalize(&self, path: &Path) -> Result<NormalizedWideTable> {
        let (raw, _) = self.read(path)?;
        SchemaNormalizer::new(self.settings).normalize(&raw)
    }

    pub fn validate(&self, path: &Path) -> Result<IntegrityReport> {
        let (raw, format) = self.read(path)?;
        IntegrityChecker::new(self.settings).check_records(path, &raw, format)
    }

    /// Stream the file's long-format records into `sink` as one transaction.
    ///
    /// Rows are read, converted and staged chunk by chunk; the raw table is
    /// never held in memory.
    pub fn export_into<S>(
        &self,
        path: &Path,
        sink: &mut S,
        progress: Option<&ProgressReporter>,
    ) -> Result<ExportSummary>
    where
        S: RecordSink + ?Sized,
    {
        let rows = CsvTableReader::from_settings(self.settings)?.stream(path)?;
        let unmatched: Vec<String> = self
            .settings
            .unmatched_variables(&rows.headers)
            .into_iter()
            .map(str::to_string)
            .collect();
        if !unmatched.is_empty() {
            warn!(
                "{}: configured variables not in header: {}",
                path.display(),
                unmatched.join(", ")
            );
        }

        let mut records = LongFormatExporter::new(self.settings).stream(rows)?;
        let outcome = load_records(
            sink,
            records.by_ref(),
            self.settings.export.chunk_size,
            progress,
        )?;

        let summary = ExportSummary {
            path: path.to_path_buf(),
            stats: records.stats().clone(),
            outcome,
            unmatched,
        };
        info!(
            "{}: {} records inserted, {} already present",
            path.display(),
            outcome.inserted,
            outcome.ignored
        );
        Ok(summary)
    }

    pub fn night_anomalies(
        &self,
        path: &Path,
        selected: Option<&[String]>,
    ) -> Result<NightAnomalyTable> {
        let table = self.normalize(path)?;
        detect_night_anomalies(&table, self.settings, selected)
    }

    /// Write the normalized wide table of `path` as `<output_dir>/<stem>.parquet`
    pub fn convert(&self, path: &Path, output_dir: &Path, writer: &ParquetWriter) -> Result<PathBuf> {
        let table = self.normalize(path)?;
        std::fs::create_dir_all(output_dir)?;

        let output = parquet_path_for(path, output_dir);
        writer.write_wide_table(&table, &output)?;
        info!(
            "Converted {} ({} rows) to {}",
            path.display(),
            table.row_count(),
            output.display()
        );
        Ok(output)
    }
}
