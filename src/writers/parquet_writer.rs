use crate::error::{ProcessingError, Result};
use crate::models::{ConflictPolicy, LongFormRecord, NormalizedWideTable};
use crate::utils::constants::{
    COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_NONE, COMPRESSION_SNAPPY, COMPRESSION_ZSTD,
    DEFAULT_ROW_GROUP_SIZE, TIMESTAMP_COLUMN,
};
use crate::writers::record_sink::{ensure_finite, merge_into, InsertOutcome, RecordKey, RecordSink};
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{TimeZone, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const READ_BATCH_SIZE: usize = 8192;

/// Parquet output settings shared by the long-format store and wide exports
#[derive(Debug, Clone)]
pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            COMPRESSION_SNAPPY => Compression::SNAPPY,
            COMPRESSION_GZIP => Compression::GZIP(GzipLevel::default()),
            COMPRESSION_LZ4 => Compression::LZ4,
            COMPRESSION_ZSTD => Compression::ZSTD(ZstdLevel::default()),
            COMPRESSION_NONE => Compression::UNCOMPRESSED,
            _ => {
                return Err(ProcessingError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size.max(1);
        self
    }

    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build()
    }

    /// Long-format schema: `fecha`, `variable`, `valor`
    fn long_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("fecha", DataType::Utf8, false),
            Field::new("variable", DataType::Utf8, false),
            Field::new("valor", DataType::Float64, false),
        ]))
    }

    fn long_batch<'a>(
        rows: impl Iterator<Item = (&'a str, &'a str, f64)>,
        schema: Arc<Schema>,
    ) -> Result<RecordBatch> {
        let mut fechas = Vec::new();
        let mut variables = Vec::new();
        let mut valores = Vec::new();
        for (fecha, variable, valor) in rows {
            fechas.push(fecha);
            variables.push(variable);
            valores.push(valor);
        }

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(fechas)),
                Arc::new(StringArray::from(variables)),
                Arc::new(Float64Array::from(valores)),
            ],
        )?;
        Ok(batch)
    }

    /// Write a keyed long table, in key order
    pub fn write_long_table(&self, table: &BTreeMap<RecordKey, f64>, path: &Path) -> Result<()> {
        let schema = Self::long_schema();
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(self.properties()))?;

        let entries: Vec<(&str, &str, f64)> = table
            .iter()
            .map(|((fecha, variable), valor)| (fecha.as_str(), variable.as_str(), *valor))
            .collect();
        for chunk in entries.chunks(self.row_group_size) {
            let batch = Self::long_batch(chunk.iter().copied(), schema.clone())?;
            writer.write(&batch)?;
        }

        writer.close()?;
        Ok(())
    }

    pub fn read_long_table(&self, path: &Path) -> Result<BTreeMap<RecordKey, f64>> {
        let mut table = BTreeMap::new();
        for_each_long_row(path, |fecha, variable, valor| {
            table.insert((fecha.to_string(), variable.to_string()), valor);
            true
        })?;
        Ok(table)
    }

    /// Up to `limit` stored records in file order
    pub fn read_sample_records(&self, path: &Path, limit: usize) -> Result<Vec<LongFormRecord>> {
        let mut records = Vec::new();
        if limit == 0 {
            return Ok(records);
        }

        for_each_long_row(path, |fecha, variable, valor| {
            records.push(LongFormRecord {
                timestamp: fecha.to_string(),
                variable: variable.to_string(),
                value: valor,
            });
            records.len() < limit
        })?;
        Ok(records)
    }

    /// Write a normalized wide table: a timestamp column plus one nullable
    /// `Float64` column per variable, NaN stored as null
    pub fn write_wide_table(&self, table: &NormalizedWideTable, path: &Path) -> Result<()> {
        let mut fields = vec![Field::new(
            TIMESTAMP_COLUMN,
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        )];
        fields.extend(
            table
                .columns()
                .iter()
                .map(|name| Field::new(name, DataType::Float64, true)),
        );
        let schema = Arc::new(Schema::new(fields));

        let micros: Vec<i64> = table
            .timestamps()
            .iter()
            .map(|ts| Utc.from_utc_datetime(ts).timestamp_micros())
            .collect();
        let mut arrays: Vec<ArrayRef> = vec![Arc::new(TimestampMicrosecondArray::from(micros))];
        for name in table.columns() {
            let values: Vec<Option<f64>> = table
                .column(name)
                .unwrap_or(&[])
                .iter()
                .map(|v| (!v.is_nan()).then_some(*v))
                .collect();
            arrays.push(Arc::new(Float64Array::from(values)));
        }

        let batch = RecordBatch::try_new(schema.clone(), arrays)?;
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, schema, Some(self.properties()))?;
        writer.write(&batch)?;
        writer.close()?;

        debug!(
            "Wrote {} rows x {} columns to {}",
            table.row_count(),
            table.columns().len(),
            path.display()
        );
        Ok(())
    }

    /// Get file statistics
    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let row_groups = metadata.num_row_groups();
        let row_group_sizes = (0..row_groups)
            .map(|i| metadata.row_group(i).num_rows())
            .collect();
        let compression = if row_groups > 0 && metadata.row_group(0).num_columns() > 0 {
            metadata.row_group(0).column(0).compression()
        } else {
            self.compression
        };

        Ok(ParquetFileInfo {
            total_rows: metadata.file_metadata().num_rows(),
            row_groups: row_groups as i32,
            row_group_sizes,
            file_size: std::fs::metadata(path)?.len(),
            compression,
        })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Visit `(fecha, variable, valor)` rows until the callback returns false
fn for_each_long_row<F>(path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&str, &str, f64) -> bool,
{
    for_each_long_batch(path, |fechas, variables, valores| {
        for i in 0..fechas.len() {
            if !visit(fechas.value(i), variables.value(i), valores.value(i)) {
                return Ok(false);
            }
        }
        Ok(true)
    })
}

/// Visit the file one record batch at a time until the callback returns false
fn for_each_long_batch<F>(path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&StringArray, &StringArray, &Float64Array) -> Result<bool>,
{
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(READ_BATCH_SIZE)
        .build()?;

    for batch in reader {
        let batch = batch?;
        let fechas = string_column(&batch, "fecha")?;
        let variables = string_column(&batch, "variable")?;
        let valores = batch
            .column_by_name("valor")
            .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
            .ok_or_else(|| ProcessingError::Storage("Invalid valor column type".to_string()))?;

        if !visit(fechas, variables, valores)? {
            return Ok(());
        }
    }

    Ok(())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| ProcessingError::Storage(format!("Invalid {} column type", name)))
}

/// Records of an open transaction, spilled to `<store>.staging` as they arrive
struct StagingFile {
    path: PathBuf,
    writer: ArrowWriter<File>,
    schema: Arc<Schema>,
}

impl StagingFile {
    fn create(path: PathBuf, properties: WriterProperties) -> Result<Self> {
        let schema = ParquetWriter::long_schema();
        let writer = ArrowWriter::try_new(File::create(&path)?, schema.clone(), Some(properties))?;
        Ok(Self { path, writer, schema })
    }

    fn append(&mut self, records: &[LongFormRecord]) -> Result<()> {
        let rows = records
            .iter()
            .map(|r| (r.timestamp.as_str(), r.variable.as_str(), r.value));
        let batch = ParquetWriter::long_batch(rows, self.schema.clone())?;
        self.writer.write(&batch)?;
        // One row group per chunk
        self.writer.flush()?;
        Ok(())
    }

    /// Merge the staged batches into `table` in staging order
    fn merge(
        self,
        table: &mut BTreeMap<RecordKey, f64>,
        policy: ConflictPolicy,
    ) -> Result<InsertOutcome> {
        let path = self.path;
        let result = self.writer.close().map_err(ProcessingError::from).and_then(|_| {
            let mut outcome = InsertOutcome::default();
            for_each_long_batch(&path, |fechas, variables, valores| {
                let staged = (0..fechas.len())
                    .map(|i| LongFormRecord {
                        timestamp: fechas.value(i).to_string(),
                        variable: variables.value(i).to_string(),
                        value: valores.value(i),
                    })
                    .collect();
                outcome += merge_into(table, staged, policy)?;
                Ok(true)
            })?;
            Ok(outcome)
        });

        remove_staging(&path);
        result
    }

    fn discard(self) {
        let path = self.path;
        drop(self.writer);
        remove_staging(&path);
    }
}

fn remove_staging(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove staging file {}: {}", path.display(), e);
        }
    }
}

/// File-backed keyed store of long-format records.
///
/// Staged chunks go to a sibling staging file, so a transaction never holds
/// the incoming records in memory. A commit loads the current store, merges
/// the staged batches under the conflict policy and atomically replaces the
/// file; that rewrite costs time and memory proportional to the store size.
pub struct ParquetStore {
    path: PathBuf,
    writer: ParquetWriter,
    policy: ConflictPolicy,
    staging: Option<StagingFile>,
}

impl ParquetStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: ParquetWriter::new(),
            policy: ConflictPolicy::default(),
            staging: None,
        }
    }

    pub fn with_writer(mut self, writer: ParquetWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn staging_path(&self) -> PathBuf {
        self.path.with_extension("parquet.staging")
    }

    pub fn read_records(&self) -> Result<Vec<LongFormRecord>> {
        Ok(self
            .writer
            .read_long_table(&self.path)?
            .into_iter()
            .map(|((fecha, variable), valor)| LongFormRecord {
                timestamp: fecha,
                variable,
                value: valor,
            })
            .collect())
    }

    pub fn get_file_info(&self) -> Result<ParquetFileInfo> {
        self.writer.get_file_info(&self.path)
    }
}

impl RecordSink for ParquetStore {
    fn create_if_absent(&mut self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.writer.write_long_table(&BTreeMap::new(), &self.path)?;
        info!("Created store {}", self.path.display());
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if self.staging.is_some() {
            return Err(ProcessingError::Storage(
                "A transaction is already open".to_string(),
            ));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.staging = Some(StagingFile::create(self.staging_path(), self.writer.properties())?);
        Ok(())
    }

    fn insert_chunk(&mut self, records: &[LongFormRecord]) -> Result<()> {
        let staging = self
            .staging
            .as_mut()
            .ok_or_else(|| ProcessingError::Storage("No open transaction".to_string()))?;
        ensure_finite(records)?;
        staging.append(records)
    }

    fn commit(&mut self) -> Result<InsertOutcome> {
        let staging = self
            .staging
            .take()
            .ok_or_else(|| ProcessingError::Storage("No open transaction".to_string()))?;

        let mut table = if self.path.exists() {
            match self.writer.read_long_table(&self.path) {
                Ok(table) => table,
                Err(e) => {
                    staging.discard();
                    return Err(e);
                }
            }
        } else {
            BTreeMap::new()
        };

        let outcome = staging.merge(&mut table, self.policy)?;
        if outcome.inserted + outcome.replaced == 0 {
            return Ok(outcome);
        }

        let rewrite_path = self.path.with_extension("parquet.tmp");
        self.writer.write_long_table(&table, &rewrite_path)?;
        std::fs::rename(&rewrite_path, &self.path)?;
        debug!("Rewrote {} with {} records", self.path.display(), table.len());

        Ok(outcome)
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some(staging) = self.staging.take() {
            staging.discard();
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        let avg_rows = if self.row_groups > 0 {
            self.total_rows as f64 / self.row_groups as f64
        } else {
            0.0
        };

        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}\n\
            - Avg rows per group: {:.0}",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0,
            self.compression,
            avg_rows
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writers::record_sink::load_records;
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn record(fecha: &str, variable: &str, value: f64) -> Result<LongFormRecord> {
        Ok(LongFormRecord {
            timestamp: fecha.to_string(),
            variable: variable.to_string(),
            value,
        })
    }

    #[test]
    fn test_store_create_and_reload() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.parquet");
        let mut store = ParquetStore::new(&path);

        store.create_if_absent()?;
        assert!(path.exists());
        assert!(store.read_records()?.is_empty());

        let outcome = load_records(
            &mut store,
            vec![
                record("2023-01-01 00:10:00", "RH", 51.0),
                record("2023-01-01 00:00:00", "RH", 50.0),
            ],
            1,
            None,
        )?;
        assert_eq!(outcome.inserted, 2);

        let reopened = ParquetStore::new(&path);
        let records = reopened.read_records()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, "2023-01-01 00:00:00");
        assert_eq!(reopened.get_file_info()?.total_rows, 2);
        Ok(())
    }

    #[test]
    fn test_store_reinsert_is_idempotent() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.parquet");
        let batch = || vec![record("2023-01-01 00:00:00", "Ta", 20.0)];

        let mut store = ParquetStore::new(&path);
        load_records(&mut store, batch(), 10, None)?;
        let second = load_records(&mut store, batch(), 10, None)?;

        assert_eq!(second.ignored, 1);
        assert_eq!(store.read_records()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_failed_load_leaves_file_untouched() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.parquet");
        let mut store = ParquetStore::new(&path);
        load_records(&mut store, vec![record("2023-01-01 00:00:00", "Ta", 20.0)], 10, None)?;

        let failing = vec![
            record("2023-01-01 00:10:00", "Ta", 21.0),
            Err(ProcessingError::Storage("boom".to_string())),
        ];
        assert!(load_records(&mut store, failing, 1, None).is_err());
        assert_eq!(store.read_records()?.len(), 1);
        assert!(!store.staging_path().exists());
        Ok(())
    }

    #[test]
    fn test_chunks_are_staged_on_disk_until_commit() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.parquet");
        let mut store = ParquetStore::new(&path);
        store.create_if_absent()?;

        store.begin()?;
        assert!(store.begin().is_err());
        for minute in 0..30 {
            let fecha = format!("2023-01-01 00:{:02}:00", minute);
            store.insert_chunk(&[record(&fecha, "RH", minute as f64)?, record(&fecha, "Ta", 20.0)?])?;
        }
        assert!(store.staging_path().exists());
        assert!(store.read_records()?.is_empty());

        let outcome = store.commit()?;
        assert_eq!(outcome.inserted, 60);
        assert!(!store.staging_path().exists());
        assert_eq!(store.read_records()?.len(), 60);
        Ok(())
    }

    #[test]
    fn test_reject_spans_staged_chunks() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.parquet");
        let mut store = ParquetStore::new(&path).with_conflict_policy(ConflictPolicy::Reject);

        let records = vec![
            record("2023-01-01 00:00:00", "RH", 50.0),
            record("2023-01-01 00:10:00", "RH", 51.0),
            record("2023-01-01 00:00:00", "RH", 52.0),
        ];
        assert!(load_records(&mut store, records, 1, None).is_err());
        assert!(store.read_records()?.is_empty());
        assert!(!store.staging_path().exists());
        Ok(())
    }

    #[test]
    fn test_nan_chunk_is_refused() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut store = ParquetStore::new(&dir.path().join("store.parquet"));
        store.create_if_absent()?;
        store.begin()?;

        assert!(store.insert_chunk(&[record("2023-01-01 00:00:00", "RH", f64::NAN)?]).is_err());
        store.rollback()?;
        assert!(!store.staging_path().exists());
        Ok(())
    }

    #[test]
    fn test_different_compressions() -> Result<()> {
        let dir = TempDir::new().unwrap();
        for compression in ["snappy", "gzip", "lz4", "zstd", "none"] {
            let writer = ParquetWriter::new().with_compression(compression)?;
            let path = dir.path().join(format!("{}.parquet", compression));
            let mut store = ParquetStore::new(&path).with_writer(writer);

            let result = load_records(&mut store, vec![record("2023-01-01 00:00:00", "RH", 1.0)], 10, None);
            assert!(result.is_ok(), "Failed with compression: {}", compression);
        }

        assert!(ParquetWriter::new().with_compression("brotli-9").is_err());
        Ok(())
    }

    #[test]
    fn test_wide_table_with_nulls() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wide.parquet");
        let ts = NaiveDateTime::parse_from_str("2023-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let table = NormalizedWideTable::new(
            vec![ts],
            vec!["RH".into(), "Ta".into()],
            vec![vec![50.0], vec![f64::NAN]],
        )?;

        ParquetWriter::new().write_wide_table(&table, &path)?;
        let info = ParquetWriter::new().get_file_info(&path)?;
        assert_eq!(info.total_rows, 1);
        Ok(())
    }
}
