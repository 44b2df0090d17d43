pub mod parquet_writer;
pub mod record_sink;

pub use parquet_writer::{ParquetFileInfo, ParquetStore, ParquetWriter};
pub use record_sink::{load_records, merge_into, InsertOutcome, MemoryStore, RecordSink};
