pub mod column_comparator;
pub mod integrity_checker;
pub mod long_format;
pub mod parallel_processor;
pub mod schema_normalizer;

pub use column_comparator::{compare_columns, ColumnComparison, FileColumnDiff};
pub use integrity_checker::{
    CheckEntry, CheckOutcome, IntegrityCheck, IntegrityChecker, IntegrityReport,
};
pub use long_format::{melt, ExportStats, LongFormIter, LongFormatExporter};
pub use parallel_processor::{FileValidation, ParallelProcessor};
pub use schema_normalizer::{ColumnSelection, SchemaNormalizer};
