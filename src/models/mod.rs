pub mod record;
pub mod settings;
pub mod table;

pub use record::{pivot_to_wide, LongFormRecord};
pub use settings::{
    CheckSettings, ConflictPolicy, DuplicateKey, ExportSettings, NanScope, Settings, UtcOffset,
    VariableCatalog, VariableSpec,
};
pub use table::{ColumnType, NormalizationStats, NormalizedWideTable, RawRecordSet};
