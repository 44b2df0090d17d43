/// Canonical name of the timestamp column
pub const TIMESTAMP_COLUMN: &str = "TIMESTAMP";

/// Logger internal sequence column
pub const RECORD_COLUMN: &str = "RECORD";

/// Prefix given to header cells that were blank in the source file
pub const UNNAMED_PREFIX: &str = "Unnamed";

/// Legacy logger header: rows 0, 2 and 3 are metadata, row 1 holds the names
pub const LEGACY_SKIP_ROWS: [usize; 3] = [0, 2, 3];

/// Tokens treated as missing values during export
pub const NULL_TOKENS: [&str; 5] = ["Na", "nan", "NaN", "-", ""];

/// Export timestamp format
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp formats tried in order. Year-first layouts are unambiguous and go
/// first; everything else is read day-first.
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

/// Date-only formats, interpreted as midnight
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Processing defaults
pub const DEFAULT_MIN_YEAR: i32 = 2010;
pub const DEFAULT_CHUNK_SIZE: usize = 5000;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;
pub const DEFAULT_BUFFER_SIZE: usize = 8192 * 16; // 128KB

/// Encoding fallback chain used when the settings do not name one
pub const DEFAULT_ENCODINGS: &[&str] = &["utf-8", "windows-1252"];

/// Environment prefix for settings overrides
pub const ENV_PREFIX: &str = "ESOLMET";

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
