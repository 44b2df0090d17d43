pub mod csv_table_reader;
pub mod format_sniffer;

pub use csv_table_reader::{CsvTableReader, RowStream};
pub use format_sniffer::{DecodingReader, FormatReport, FormatSniffer, HeaderLayout, SourceEncoding};
