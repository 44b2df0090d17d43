use csv::{ReaderBuilder, StringRecordsIntoIter};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

use crate::error::{ProcessingError, Result};
use crate::models::{RawRecordSet, Settings};
use crate::readers::format_sniffer::{DecodingReader, FormatReport, FormatSniffer};
use crate::utils::constants::UNNAMED_PREFIX;

type DecodedRecords = StringRecordsIntoIter<DecodingReader<BufReader<File>>>;

/// Reads a station export into a `RawRecordSet`, honouring the detected
/// encoding and header layout.
pub struct CsvTableReader {
    sniffer: FormatSniffer,
}

impl CsvTableReader {
    pub fn new() -> Self {
        Self {
            sniffer: FormatSniffer::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            sniffer: FormatSniffer::from_settings(settings)?,
        })
    }

    /// Open a file for row-by-row reading. Only the header row is consumed.
    pub fn stream(&self, path: &Path) -> Result<RowStream> {
        let report = self.sniffer.detect(path)?;
        let decoded = self.sniffer.open(path, &report)?;
        let records = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(decoded)
            .into_records();

        let mut stream = RowStream {
            headers: Vec::new(),
            report,
            records,
            index: 0,
        };
        stream.headers = match stream.next_kept().transpose()? {
            Some(header) => normalize_headers(&header),
            None => return Err(no_header(path)),
        };
        Ok(stream)
    }

    pub fn read(&self, path: &Path) -> Result<(RawRecordSet, FormatReport)> {
        let mut stream = self.stream(path)?;
        let rows = stream.by_ref().collect::<Result<Vec<_>>>()?;
        let raw = RawRecordSet::new(stream.headers, rows, stream.report.encoding.name());

        debug!(
            "Read {} rows x {} columns from {}",
            raw.len(),
            raw.headers.len(),
            path.display()
        );
        Ok((raw, stream.report))
    }

    /// Only the header row, after skipping the layout's metadata rows
    pub fn read_headers(&self, path: &Path) -> Result<Vec<String>> {
        Ok(self.stream(path)?.headers)
    }
}

impl Default for CsvTableReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Data rows of an open file, padded or cut to the header width
pub struct RowStream {
    pub headers: Vec<String>,
    pub report: FormatReport,
    records: DecodedRecords,
    index: usize,
}

impl RowStream {
    fn next_kept(&mut self) -> Option<Result<Vec<String>>> {
        let skip = self.report.header_layout.skip_rows();
        loop {
            let record = self.records.next()?;
            let index = self.index;
            self.index += 1;
            if skip.contains(&index) {
                continue;
            }
            return Some(
                record
                    .map(|r| r.iter().map(str::to_string).collect())
                    .map_err(ProcessingError::from),
            );
        }
    }
}

impl Iterator for RowStream {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        let width = self.headers.len();
        self.next_kept().map(|row| {
            row.map(|mut cells| {
                cells.resize(width, String::new());
                cells
            })
        })
    }
}

fn no_header(path: &Path) -> ProcessingError {
    ProcessingError::InvalidFormat(format!("{} has no header row", path.display()))
}

/// Trim names, label blank ones `Unnamed: N` and suffix repeats `.1`, `.2`.
fn normalize_headers(header: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    header
        .iter()
        .enumerate()
        .map(|(index, cell)| {
            let name = cell.trim();
            let name = if name.is_empty() {
                format!("{}: {}", UNNAMED_PREFIX, index)
            } else {
                name.to_string()
            };

            let count = seen.entry(name.clone()).or_insert(0);
            let unique = if *count == 0 {
                name
            } else {
                format!("{}.{}", name, count)
            };
            *count += 1;
            unique
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_single_header() {
        let file = write_csv("TIMESTAMP,I_glo_Avg,AirTC_Avg\n2023-01-01 00:00,0,12.5\n2023-01-01 00:10,1,12.4\n");
        let (raw, report) = CsvTableReader::new().read(file.path()).unwrap();

        assert!(report.header_layout.skip_rows().is_empty());
        assert_eq!(raw.headers, vec!["TIMESTAMP", "I_glo_Avg", "AirTC_Avg"]);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.rows[1], vec!["2023-01-01 00:10", "1", "12.4"]);
    }

    #[test]
    fn test_legacy_header() {
        let file = write_csv(concat!(
            "\"TOA5\",\"ESOLMET\",\"CR1000\",\"\"\n",
            "\"TIMESTAMP\",\"RECORD\",\"I_glo_Avg\",\"\"\n",
            "\"TS\",\"RN\",\"W/m2\",\"\"\n",
            "\"\",\"\",\"Avg\",\"\"\n",
            "\"2023-01-01 00:00:00\",1,0.5,\n",
        ));
        let (raw, _) = CsvTableReader::new().read(file.path()).unwrap();

        assert_eq!(raw.headers, vec!["TIMESTAMP", "RECORD", "I_glo_Avg", "Unnamed: 3"]);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw.rows[0][2], "0.5");
    }

    #[test]
    fn test_duplicate_headers_are_suffixed() {
        let headers = vec!["a".to_string(), " a ".to_string(), "b".to_string(), "a".to_string()];
        assert_eq!(normalize_headers(&headers), vec!["a", "a.1", "b", "a.2"]);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let file = write_csv("TIMESTAMP,a,b\n2023-01-01 00:00,1\n");
        let (raw, _) = CsvTableReader::new().read(file.path()).unwrap();
        assert_eq!(raw.rows[0], vec!["2023-01-01 00:00", "1", ""]);
    }

    #[test]
    fn test_empty_file_has_no_header() {
        let file = write_csv("");
        let result = CsvTableReader::new().read(file.path());
        assert!(matches!(result, Err(ProcessingError::InvalidFormat(_))));
    }

    #[test]
    fn test_stream_yields_rows_lazily() {
        let mut content = String::from("TIMESTAMP,a,b\n");
        for i in 0..20_000 {
            content.push_str(&format!("2023-01-01 00:00:00,{},x,extra\n", i));
        }
        let file = write_csv(&content);

        let mut stream = CsvTableReader::new().stream(file.path()).unwrap();
        assert_eq!(stream.headers, vec!["TIMESTAMP", "a", "b"]);
        assert_eq!(stream.next().unwrap().unwrap(), vec!["2023-01-01 00:00:00", "0", "x"]);
        assert_eq!(stream.by_ref().take(9).count(), 9);
        assert_eq!(stream.next().unwrap().unwrap()[1], "10");
        assert_eq!(stream.count(), 20_000 - 11);
    }

    #[test]
    fn test_read_headers_only() {
        let file = write_csv("TIMESTAMP,RH,Ta\n2023-01-01 00:00,50,20\n");
        let headers = CsvTableReader::new().read_headers(file.path()).unwrap();
        assert_eq!(headers, vec!["TIMESTAMP", "RH", "Ta"]);
    }
}
