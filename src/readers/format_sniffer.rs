use encoding_rs::{CoderResult, Decoder, DecoderResult, Encoding, UTF_8};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ProcessingError, Result};
use crate::models::Settings;
use crate::utils::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_ENCODINGS, LEGACY_SKIP_ROWS, TIMESTAMP_COLUMN};

/// Header shape of a station export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderLayout {
    /// First line already holds the column names
    SingleHeader,
    /// Four header lines; only line 1 holds the column names
    LegacyLogger,
}

impl HeaderLayout {
    /// Zero-based rows to skip before reading the header
    pub fn skip_rows(&self) -> &'static [usize] {
        match self {
            HeaderLayout::SingleHeader => &[],
            HeaderLayout::LegacyLogger => &LEGACY_SKIP_ROWS,
        }
    }

    pub fn from_first_line(line: &str) -> Self {
        if line.contains(TIMESTAMP_COLUMN) {
            HeaderLayout::SingleHeader
        } else {
            HeaderLayout::LegacyLogger
        }
    }
}

/// Encoding a file was actually decoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    Legacy(&'static Encoding),
    /// UTF-8 with invalid sequences replaced
    Lossy,
}

impl SourceEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "UTF-8",
            SourceEncoding::Legacy(encoding) => encoding.name(),
            SourceEncoding::Lossy => "UTF-8 (lossy)",
        }
    }

    fn decoder_setup(&self) -> (&'static Encoding, bool) {
        match self {
            SourceEncoding::Utf8 => (UTF_8, false),
            SourceEncoding::Legacy(encoding) => (encoding, false),
            SourceEncoding::Lossy => (UTF_8, true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatReport {
    /// Whole file is valid UTF-8, independent of the fallback chain
    pub is_utf8: bool,
    pub encoding: SourceEncoding,
    pub header_layout: HeaderLayout,
}

/// Detects encoding and header layout without modifying the file.
///
/// Every pass streams the file through a fixed-size buffer; nothing here
/// holds the whole file in memory.
pub struct FormatSniffer {
    chain: Vec<(String, &'static Encoding)>,
    allow_lossy: bool,
}

impl FormatSniffer {
    pub fn new() -> Self {
        Self {
            chain: DEFAULT_ENCODINGS
                .iter()
                .filter_map(|label| Encoding::for_label(label.as_bytes()).map(|e| (label.to_string(), e)))
                .collect(),
            allow_lossy: true,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::with_chain(&settings.encodings, settings.allow_lossy_decode)
    }

    pub fn with_chain<S: AsRef<str>>(labels: &[S], allow_lossy: bool) -> Result<Self> {
        let chain = labels
            .iter()
            .map(|label| {
                let label = label.as_ref();
                Encoding::for_label(label.as_bytes())
                    .map(|encoding| (label.to_string(), encoding))
                    .ok_or_else(|| ProcessingError::Config(format!("Unknown encoding label '{}'", label)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { chain, allow_lossy })
    }

    /// Encoding and header layout of a file
    pub fn detect(&self, path: &Path) -> Result<FormatReport> {
        let utf8_line = scan(path, UTF_8, false)?;
        let is_utf8 = utf8_line.is_some();

        let mut chosen = None;
        for &(_, encoding) in &self.chain {
            let first_line = if encoding == UTF_8 {
                utf8_line.clone()
            } else {
                scan(path, encoding, false)?
            };
            if let Some(line) = first_line {
                let source = if encoding == UTF_8 {
                    SourceEncoding::Utf8
                } else {
                    SourceEncoding::Legacy(encoding)
                };
                chosen = Some((source, line));
                break;
            }
        }

        if chosen.is_none() && self.allow_lossy {
            warn!(
                "{} is not valid in any configured encoding, invalid bytes are replaced",
                path.display()
            );
            chosen = scan(path, UTF_8, true)?.map(|line| (SourceEncoding::Lossy, line));
        }

        let (encoding, first_line) = chosen.ok_or_else(|| {
            let mut tried: Vec<String> = self.chain.iter().map(|(label, _)| label.clone()).collect();
            if self.allow_lossy {
                tried.push("utf-8 (lossy)".to_string());
            }
            ProcessingError::Decode {
                path: path.to_path_buf(),
                tried,
            }
        })?;

        let report = FormatReport {
            is_utf8,
            encoding,
            header_layout: HeaderLayout::from_first_line(&first_line),
        };
        debug!(
            "{}: encoding={}, layout={:?}",
            path.display(),
            report.encoding.name(),
            report.header_layout
        );
        Ok(report)
    }

    /// Stream the file as UTF-8 text in the encoding `report` detected
    pub fn open(&self, path: &Path, report: &FormatReport) -> Result<DecodingReader<BufReader<File>>> {
        let (encoding, lossy) = report.encoding.decoder_setup();
        open_decoded(path, encoding, lossy)
    }
}

impl Default for FormatSniffer {
    fn default() -> Self {
        Self::new()
    }
}

fn open_decoded(path: &Path, encoding: &'static Encoding, lossy: bool) -> Result<DecodingReader<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(DecodingReader::new(
        BufReader::with_capacity(DEFAULT_BUFFER_SIZE, file),
        encoding,
        lossy,
    ))
}

/// One validating pass over the file. Returns the first decoded line, or
/// `None` when the bytes are not valid in `encoding`.
fn scan(path: &Path, encoding: &'static Encoding, lossy: bool) -> Result<Option<String>> {
    let mut reader = BufReader::new(open_decoded(path, encoding, lossy)?);
    let mut first_line = String::new();

    let scanned = reader
        .read_line(&mut first_line)
        .and_then(|_| io::copy(&mut reader, &mut io::sink()));
    match scanned {
        Ok(_) => Ok(Some(first_line)),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `Read` adapter that turns bytes in some encoding into UTF-8.
///
/// Strict readers fail with `InvalidData` on the first malformed sequence;
/// lossy readers substitute U+FFFD. A leading BOM of the encoding is removed.
pub struct DecodingReader<R> {
    inner: R,
    decoder: Decoder,
    lossy: bool,
    input: Vec<u8>,
    input_start: usize,
    input_end: usize,
    output: Vec<u8>,
    output_start: usize,
    output_end: usize,
    eof: bool,
    finished: bool,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding, lossy: bool) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder_with_bom_removal(),
            lossy,
            input: vec![0; DEFAULT_BUFFER_SIZE],
            input_start: 0,
            input_end: 0,
            output: vec![0; DEFAULT_BUFFER_SIZE * 3],
            output_start: 0,
            output_end: 0,
            eof: false,
            finished: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        if self.input_start == self.input_end && !self.eof {
            let n = self.inner.read(&mut self.input)?;
            self.input_start = 0;
            self.input_end = n;
            self.eof = n == 0;
        }

        let last = self.eof;
        let source = &self.input[self.input_start..self.input_end];
        let (read, written, drained) = if self.lossy {
            let (result, read, written, _) = self.decoder.decode_to_utf8(source, &mut self.output, last);
            (read, written, result == CoderResult::InputEmpty)
        } else {
            let (result, read, written) =
                self.decoder
                    .decode_to_utf8_without_replacement(source, &mut self.output, last);
            match result {
                DecoderResult::InputEmpty => (read, written, true),
                DecoderResult::OutputFull => (read, written, false),
                DecoderResult::Malformed(_, _) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed {} sequence", self.decoder.encoding().name()),
                    ));
                }
            }
        };

        self.input_start += read;
        self.output_start = 0;
        self.output_end = written;
        if last && drained {
            self.finished = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.output_start < self.output_end {
                let n = (self.output_end - self.output_start).min(buf.len());
                buf[..n].copy_from_slice(&self.output[self.output_start..self.output_start + n]);
                self.output_start += n;
                return Ok(n);
            }
            if self.finished || buf.is_empty() {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_bytes(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    fn read_text(sniffer: &FormatSniffer, path: &Path) -> (String, FormatReport) {
        let report = sniffer.detect(path).unwrap();
        let mut text = String::new();
        sniffer.open(path, &report).unwrap().read_to_string(&mut text).unwrap();
        (text, report)
    }

    #[test]
    fn test_single_header_has_no_skip() {
        let file = write_bytes(b"TIMESTAMP,I_glo_Avg,AirTC_Avg\n2023-01-01 00:00,0,12.5\n");
        let report = FormatSniffer::new().detect(file.path()).unwrap();

        assert_eq!(report.header_layout, HeaderLayout::SingleHeader);
        assert!(report.header_layout.skip_rows().is_empty());
        assert!(report.is_utf8);
        assert_eq!(report.encoding, SourceEncoding::Utf8);
    }

    #[test]
    fn test_legacy_header_skips_metadata_rows() {
        let file = write_bytes(
            b"\"TOA5\",\"ESOLMET\",\"CR1000\"\n\"TIMESTAMP\",\"RECORD\",\"I_glo_Avg\"\n\"TS\",\"RN\",\"W/m2\"\n\"\",\"\",\"Avg\"\n",
        );
        let report = FormatSniffer::new().detect(file.path()).unwrap();

        assert_eq!(report.header_layout, HeaderLayout::LegacyLogger);
        assert_eq!(report.header_layout.skip_rows(), &[0, 2, 3]);
    }

    #[test]
    fn test_latin1_falls_back() {
        // "Radiación" in windows-1252
        let file = write_bytes(b"TIMESTAMP,Radiaci\xF3n\n2023-01-01 00:00,1\n");
        let (text, report) = read_text(&FormatSniffer::new(), file.path());

        assert!(!report.is_utf8);
        assert_eq!(report.encoding.name(), "windows-1252");
        assert!(text.contains("Radiación"));
    }

    #[test]
    fn test_bom_is_stripped() {
        let file = write_bytes(b"\xEF\xBB\xBFTIMESTAMP,a\n");
        let (text, report) = read_text(&FormatSniffer::new(), file.path());

        assert!(report.is_utf8);
        assert!(text.starts_with("TIMESTAMP"));
    }

    #[test]
    fn test_decode_error_without_fallback() {
        let file = write_bytes(b"TIMESTAMP,Radiaci\xF3n\n");
        let sniffer = FormatSniffer::with_chain(&["utf-8"], false).unwrap();

        match sniffer.detect(file.path()) {
            Err(ProcessingError::Decode { tried, .. }) => assert_eq!(tried, vec!["utf-8"]),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_lossy_fallback() {
        let file = write_bytes(b"TIMESTAMP,a\xFF\n");
        let sniffer = FormatSniffer::with_chain(&["utf-8"], true).unwrap();
        let (text, report) = read_text(&sniffer, file.path());

        assert_eq!(report.encoding, SourceEncoding::Lossy);
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_invalid_byte_after_first_buffer_is_detected() {
        let mut bytes = b"TIMESTAMP,a\n".to_vec();
        while bytes.len() < DEFAULT_BUFFER_SIZE * 3 {
            bytes.extend_from_slice(b"2023-01-01 00:00:00,1\n");
        }
        bytes.extend_from_slice(b"2023-01-01 00:10:00,\xF3\n");
        let file = write_bytes(&bytes);

        let report = FormatSniffer::new().detect(file.path()).unwrap();
        assert!(!report.is_utf8);
        assert_eq!(report.encoding.name(), "windows-1252");
        assert_eq!(report.header_layout, HeaderLayout::SingleHeader);
    }

    #[test]
    fn test_decoding_reader_spans_buffer_boundaries() {
        let line = "2023-01-01 00:00:00,Radiación,ñ\n";
        let expected: String = std::iter::once("TIMESTAMP,a,b\n")
            .chain(std::iter::repeat(line).take(5000))
            .collect();
        let file = write_bytes(expected.as_bytes());

        let (text, report) = read_text(&FormatSniffer::new(), file.path());
        assert!(report.is_utf8);
        assert_eq!(text, expected);

        let (latin1, _, _) = encoding_rs::WINDOWS_1252.encode(&expected);
        let file = write_bytes(&latin1);
        let (text, report) = read_text(&FormatSniffer::new(), file.path());
        assert!(!report.is_utf8);
        assert_eq!(text, expected);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = FormatSniffer::new().detect(Path::new("does/not/exist.csv"));
        assert!(matches!(result, Err(ProcessingError::Io(_))));
    }
}
