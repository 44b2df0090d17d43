use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ProcessingError, Result};
use crate::models::Settings;
use crate::processors::parallel_processor::ParallelProcessor;
use crate::readers::CsvTableReader;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileColumnDiff {
    pub path: PathBuf,
    pub common: Vec<String>,
    /// Reference columns this file lacks
    pub missing: Vec<String>,
    /// Columns only this file has
    pub extra: Vec<String>,
}

impl FileColumnDiff {
    pub fn matches(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnComparison {
    pub reference: PathBuf,
    pub reference_columns: Vec<String>,
    pub files: Vec<FileColumnDiff>,
}

impl ColumnComparison {
    pub fn all_match(&self) -> bool {
        self.files.iter().all(FileColumnDiff::matches)
    }

    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!(
            "Reference: {} ({} columns)\n",
            self.reference.display(),
            self.reference_columns.len()
        ));

        for diff in &self.files {
            if diff.matches() {
                summary.push_str(&format!("  ✅ {}\n", diff.path.display()));
                continue;
            }
            summary.push_str(&format!("  ❌ {}\n", diff.path.display()));
            if !diff.missing.is_empty() {
                summary.push_str(&format!("     missing: {}\n", diff.missing.join(", ")));
            }
            if !diff.extra.is_empty() {
                summary.push_str(&format!("     extra: {}\n", diff.extra.join(", ")));
            }
        }

        summary
    }
}

/// Compare data column headers of every file in `dir` against the first one.
///
/// The timestamp column is left out of the comparison.
pub fn compare_columns(dir: &Path, extension: &str, settings: &Settings) -> Result<ColumnComparison> {
    let files = ParallelProcessor::discover_files(dir, extension)?;
    let reader = CsvTableReader::from_settings(settings)?;

    let (reference, others) = files.split_first().ok_or_else(|| {
        ProcessingError::InvalidFormat(format!(
            "No .{} files in {}",
            extension.trim_start_matches('.'),
            dir.display()
        ))
    })?;

    let data_columns = |path: &Path| -> Result<Vec<String>> {
        Ok(reader.read_headers(path)?.into_iter().skip(1).collect())
    };

    let reference_columns = data_columns(reference.as_path())?;
    let reference_set: HashSet<&str> = reference_columns.iter().map(String::as_str).collect();

    let mut diffs = Vec::with_capacity(others.len());
    for path in others {
        let columns = data_columns(path.as_path())?;
        let column_set: HashSet<&str> = columns.iter().map(String::as_str).collect();

        let diff = FileColumnDiff {
            path: path.clone(),
            common: reference_columns
                .iter()
                .filter(|c| column_set.contains(c.as_str()))
                .cloned()
                .collect(),
            missing: reference_columns
                .iter()
                .filter(|c| !column_set.contains(c.as_str()))
                .cloned()
                .collect(),
            extra: columns
                .iter()
                .filter(|c| !reference_set.contains(c.as_str()))
                .cloned()
                .collect(),
        };
        debug!(
            "{}: {} common, {} missing, {} extra",
            path.display(),
            diff.common.len(),
            diff.missing.len(),
            diff.extra.len()
        );
        diffs.push(diff);
    }

    Ok(ColumnComparison {
        reference: reference.clone(),
        reference_columns,
        files: diffs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UtcOffset, VariableSpec};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_compare_against_first_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("2021.csv"), "TIMESTAMP,RH,Ta,P\n").unwrap();
        std::fs::write(dir.path().join("2022.csv"), "TIMESTAMP,RH,Ta,P\n").unwrap();
        std::fs::write(dir.path().join("2023.csv"), "TIMESTAMP,RH,Ta,WS\n").unwrap();

        let settings = Settings::new(
            "test",
            0.0,
            0.0,
            UtcOffset::utc(),
            vec![VariableSpec::new("RH")],
        )
        .unwrap();
        let comparison = compare_columns(dir.path(), "csv", &settings).unwrap();

        assert_eq!(comparison.reference_columns, vec!["RH", "Ta", "P"]);
        assert!(comparison.files[0].matches());
        assert_eq!(comparison.files[1].missing, vec!["P"]);
        assert_eq!(comparison.files[1].extra, vec!["WS"]);
        assert!(!comparison.all_match());
        assert!(comparison.summary().contains("missing: P"));
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let settings =
            Settings::new("test", 0.0, 0.0, UtcOffset::utc(), vec![VariableSpec::new("RH")]).unwrap();
        assert!(compare_columns(dir.path(), "csv", &settings).is_err());
    }
}
