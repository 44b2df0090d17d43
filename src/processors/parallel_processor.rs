use crate::error::{ProcessingError, Result};
use crate::models::Settings;
use crate::processors::integrity_checker::{IntegrityChecker, IntegrityReport};
use crate::utils::progress::ProgressReporter;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Outcome of validating one file in a directory run
#[derive(Debug)]
pub struct FileValidation {
    pub path: PathBuf,
    pub result: Result<IntegrityReport>,
}

impl FileValidation {
    pub fn passed(&self) -> bool {
        self.result.as_ref().is_ok_and(IntegrityReport::all_passed)
    }
}

/// Validates independent files on a bounded rayon pool
pub struct ParallelProcessor {
    max_workers: usize,
}

impl ParallelProcessor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Files in `dir` with the given extension (case-insensitive), sorted by name
    pub fn discover_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
        let extension = extension.trim_start_matches('.');
        let mut files = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension));
            if path.is_file() && matches {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Run the integrity checks on every file; one failing file never stops the others
    pub fn validate_files(
        &self,
        files: &[PathBuf],
        settings: &Settings,
        progress: Option<&ProgressReporter>,
    ) -> Result<Vec<FileValidation>> {
        let processed = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        let results: Vec<FileValidation> = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let result = IntegrityChecker::new(settings).run_checks(path);
                    if let Err(e) = &result {
                        warn!("{}: {}", path.display(), e);
                    }

                    let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(p) = progress {
                        p.update(count as u64);
                    }

                    FileValidation {
                        path: path.clone(),
                        result,
                    }
                })
                .collect()
        });

        let passed = results.iter().filter(|r| r.passed()).count();
        info!("{} of {} files passed every check", passed, results.len());

        if let Some(p) = progress {
            p.finish_with_message(&format!("Validated {} files", results.len()));
        }

        Ok(results)
    }

    pub fn validate_dir(
        &self,
        dir: &Path,
        extension: &str,
        settings: &Settings,
        progress: Option<&ProgressReporter>,
    ) -> Result<Vec<FileValidation>> {
        let files = Self::discover_files(dir, extension)?;
        self.validate_files(&files, settings, progress)
    }
}

impl Default for ParallelProcessor {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}
