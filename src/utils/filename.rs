use chrono::{Datelike, Local};
use std::path::{Path, PathBuf};

/// Default long-format store: `output/esolmet-store-{YYMMDD}.parquet`
pub fn generate_default_store_filename() -> PathBuf {
    let now = Local::now();
    let filename = format!(
        "esolmet-store-{:02}{:02}{:02}.parquet",
        now.year() % 100,
        now.month(),
        now.day()
    );
    PathBuf::from("output").join(filename)
}

/// Wide Parquet file for a CSV export, named after the input file
pub fn parquet_path_for(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "station".to_string());
    output_dir.join(format!("{}.parquet", stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_default_store_filename() {
        let filename = generate_default_store_filename();
        let filename_str = filename.to_string_lossy();

        assert!(filename_str.starts_with("output/"));
        let file_part = filename_str.trim_start_matches("output/");
        assert!(file_part.starts_with("esolmet-store-"));
        assert!(file_part.ends_with(".parquet"));
        assert_eq!(file_part.len(), "esolmet-store-YYMMDD.parquet".len());
    }

    #[test]
    fn test_parquet_path_for() {
        let path = parquet_path_for(Path::new("data/2023_ESOLMET.csv"), Path::new("out"));
        assert_eq!(path, PathBuf::from("out/2023_ESOLMET.parquet"));
    }
}
