pub mod constants;
pub mod filename;
pub mod progress;

pub use constants::*;
pub use filename::{generate_default_store_filename, parquet_path_for};
pub use progress::ProgressReporter;
