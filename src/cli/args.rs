use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "esolmet-ingest")]
#[command(about = "Integrity checks and long-format loading for meteorological station CSV exports")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the integrity checks on one station file
    Validate {
        #[arg(short, long, help = "Input CSV file")]
        input: PathBuf,

        #[arg(short, long, help = "Site settings file (TOML, JSON or YAML)")]
        config: PathBuf,

        #[arg(long, default_value = "false", help = "Print the report as JSON")]
        json: bool,
    },

    /// Run the integrity checks on every file of a directory
    ValidateDir {
        #[arg(short, long, help = "Directory containing station files")]
        input_dir: PathBuf,

        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long, default_value = "csv")]
        extension: String,

        #[arg(long, default_value_t = num_cpus::get())]
        max_workers: usize,
    },

    /// Load a station file into the long-format store
    Export {
        #[arg(short, long, help = "Input CSV file")]
        input: PathBuf,

        #[arg(short, long)]
        config: PathBuf,

        #[arg(
            short,
            long,
            help = "Long-format Parquet store [default: output/esolmet-store-{YYMMDD}.parquet]"
        )]
        store: Option<PathBuf>,

        #[arg(long, help = "Records per insert chunk [default: from settings]")]
        chunk_size: Option<usize>,

        #[arg(long, default_value = "snappy")]
        compression: String,
    },

    /// List rows with irradiance while the sun is below the horizon
    Night {
        #[arg(short, long, help = "Input CSV file")]
        input: PathBuf,

        #[arg(short, long)]
        config: PathBuf,

        #[arg(
            long,
            value_delimiter = ',',
            help = "Irradiance columns to check [default: every configured irradiance variable]"
        )]
        columns: Vec<String>,
    },

    /// Compare the columns of every file in a directory against the first one
    Inspect {
        #[arg(short, long, help = "Directory containing station files")]
        input_dir: PathBuf,

        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long, default_value = "csv")]
        extension: String,
    },

    /// Convert station files to wide Parquet files
    Convert {
        #[arg(short, long, help = "Directory containing station files")]
        input_dir: PathBuf,

        #[arg(short, long, help = "Output directory for Parquet files")]
        output_dir: PathBuf,

        #[arg(short, long)]
        config: PathBuf,

        #[arg(long, default_value = "snappy")]
        compression: String,
    },

    /// Display information about a long-format store
    Info {
        #[arg(short, long)]
        store: PathBuf,

        #[arg(long, default_value = "10")]
        sample: usize,

        #[arg(short, long, help = "Site settings, used for display aliases")]
        config: Option<PathBuf>,
    },
}
