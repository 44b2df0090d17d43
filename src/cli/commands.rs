use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, Level};

use crate::analyzers::StoreAnalyzer;
use crate::cli::args::{Cli, Commands};
use crate::error::Result;
use crate::models::{pivot_to_wide, Settings};
use crate::pipeline::IngestPipeline;
use crate::processors::{compare_columns, IntegrityChecker, ParallelProcessor};
use crate::utils::filename::generate_default_store_filename;
use crate::utils::progress::ProgressReporter;
use crate::writers::{ParquetStore, ParquetWriter};

/// Install the fmt subscriber: DEBUG with `--verbose`, INFO otherwise
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = tracing_subscriber::fmt().with_max_level(level).with_target(false);

    let installed = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = File::create(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    // A subscriber may already be installed when running embedded
    if let Err(e) = installed {
        eprintln!("Logging already initialised: {}", e);
    }
    Ok(())
}

pub async fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Validate {
            input,
            config,
            json,
        } => {
            let settings = Settings::load(&config)?;
            let report = IngestPipeline::new(&settings).validate(&input)?;

            if json {
                println!("{}", report.to_json()?);
            } else {
                let checker = IntegrityChecker::new(&settings);
                println!("{}", checker.generate_summary(&report));
            }

            if report.all_passed() {
                println!("✅ All checks passed");
            } else {
                println!("⚠️  {} checks did not pass", report.failures().count());
            }
        }

        Commands::ValidateDir {
            input_dir,
            config,
            extension,
            max_workers,
        } => {
            println!("Validating station files...");
            println!("Input directory: {}", input_dir.display());
            println!("Workers: {}", max_workers);

            let settings = Settings::load(&config)?;
            let files = ParallelProcessor::discover_files(&input_dir, &extension)?;
            if files.is_empty() {
                println!("No .{} files found", extension.trim_start_matches('.'));
                return Ok(());
            }

            let worker_settings = settings.clone();
            let results = tokio::task::spawn_blocking(move || {
                let progress = ProgressReporter::new(files.len() as u64, "Validating files...", false);
                ParallelProcessor::new(max_workers).validate_files(
                    &files,
                    &worker_settings,
                    Some(&progress),
                )
            })
            .await??;

            let checker = IntegrityChecker::new(&settings);
            let mut failed = 0;
            for validation in &results {
                match &validation.result {
                    Ok(report) if report.all_passed() => {
                        println!("✅ {}", validation.path.display());
                    }
                    Ok(report) => {
                        failed += 1;
                        println!("❌ {}", validation.path.display());
                        println!("{}", checker.generate_summary(report));
                    }
                    Err(e) => {
                        failed += 1;
                        println!("❌ {}: {}", validation.path.display(), e);
                    }
                }
            }

            println!(
                "\n{} of {} files passed every check",
                results.len() - failed,
                results.len()
            );
        }

        Commands::Export {
            input,
            config,
            store,
            chunk_size,
            compression,
        } => {
            let mut settings = Settings::load(&config)?;
            if let Some(size) = chunk_size {
                settings.export.chunk_size = size.max(1);
            }

            let store_path = store.unwrap_or_else(generate_default_store_filename);
            if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }

            println!("Exporting {}", input.display());
            println!("Store: {}", store_path.display());

            let writer = ParquetWriter::new().with_compression(&compression)?;
            let mut sink = ParquetStore::new(&store_path)
                .with_writer(writer)
                .with_conflict_policy(settings.export.conflict);

            let progress = ProgressReporter::new_spinner("Loading records...", false);
            let summary = IngestPipeline::new(&settings).export_into(&input, &mut sink, Some(&progress))?;
            progress.finish_with_message(&format!("Staged {} records", summary.outcome.staged()));

            println!("\n{}", summary.summary());
            println!("{}", sink.get_file_info()?.summary());
        }

        Commands::Night {
            input,
            config,
            columns,
        } => {
            let settings = Settings::load(&config)?;
            let selected = (!columns.is_empty()).then_some(columns.as_slice());
            let anomalies = IngestPipeline::new(&settings).night_anomalies(&input, selected)?;

            if anomalies.is_empty() {
                println!("✅ No irradiance recorded with the sun below the horizon");
                return Ok(());
            }

            let labels: Vec<&str> = anomalies
                .columns
                .iter()
                .map(|c| settings.variables.alias_for(c))
                .collect();
            println!("{} rows with night irradiance", anomalies.len());
            println!("TIMESTAMP,solar_elevation,{}", labels.join(","));
            for row in &anomalies.rows {
                let values: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
                println!("{},{:.2},{}", row.timestamp, row.solar_elevation, values.join(","));
            }
        }

        Commands::Inspect {
            input_dir,
            config,
            extension,
        } => {
            let settings = Settings::load(&config)?;
            let comparison = compare_columns(&input_dir, &extension, &settings)?;
            println!("{}", comparison.summary());

            if comparison.all_match() {
                println!("✅ All files share the reference columns");
            }
        }

        Commands::Convert {
            input_dir,
            output_dir,
            config,
            compression,
        } => {
            let settings = Settings::load(&config)?;
            let writer = ParquetWriter::new().with_compression(&compression)?;
            let files = ParallelProcessor::discover_files(&input_dir, "csv")?;

            let progress = ProgressReporter::new(files.len() as u64, "Converting files...", false);
            let pipeline = IngestPipeline::new(&settings);
            let mut written: Vec<PathBuf> = Vec::with_capacity(files.len());
            for path in &files {
                match pipeline.convert(path, &output_dir, &writer) {
                    Ok(output) => written.push(output),
                    Err(e) => progress.println(&format!("❌ {}: {}", path.display(), e)),
                }
                progress.increment(1);
            }
            progress.finish_with_message(&format!("Converted {} of {} files", written.len(), files.len()));
            info!("Parquet files written to {}", output_dir.display());
        }

        Commands::Info {
            store,
            sample,
            config,
        } => {
            println!("Analyzing store: {}", store.display());

            let settings = config.as_deref().map(Settings::load).transpose()?;
            let catalog = settings.as_ref().map(|s| &s.variables);

            let parquet_store = ParquetStore::new(&store);
            let records = parquet_store.read_records()?;
            let summary = StoreAnalyzer::new().analyze(&records)?;
            println!("\n{}", summary.detailed_summary(catalog));

            let column_order: Option<Vec<String>> =
                catalog.map(|c| c.canonical_names().map(str::to_string).collect());
            let wide = pivot_to_wide(&records, column_order.as_deref())?;
            println!(
                "Wide shape: {} timestamps x {} variables ({} empty cells)",
                wide.row_count(),
                wide.columns().len(),
                wide.nan_count()
            );

            println!("\nFile Details:");
            println!("{}", parquet_store.get_file_info()?.summary());

            if sample > 0 {
                println!("\nSample Records (showing up to {} records):", sample);
                match ParquetWriter::new().read_sample_records(&store, sample) {
                    Ok(records) => {
                        for (i, record) in records.iter().enumerate() {
                            let label = catalog.map_or(record.variable.as_str(), |c| {
                                c.alias_for(&record.variable)
                            });
                            println!("{}. {} {} = {}", i + 1, record.timestamp, label, record.value);
                        }
                    }
                    Err(e) => println!("Error reading sample data: {}", e),
                }
            }
        }
    }

    Ok(())
}
