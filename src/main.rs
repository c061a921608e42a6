use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;

use searchable_pdf::{Config, EngineKind, JobStatus};

#[derive(Parser, Debug)]
#[command(
    name = "searchable-pdf",
    version,
    about = "Turn scanned documents (PDF, PNG, JPEG) into searchable PDFs"
)]
struct Cli {
    /// Files to convert
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// OCR engine
    #[arg(short = 'e', long = "engine", value_enum)]
    engine: Option<EngineKind>,

    /// Rasterization resolution for PDF pages
    #[arg(long = "dpi")]
    dpi: Option<u32>,

    /// Downscale images whose longest side exceeds this (0 disables)
    #[arg(long = "max-dimension")]
    max_dimension: Option<u32>,

    /// Tesseract languages (e.g. eng+deu)
    #[arg(short = 'l', long = "languages")]
    languages: Option<String>,

    /// Concurrent jobs (0 = number of CPUs)
    #[arg(short = 'w', long = "workers")]
    workers: Option<usize>,

    /// Directory for the generated PDFs (default: next to each input)
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "settings")]
    settings: Option<PathBuf>,

    /// Print job results as JSON
    #[arg(long = "json")]
    json: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    searchable_pdf::logging::init(cli.verbose)?;

    let json = cli.json;
    let config = Config {
        inputs: cli.inputs,
        engine: cli.engine,
        dpi: cli.dpi,
        max_dimension: cli.max_dimension,
        languages: cli.languages,
        workers: cli.workers,
        output_dir: cli.output_dir,
        settings_path: cli.settings,
    };
    let jobs = searchable_pdf::run(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
    } else {
        for job in &jobs {
            match job.status {
                JobStatus::Completed => println!(
                    "{}\t{}\t{}",
                    job.status,
                    job.input_path.display(),
                    job.output_path.display()
                ),
                _ => println!(
                    "{}\t{}\t{}",
                    job.status,
                    job.input_path.display(),
                    job.error_detail.as_deref().unwrap_or("unknown error")
                ),
            }
        }
    }

    let failed = jobs
        .iter()
        .filter(|job| job.status != JobStatus::Completed)
        .count();
    if failed > 0 {
        return Err(anyhow!("{} of {} job(s) failed", failed, jobs.len()));
    }
    Ok(())
}
