use anyhow::{Context, Result, anyhow};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub mod error;
pub mod job;
pub mod logging;
pub mod ocr;
mod paths;
pub mod pdf;
pub mod pipeline;
pub mod queue;
pub mod raster;
pub mod settings;
#[cfg(test)]
mod test_util;

pub use error::{
    BlockRenderError, CompositionError, OcrEngineError, PipelineError, RasterizationError,
};
pub use job::{DocumentJob, JobId, JobStatus, JobStatusSink, MemoryJobStore};
pub use ocr::{EngineKind, OcrEngine, Point, Quad, TextBlock};
pub use paths::output_file_name;
pub use pipeline::Pipeline;
pub use queue::JobQueue;
pub use raster::Rasterizer;
pub use settings::Settings;

/// Command-line overrides layered on top of the settings files.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub inputs: Vec<PathBuf>,
    pub engine: Option<EngineKind>,
    pub dpi: Option<u32>,
    pub max_dimension: Option<u32>,
    pub languages: Option<String>,
    pub workers: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
}

impl Config {
    fn apply(&self, settings: &mut Settings) {
        if let Some(engine) = self.engine {
            settings.engine = engine;
        }
        if let Some(dpi) = self.dpi.filter(|dpi| *dpi > 0) {
            settings.dpi = dpi;
        }
        if let Some(max_dimension) = self.max_dimension {
            settings.max_dimension = if max_dimension > 0 {
                Some(max_dimension)
            } else {
                None
            };
        }
        if let Some(languages) = self.languages.as_ref() {
            if !languages.trim().is_empty() {
                settings.languages = languages.trim().to_string();
            }
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
    }
}

/// Converts every input and returns the final state of each job, in input order.
pub async fn run(config: Config) -> Result<Vec<DocumentJob>> {
    if config.inputs.is_empty() {
        return Err(anyhow!("no input files given"));
    }
    let mut settings = settings::load_settings(config.settings_path.as_deref())?;
    config.apply(&mut settings);
    if let Some(dir) = config.output_dir.as_ref() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
    }

    let store = Arc::new(MemoryJobStore::new());
    let pipeline = Pipeline::from_settings(&settings, store.clone())
        .with_context(|| format!("failed to initialise the {} engine", settings.engine))?;
    let workers = settings.effective_workers();
    info!(
        "converting {} file(s) with {} worker(s), engine {}",
        config.inputs.len(),
        workers,
        settings.engine
    );
    let queue = JobQueue::start(Arc::new(pipeline), workers, settings.queue_capacity);

    let mut ids = Vec::with_capacity(config.inputs.len());
    let mut claimed = HashSet::new();
    for input in &config.inputs {
        match validate_input(&settings, input) {
            Ok(()) => {
                let output = claim_output_path(input, config.output_dir.as_deref(), &mut claimed);
                ids.push(queue.submit(input.clone(), output).await?);
            }
            Err(message) => {
                warn!("rejecting {}: {}", input.display(), message);
                let output = output_path_for(input, config.output_dir.as_deref());
                let job = DocumentJob::new(JobId::new(), input, &output);
                store.record_rejected(&job, &message);
                ids.push(job.job_id);
            }
        }
    }
    queue.shutdown().await?;

    Ok(ids.iter().filter_map(|id| store.get(id)).collect())
}

/// `editable_<stem>.pdf` next to the input, or inside `output_dir`.
pub fn output_path_for(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let name = output_file_name(input);
    match output_dir {
        Some(dir) => dir.join(name),
        None => input
            .parent()
            .map(|parent| parent.join(&name))
            .unwrap_or_else(|| PathBuf::from(&name)),
    }
}

/// Like [`output_path_for`], but never returns a path that already exists or
/// that an earlier input of the same batch was given. Collisions get a
/// numeric suffix: `editable_scan-2.pdf`, `editable_scan-3.pdf`, ...
pub fn claim_output_path(
    input: &Path,
    output_dir: Option<&Path>,
    claimed: &mut HashSet<PathBuf>,
) -> PathBuf {
    let preferred = output_path_for(input, output_dir);
    let mut candidate = preferred.clone();
    let mut counter = 2;
    while claimed.contains(&candidate) || candidate.exists() {
        candidate = numbered_path(&preferred, counter);
        counter += 1;
    }
    claimed.insert(candidate.clone());
    candidate
}

fn numbered_path(path: &Path, counter: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("editable_document");
    path.with_file_name(format!("{stem}-{counter}.pdf"))
}

/// Upload-boundary checks: existence, extension allow-list and size limit.
pub fn validate_input(settings: &Settings, input: &Path) -> std::result::Result<(), String> {
    let metadata = fs::metadata(input).map_err(|err| format!("cannot read input: {err}"))?;
    if !metadata.is_file() {
        return Err("input is not a file".to_string());
    }
    if !settings.is_allowed_extension(input) {
        return Err(format!(
            "file type not allowed (allowed: {})",
            settings.allowed_extensions.join(", ")
        ));
    }
    if let Some(limit) = settings.max_input_bytes {
        if metadata.len() > limit {
            return Err(format!(
                "file is {} bytes, larger than the {} byte limit",
                metadata.len(),
                limit
            ));
        }
    }
    Ok(())
}
