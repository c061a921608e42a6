use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{OcrEngineError, PipelineError};
use crate::job::{JobId, JobStatus, JobStatusSink};
use crate::ocr::{self, OcrEngine};
use crate::pdf::{self, PageContent};
use crate::raster::Rasterizer;
use crate::settings::Settings;

/// Runs one document through rasterize, OCR and compose, reporting the
/// outcome to the status sink. Safe to share between worker threads.
pub struct Pipeline {
    rasterizer: Rasterizer,
    engine: Arc<dyn OcrEngine>,
    sink: Arc<dyn JobStatusSink>,
}

impl Pipeline {
    pub fn new(
        rasterizer: Rasterizer,
        engine: Arc<dyn OcrEngine>,
        sink: Arc<dyn JobStatusSink>,
    ) -> Self {
        Self {
            rasterizer,
            engine,
            sink,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        sink: Arc<dyn JobStatusSink>,
    ) -> Result<Self, OcrEngineError> {
        let engine = ocr::build_engine(settings)?;
        Ok(Self::new(Rasterizer::from_settings(settings), engine, sink))
    }

    pub fn sink(&self) -> &Arc<dyn JobStatusSink> {
        &self.sink
    }

    pub fn process(&self, job_id: &JobId, input: &Path, output: &Path) -> JobStatus {
        let started = Instant::now();
        self.sink.mark_processing(job_id);
        info!(
            "job {}: processing {} with {}",
            job_id,
            input.display(),
            self.engine.kind()
        );

        let mut rasters = Vec::new();
        let outcome = self.run(job_id, input, output, &mut rasters);
        self.cleanup(job_id, input, &rasters);
        let elapsed = started.elapsed();

        match outcome {
            Ok(pages) => {
                info!(
                    "job {}: completed {} page(s) in {:.2}s",
                    job_id,
                    pages,
                    elapsed.as_secs_f64()
                );
                self.sink.mark_completed(job_id, elapsed);
                JobStatus::Completed
            }
            Err(err) => {
                let message = err.to_string();
                error!("job {}: {}", job_id, message);
                self.sink.mark_failed(job_id, elapsed, &message);
                JobStatus::Failed
            }
        }
    }

    fn run(
        &self,
        job_id: &JobId,
        input: &Path,
        output: &Path,
        rasters: &mut Vec<PathBuf>,
    ) -> Result<usize, PipelineError> {
        *rasters = self.rasterizer.rasterize(job_id, input)?;
        self.compose_pages(job_id, rasters, output)
    }

    /// OCRs the rasters in page order and composes them. The first page that
    /// fails to recognize aborts the job before anything is written.
    fn compose_pages(
        &self,
        job_id: &JobId,
        rasters: &[PathBuf],
        output: &Path,
    ) -> Result<usize, PipelineError> {
        let mut pages = Vec::with_capacity(rasters.len());
        for (idx, raster) in rasters.iter().enumerate() {
            let blocks = self
                .engine
                .recognize(raster)
                .map_err(|source| PipelineError::Ocr {
                    page: idx + 1,
                    source,
                })?;
            let blocks = ocr::renderable_blocks(blocks);
            debug!("job {}: page {} has {} block(s)", job_id, idx + 1, blocks.len());
            pages.push(PageContent {
                raster: raster.clone(),
                blocks,
            });
        }

        pdf::compose(&pages, output)?;
        Ok(pages.len())
    }

    /// Best effort; the caller's input file is never touched.
    fn cleanup(&self, job_id: &JobId, input: &Path, rasters: &[PathBuf]) {
        for raster in rasters.iter().filter(|raster| raster.as_path() != input) {
            if let Err(err) = fs::remove_file(raster) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!("job {}: failed to remove {}: {}", job_id, raster.display(), err);
                }
            }
        }
        let dir = self.rasterizer.job_dir(job_id);
        if dir.exists() {
            if let Err(err) = fs::remove_dir_all(&dir) {
                warn!("job {}: failed to remove {}: {}", job_id, dir.display(), err);
            }
        }
    }
}
