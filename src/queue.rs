use anyhow::{Result, anyhow};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error};

use crate::job::{DocumentJob, JobId, JobStatusSink};
use crate::pipeline::Pipeline;

struct QueuedJob {
    job_id: JobId,
    input: PathBuf,
    output: PathBuf,
}

/// Bounded background worker pool. At most `workers` jobs run at once; each
/// runs on the blocking thread pool since rasterizing and OCR are CPU and
/// subprocess bound.
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    dispatcher: JoinHandle<()>,
    pipeline: Arc<Pipeline>,
}

impl JobQueue {
    pub fn start(pipeline: Arc<Pipeline>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dispatcher = tokio::spawn(dispatch(pipeline.clone(), receiver, workers.max(1)));
        Self {
            sender,
            dispatcher,
            pipeline,
        }
    }

    /// Records the job as pending and hands it to the pool. Waits when the
    /// queue is full.
    pub async fn submit(&self, input: PathBuf, output: PathBuf) -> Result<JobId> {
        let job_id = JobId::new();
        self.pipeline
            .sink()
            .mark_pending(&DocumentJob::new(job_id.clone(), &input, &output));
        self.sender
            .send(QueuedJob {
                job_id: job_id.clone(),
                input,
                output,
            })
            .await
            .map_err(|_| anyhow!("job queue is closed"))?;
        debug!("job {}: queued", job_id);
        Ok(job_id)
    }

    /// Stops accepting jobs and waits until every queued job has finished.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.sender);
        self.dispatcher
            .await
            .map_err(|err| anyhow!("job dispatcher failed: {err}"))
    }
}

async fn dispatch(pipeline: Arc<Pipeline>, mut receiver: mpsc::Receiver<QueuedJob>, workers: usize) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut running = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let pipeline = pipeline.clone();
        running.spawn_blocking(move || {
            let _permit = permit;
            let started = Instant::now();
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                pipeline.process(&job.job_id, &job.input, &job.output)
            }));
            if outcome.is_err() {
                error!("job {}: worker panicked", job.job_id);
                pipeline
                    .sink()
                    .mark_failed(&job.job_id, started.elapsed(), "worker panicked");
            }
        });
    }

    while let Some(result) = running.join_next().await {
        if let Err(err) = result {
            error!("worker task failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrEngineError;
    use crate::job::{JobStatus, MemoryJobStore};
    use crate::ocr::{EngineKind, OcrEngine, TextBlock};
    use crate::raster::Rasterizer;
    use crate::test_util::{invoice_block, write_png};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct SlowEngine {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl OcrEngine for SlowEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::Tesseract
        }

        fn recognize(&self, _raster: &Path) -> Result<Vec<TextBlock>, OcrEngineError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![invoice_block()])
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_every_job_with_bounded_concurrency() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryJobStore::new());
        let engine = Arc::new(SlowEngine::default());
        let pipeline = Arc::new(Pipeline::new(
            Rasterizer::new(300, None, dir.path().join("work")),
            engine.clone(),
            store.clone(),
        ));
        let queue = JobQueue::start(pipeline, 2, 2);

        let mut ids = Vec::new();
        for idx in 0..5 {
            let input = write_png(dir.path(), &format!("scan-{idx}.png"), 120, 60);
            let output = dir.path().join(format!("out-{idx}.pdf"));
            ids.push(queue.submit(input, output).await.expect("submit"));
        }
        queue.shutdown().await.expect("shutdown");

        for id in &ids {
            assert_eq!(store.status(id), Some(JobStatus::Completed));
        }
        assert!(engine.peak.load(Ordering::SeqCst) <= 2);
        for idx in 0..5 {
            assert!(dir.path().join(format!("out-{idx}.pdf")).exists());
        }
    }
}
