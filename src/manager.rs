//! The manager owns the pool of model workers. Each worker holds its own
//! loaded copy of the model, so up to `workers` inferences run in parallel;
//! further requests wait for a worker to become idle.

use crate::config::Settings;
use crate::error::PredictError;
use crate::prediction::Label;
use crate::preprocess::InputTensor;
use crate::torch::{Classifier, TorchModel};
use crate::worker::{Worker, WorkerStatus};
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

/// A summary of a worker, as reported by the HTTP server
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkerInfo {
    pub id: usize,
    pub status: WorkerStatus,
}

#[derive(Debug)]
pub struct Manager {
    workers: Vec<Arc<Worker>>,

    /// One permit per healthy idle worker
    permits: Arc<Semaphore>,

    /// Workers not in the `Error` state
    healthy: Arc<AtomicUsize>,

    /// Round-robin cursor
    next: AtomicUsize,
}

impl Manager {
    /// Build a pool from already loaded models
    pub fn new(models: Vec<Box<dyn Classifier>>) -> Result<Self> {
        if models.is_empty() {
            bail!("the worker pool needs at least one model");
        }
        for model in &models {
            if model.output_len() != Label::ALL.len() {
                bail!(
                    "model returns {} scores but there are {} labels",
                    model.output_len(),
                    Label::ALL.len()
                );
            }
        }
        let workers: Vec<Arc<Worker>> = models
            .into_iter()
            .enumerate()
            .map(|(id, model)| Arc::new(Worker::new(id, model)))
            .collect();
        let n = workers.len();

        Ok(Manager {
            workers,
            permits: Arc::new(Semaphore::new(n)),
            healthy: Arc::new(AtomicUsize::new(n)),
            next: AtomicUsize::new(0),
        })
    }

    /// Load `model.workers` copies of the TorchScript model
    pub fn load(settings: &Settings) -> Result<Self> {
        let shape = settings.model_input_shape();
        let models = (0..settings.model.workers)
            .map(|_| {
                TorchModel::new(&settings.model.path, shape)
                    .map(|m| Box::new(m) as Box<dyn Classifier>)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "manager loaded {} workers with model {} (input shape {shape:?})",
            models.len(),
            settings.model.path.display()
        );
        Self::new(models)
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.workers
            .iter()
            .map(|w| WorkerInfo {
                id: w.id(),
                status: w.status(),
            })
            .collect()
    }

    /// Get the statuses of all workers
    pub fn all_status(&self) -> BTreeMap<usize, WorkerStatus> {
        self.workers.iter().map(|w| (w.id(), w.status())).collect()
    }

    /// Number of workers that can still serve requests
    pub fn healthy(&self) -> usize {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Claim the next idle worker, starting from the round-robin cursor
    fn get_idle_worker(&self) -> Option<Arc<Worker>> {
        let n = self.workers.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;
        (0..n)
            .map(|i| &self.workers[(start + i) % n])
            .find(|w| w.try_claim())
            .cloned()
    }

    /// Run one inference on an idle worker, waiting for one if all are busy
    pub async fn run_inference(&self, input: InputTensor) -> Result<Vec<f32>, PredictError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PredictError::Unavailable("every model worker has failed".into()))?;

        let worker = self
            .get_idle_worker()
            .ok_or_else(|| PredictError::Unavailable("no idle model worker".into()))?;
        debug!("running inference on worker {}", worker.id());

        // The worker is released from inside the blocking task, so a caller
        // that goes away mid-request can't leave it marked as working
        let permits = self.permits.clone();
        let healthy = self.healthy.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| worker.run(&input)));
            release(&worker, permit, &permits, &healthy, result.is_err());
            result.unwrap_or_else(|_| {
                Err(PredictError::Inference(format!(
                    "model worker {} crashed",
                    worker.id()
                )))
            })
        });

        task.await
            .map_err(|e| PredictError::Inference(format!("inference task failed: {e}")))?
    }
}

/// Return a worker to the pool, or retire it if its invocation panicked
fn release(
    worker: &Worker,
    permit: OwnedSemaphorePermit,
    permits: &Semaphore,
    healthy: &AtomicUsize,
    crashed: bool,
) {
    if !crashed {
        worker.set_status(WorkerStatus::Idle);
        drop(permit);
        return;
    }

    error!("worker {} crashed, removing it from the pool", worker.id());
    worker.set_status(WorkerStatus::Error);
    permit.forget();
    if healthy.fetch_sub(1, Ordering::SeqCst) == 1 {
        permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test::{PanickingModel, RednessModel, SlowModel, ThreeClassModel};
    use std::time::Duration;

    fn red_input(size: usize) -> InputTensor {
        InputTensor::new([1, size, size, 3], [1.0, -1.0, -1.0].repeat(size * size)).unwrap()
    }

    #[test]
    fn test_empty_pool() {
        assert!(Manager::new(vec![]).is_err());
    }

    #[test]
    fn test_rejects_wrong_output_len() {
        let err = Manager::new(vec![
            Box::new(RednessModel::new(4)),
            Box::new(ThreeClassModel::new(4)),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("3 scores"));
    }

    #[tokio::test]
    async fn test_run_inference() {
        let manager = Manager::new(vec![Box::new(RednessModel::new(4))]).unwrap();
        let scores = manager.run_inference(red_input(4)).await.unwrap();
        assert!(scores[0] > scores[1]);
        assert_eq!(manager.all_status()[&0], WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn test_round_robin() {
        let manager = Manager::new(vec![
            Box::new(RednessModel::new(4)),
            Box::new(RednessModel::new(4)),
        ])
        .unwrap();
        assert!(manager.get_idle_worker().is_some());
        assert!(manager.get_idle_worker().is_some());
        // Both are claimed now
        assert!(manager.get_idle_worker().is_none());
        assert!(manager
            .workers()
            .iter()
            .all(|w| w.status == WorkerStatus::Working));
    }

    #[tokio::test]
    async fn test_round_robin_order() {
        let manager = Manager::new(vec![
            Box::new(RednessModel::new(4)),
            Box::new(RednessModel::new(4)),
        ])
        .unwrap();
        let ids: Vec<usize> = (0..4)
            .map(|_| {
                let worker = manager.get_idle_worker().unwrap();
                worker.set_status(WorkerStatus::Idle);
                worker.id()
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 0, 1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waits_for_busy_worker() {
        let manager = Arc::new(
            Manager::new(vec![Box::new(SlowModel::new(2, Duration::from_millis(50)))]).unwrap(),
        );
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.run_inference(red_input(2)).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(manager.all_status()[&0], WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn test_crashed_worker_is_retired() {
        let manager = Manager::new(vec![
            Box::new(PanickingModel::new(2)),
            Box::new(RednessModel::new(2)),
        ])
        .unwrap();

        let err = manager.run_inference(red_input(2)).await.unwrap_err();
        assert_eq!(err.kind(), "inference_error");
        assert_eq!(manager.healthy(), 1);
        assert_eq!(manager.all_status()[&0], WorkerStatus::Error);

        // The remaining worker keeps serving
        for _ in 0..3 {
            assert!(manager.run_inference(red_input(2)).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_all_workers_crashed() {
        let manager = Manager::new(vec![Box::new(PanickingModel::new(2))]).unwrap();
        assert!(manager.run_inference(red_input(2)).await.is_err());
        let err = manager.run_inference(red_input(2)).await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }
}
