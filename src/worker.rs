//! Background retraining with request coalescing.
//!
//! Every run reads the whole dataset, so requests that arrive while one run is
//! queued are answered by that same run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::error::RetrainError;
use crate::training::{RetrainMode, TrainingPipeline, TrainingReport};

/// Why a queued retrain produced no report.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Retrain(Arc<RetrainError>),
    #[error("Retrain worker stopped before the request ran")]
    Stopped,
    #[error("Retrain panicked: {0}")]
    Panicked(String),
}

type Outcome = Result<TrainingReport, WorkerError>;

/// Result cell shared by every ticket answered by one run.
#[derive(Default)]
struct JobSlot {
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
}

impl JobSlot {
    fn complete(&self, outcome: Outcome) {
        let mut guard = self.outcome.lock().unwrap_or_else(|err| err.into_inner());
        *guard = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Outcome {
        let mut guard = self.outcome.lock().unwrap_or_else(|err| err.into_inner());
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            guard = self.done.wait(guard).unwrap_or_else(|err| err.into_inner());
        }
    }

    fn peek(&self) -> Option<Outcome> {
        self.outcome
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }
}

#[derive(Default)]
struct QueueState {
    pending: Option<Arc<JobSlot>>,
    shutdown: bool,
}

/// Single-slot queue; a new request joins the pending slot if there is one.
#[derive(Default)]
struct RetrainQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl RetrainQueue {
    fn submit(&self) -> Option<Arc<JobSlot>> {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        if state.shutdown {
            return None;
        }
        let slot = state.pending.get_or_insert_with(Default::default);
        let slot = Arc::clone(slot);
        self.ready.notify_one();
        Some(slot)
    }

    fn take_blocking(&self) -> Option<Arc<JobSlot>> {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(slot) = state.pending.take() {
                return Some(slot);
            }
            state = self.ready.wait(state).unwrap_or_else(|err| err.into_inner());
        }
    }

    fn shut_down(&self) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.shutdown = true;
        if let Some(slot) = state.pending.take() {
            slot.complete(Err(WorkerError::Stopped));
        }
        self.ready.notify_all();
    }
}

/// Handle to a queued retrain.
pub struct RetrainTicket {
    slot: Arc<JobSlot>,
    mode: RetrainMode,
}

impl RetrainTicket {
    /// Block until the run answering this request finishes.
    pub fn wait(self) -> Result<Option<f32>, WorkerError> {
        let mode = self.mode;
        self.wait_report().map(|report| accuracy_for(mode, &report))
    }

    pub fn wait_report(self) -> Result<TrainingReport, WorkerError> {
        self.slot.wait()
    }

    /// `None` while the run is still queued or in progress.
    pub fn try_result(&self) -> Option<Result<Option<f32>, WorkerError>> {
        self.slot
            .peek()
            .map(|outcome| outcome.map(|report| accuracy_for(self.mode, &report)))
    }
}

fn accuracy_for(mode: RetrainMode, report: &TrainingReport) -> Option<f32> {
    match mode {
        RetrainMode::Silent => None,
        RetrainMode::Reporting => Some(report.metrics.accuracy),
    }
}

/// Dedicated retrain thread. Dropping it stops the thread after the in-flight run.
pub struct RetrainWorker {
    queue: Arc<RetrainQueue>,
    handle: Option<JoinHandle<()>>,
}

impl RetrainWorker {
    pub fn spawn(pipeline: Arc<TrainingPipeline>) -> std::io::Result<Self> {
        Self::spawn_with(move || pipeline.run())
    }

    /// A panicking run answers its tickets with [`WorkerError::Panicked`]; the thread keeps serving.
    fn spawn_with<F>(job: F) -> std::io::Result<Self>
    where
        F: Fn() -> Result<TrainingReport, RetrainError> + Send + 'static,
    {
        let queue = Arc::new(RetrainQueue::default());
        let worker_queue = Arc::clone(&queue);
        let handle = thread::Builder::new()
            .name("spamshield-retrain".into())
            .spawn(move || {
                while let Some(slot) = worker_queue.take_blocking() {
                    let outcome = match panic::catch_unwind(AssertUnwindSafe(&job)) {
                        Ok(result) => result.map_err(|err| WorkerError::Retrain(Arc::new(err))),
                        Err(payload) => {
                            let message = panic_message(payload);
                            tracing::error!("Retrain run panicked: {message}");
                            Err(WorkerError::Panicked(message))
                        }
                    };
                    slot.complete(outcome);
                }
                tracing::debug!("Retrain worker stopped");
            })?;
        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    /// Queue a retrain, joining a pending one if it has not started yet.
    pub fn submit(&self, mode: RetrainMode) -> RetrainTicket {
        let slot = self.queue.submit().unwrap_or_else(|| {
            let slot = Arc::new(JobSlot::default());
            slot.complete(Err(WorkerError::Stopped));
            slot
        });
        RetrainTicket { slot, mode }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Drop for RetrainWorker {
    fn drop(&mut self) {
        self.queue.shut_down();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Retrain worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetStore;
    use crate::registry::ModelRegistry;
    use crate::training::PipelineOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn pipeline(dir: &std::path::Path, dataset: &str) -> Arc<TrainingPipeline> {
        let path = dir.join("dataset.txt");
        std::fs::write(&path, dataset).unwrap();
        let mut options = PipelineOptions::default();
        options.network.hidden1 = 8;
        options.network.hidden2 = 4;
        options.network.epochs = 3;
        Arc::new(TrainingPipeline::new(
            Arc::new(DatasetStore::new(path)),
            Arc::new(ModelRegistry::open(dir.join("models"), 2).unwrap()),
            options,
        ))
    }

    #[test]
    fn pending_requests_share_one_slot() {
        let queue = RetrainQueue::default();
        let first = queue.submit().unwrap();
        let second = queue.submit().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let taken = queue.take_blocking().unwrap();
        assert!(Arc::ptr_eq(&taken, &first));
        let third = queue.submit().unwrap();
        assert!(!Arc::ptr_eq(&third, &first));
    }

    #[test]
    fn shutdown_answers_pending_requests() {
        let queue = RetrainQueue::default();
        let slot = queue.submit().unwrap();
        queue.shut_down();
        assert!(matches!(slot.wait(), Err(WorkerError::Stopped)));
        assert!(queue.submit().is_none());
        assert!(queue.take_blocking().is_none());
    }

    #[test]
    fn tickets_honour_their_own_mode() {
        let dir = tempdir().unwrap();
        let worker = RetrainWorker::spawn(pipeline(
            dir.path(),
            "ham hello there friend\nspam buy cheap pills\nham lunch at noon\nspam win money now\n",
        ))
        .unwrap();
        let reporting = worker.submit(RetrainMode::Reporting);
        let silent = worker.submit(RetrainMode::Silent);
        let accuracy = reporting.wait().unwrap().unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
        assert_eq!(silent.wait().unwrap(), None);
    }

    #[test]
    fn panicking_run_fails_its_tickets_and_the_worker_survives() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(
            dir.path(),
            "ham hello there friend\nspam buy cheap pills\nham lunch at noon\nspam win money now\n",
        );
        let runs = AtomicUsize::new(0);
        let worker = RetrainWorker::spawn_with(move || {
            if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("layer allocation failed");
            }
            pipeline.run()
        })
        .unwrap();

        let first = worker.submit(RetrainMode::Reporting);
        match first.wait() {
            Err(WorkerError::Panicked(message)) => assert_eq!(message, "layer allocation failed"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let second = worker.submit(RetrainMode::Reporting);
        let accuracy = second.wait().unwrap().unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
    }

    #[test]
    fn failures_reach_every_ticket() {
        let dir = tempdir().unwrap();
        let worker = RetrainWorker::spawn(pipeline(dir.path(), "ham only one class\nham here\n")).unwrap();
        let ticket = worker.submit(RetrainMode::Reporting);
        match ticket.wait() {
            Err(WorkerError::Retrain(err)) => assert!(matches!(*err, RetrainError::Training(_))),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
