//! Worker state machine
//!
//! A worker joins the most recently published job, waits until the
//! coordinator assigns it a row partition, sums those rows and writes the
//! partial result back into its own record.
//!
//! ```text
//! Unregistered -> AwaitingAssignment -> Computing -> Reported
//!              \-> Error (from any state)
//! ```
//!
//! A worker that registers after the discovery window closed never receives
//! a partition. It keeps waiting until the job is deleted and then ends in
//! `Error` with [`SumError::NoActiveJob`].

use crate::distributed::protocol::*;
use crate::distributed::status::*;
use crate::error::{StoreError, SumError};
use crate::job::{partial_sum, Matrix, Partition, WorkerRecord};
use crate::store::{CoordinationStore, Subscription};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the worker found in its record.
enum Assignment {
    Compute { partition: Partition, matrix: Matrix },
    /// Record already completed, possibly by an earlier run with the same id
    AlreadyReported,
}

struct WorkerShared {
    store: Arc<dyn CoordinationStore>,
    worker_id: String,
    observers: WorkerObservers,
    job_id: Mutex<Option<String>>,
}

/// Worker handle. Dropping it stops participation.
pub struct Worker {
    shared: Arc<WorkerShared>,
    task: Option<JoinHandle<WorkerState>>,
}

impl Worker {
    /// Create a worker with a generated id (`{hostname}-{pid}-{random}`).
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_id(store, generate_worker_id())
    }

    pub fn with_id(store: Arc<dyn CoordinationStore>, worker_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                store,
                worker_id: worker_id.into(),
                observers: WorkerObservers::new(),
                job_id: Mutex::new(None),
            }),
            task: None,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.shared.worker_id
    }

    /// Job this worker registered with, if any.
    pub fn job_id(&self) -> Option<String> {
        self.shared.job_id.lock().ok().and_then(|id| id.clone())
    }

    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.shared.observers.state.subscribe()
    }

    pub fn progress(&self) -> watch::Receiver<u8> {
        self.shared.observers.progress.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<String> {
        self.shared.observers.status.subscribe()
    }

    pub fn result(&self) -> watch::Receiver<Option<f64>> {
        self.shared.observers.result.subscribe()
    }

    /// Register with the active job and start participating in the background.
    ///
    /// # Errors
    ///
    /// - [`SumError::NoActiveJob`] when no job is published
    /// - [`SumError::StoreUnavailable`] when registration cannot be written
    /// - [`SumError::InvalidArgument`] while a registration is still live
    ///
    /// A worker left in `Error` may register again, e.g. after `NoActiveJob`.
    pub async fn register(&mut self) -> Result<(), SumError> {
        let retry = matches!(*self.shared.observers.state.borrow(), WorkerState::Error { .. });
        let idle = *self.shared.observers.state.borrow() == WorkerState::Unregistered;
        if !(idle || retry) || self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(SumError::InvalidArgument(format!(
                "worker {} is already registered",
                self.shared.worker_id
            )));
        }
        if retry {
            self.shared.reset();
        }

        let (job_id, subscription) = match self.shared.join_latest().await {
            Ok(joined) => joined,
            Err(e) => return Err(self.shared.fail(e)),
        };

        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(async move {
            shared.participate(job_id, subscription).await
        }));
        Ok(())
    }

    /// Wait until participation ends and return the terminal state.
    pub async fn wait(&mut self) -> WorkerState {
        let Some(task) = self.task.take() else {
            return self.shared.observers.state.borrow().clone();
        };

        match task.await {
            Ok(state) => state,
            Err(e) => WorkerState::Error {
                reason: format!("worker task ended: {}", e),
            },
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl WorkerShared {
    /// Find the active job, add our record and start watching the job.
    async fn join_latest(&self) -> Result<(String, Subscription), SumError> {
        let (job_id, envelope) = latest_job(self.store.as_ref())
            .await?
            .ok_or(SumError::NoActiveJob)?;
        info!(
            "Worker {} joining job {} from coordinator {}",
            self.worker_id, job_id, envelope.coordinator_id
        );

        let key = self.store.new_key(&workers_path(&job_id)).await?;
        let path = worker_path(&job_id, &key);
        let record = WorkerRecord::waiting(self.worker_id.clone());
        self.store.write(&path, encode(&path, &record)?).await?;

        if let Ok(mut current) = self.job_id.lock() {
            *current = Some(job_id.clone());
        }

        let subscription = self.store.subscribe(&job_path(&job_id)).await?;
        self.set_state(WorkerState::AwaitingAssignment);
        self.observers.status.send_replace(CONNECTED.to_string());

        Ok((job_id, subscription))
    }

    async fn participate(self: Arc<Self>, job_id: String, mut subscription: Subscription) -> WorkerState {
        let path = job_path(&job_id);
        let assignment = self.await_assignment(&mut subscription, &path).await;

        // Our own report must not wake us up again
        if let Err(e) = self.store.unsubscribe(subscription).await {
            warn!("Worker {} failed to unsubscribe: {}", self.worker_id, e);
        }

        let reported = match assignment {
            Ok(Assignment::AlreadyReported) => {
                debug!("Worker {} already reported, skipping computation", self.worker_id);
                Ok(None)
            }
            Ok(Assignment::Compute { partition, matrix }) => {
                self.compute_and_report(&job_id, partition, &matrix).await.map(Some)
            }
            Err(e) => Err(e),
        };

        match reported {
            Ok(sum) => {
                let state = WorkerState::Reported { sum };
                self.set_state(state.clone());
                self.observers.progress.send_replace(100);
                self.observers.status.send_replace(REPORTED.to_string());
                state
            }
            Err(e) => {
                self.fail(e);
                self.observers.state.borrow().clone()
            }
        }
    }

    async fn await_assignment(
        &self,
        subscription: &mut Subscription,
        path: &str,
    ) -> Result<Assignment, SumError> {
        loop {
            let value = match subscription.next().await {
                Some(Ok(value)) => value,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(StoreError::Unavailable("job subscription closed".to_string()).into())
                }
            };

            let Some(job) = decode_job(path, value)? else {
                return Err(SumError::NoActiveJob);
            };

            let Some((_, record)) = job.find_worker(&self.worker_id) else {
                self.observers.status.send_replace(WAITING_FOR_START.to_string());
                continue;
            };

            if record.is_completed() {
                return Ok(Assignment::AlreadyReported);
            }

            match record.partition {
                Some(partition) => {
                    return Ok(Assignment::Compute {
                        partition,
                        matrix: job.matrix,
                    })
                }
                None => {
                    self.observers.status.send_replace(WAITING_FOR_START.to_string());
                }
            }
        }
    }

    async fn compute_and_report(
        &self,
        job_id: &str,
        partition: Partition,
        matrix: &Matrix,
    ) -> Result<f64, SumError> {
        self.set_state(WorkerState::Computing);
        self.observers.status.send_replace(CALCULATING.to_string());

        let sum = partial_sum(matrix, &partition);
        self.observers.result.send_replace(Some(sum));
        info!(
            "Worker {} summed rows {}..={}: {}",
            self.worker_id, partition.row_start, partition.row_end, sum
        );

        // Look the record up again; the key is not cached across snapshots
        let key = find_worker_key(self.store.as_ref(), job_id, &self.worker_id)
            .await
            .map_err(|e| SumError::report_failed(&self.worker_id, e))?
            .ok_or_else(|| SumError::report_failed(&self.worker_id, "registration record is gone"))?;

        // A patch on a deleted job would recreate it as a partial entry
        let exists = job_exists(self.store.as_ref(), job_id)
            .await
            .map_err(|e| SumError::report_failed(&self.worker_id, e))?;
        if !exists {
            return Err(SumError::report_failed(&self.worker_id, "job was removed"));
        }

        self.store
            .update_fields(&worker_path(job_id, &key), completion_fields(sum))
            .await
            .map_err(|e| SumError::report_failed(&self.worker_id, e))?;

        Ok(sum)
    }

    /// Drop what a failed attempt left behind before registering again.
    fn reset(&self) {
        if let Ok(mut current) = self.job_id.lock() {
            *current = None;
        }
        self.observers.progress.send_replace(0);
        self.observers.result.send_replace(None);
        self.set_state(WorkerState::Unregistered);
    }

    /// Move to `Error`, publish the status line and hand the error back.
    fn fail(&self, e: SumError) -> SumError {
        warn!("Worker {} failed: {}", self.worker_id, e);
        self.set_state(WorkerState::Error {
            reason: e.to_string(),
        });
        self.observers.status.send_replace(e.status_message());
        e
    }

    fn set_state(&self, state: WorkerState) {
        debug!("Worker {} -> {:?}", self.worker_id, state);
        self.observers.state.send_replace(state);
    }
}

fn generate_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}-{}-{:08x}", host, std::process::id(), rand::random::<u32>())
}
