//! Coordinator state machine
//!
//! The coordinator runs on the participant that initiates a calculation. It:
//! - Generates the matrix and publishes the job
//! - Keeps a discovery window open while workers register
//! - Plans row partitions for every registered worker plus itself
//! - Computes its own share and reports it like any other participant
//! - Aggregates worker results until every assigned participant reported
//! - Deletes the job from the store when the session ends
//!
//! ```text
//! Idle -> Generating -> Discovering -> Partitioning -> Distributing
//!      -> Aggregating -> Finalized
//!                    \-> Failed (from any state)
//! ```
//!
//! Store failures move the machine to `Failed` and leave the job in place;
//! it is removed by [`Coordinator::shutdown`] or when the coordinator is
//! dropped.

use crate::config::Config;
use crate::distributed::aggregator::{self, JobProgress};
use crate::distributed::planner::plan_partitions;
use crate::distributed::protocol::*;
use crate::distributed::status::{final_sum_message, CoordinatorObservers, CoordinatorState};
use crate::error::{StoreError, SumError};
use crate::job::{
    generate_matrix, partial_sum, Job, JobEnvelope, JobStatus, MatrixSize, Partition, ValueRange,
    WorkerRecord, WorkerStatus,
};
use crate::store::{CoordinationStore, Subscription};
use log::{debug, error, info, warn};
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long workers may register before partitions are fixed.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(10);

/// Worker id the coordinator uses for its own record.
pub const DEFAULT_COORDINATOR_ID: &str = "main_device_id";

/// Process-wide coordinator settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub discovery_window: Duration,
    /// Seed for matrix generation (reproducible runs)
    pub seed: Option<u64>,
    pub coordinator_id: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            seed: None,
            coordinator_id: DEFAULT_COORDINATOR_ID.to_string(),
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            discovery_window: Duration::from_millis(config.discovery.window_ms),
            seed: config.generation.seed,
            coordinator_id: DEFAULT_COORDINATOR_ID.to_string(),
        }
    }
}

/// Validated calculation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalculationRequest {
    pub size: MatrixSize,
    pub range: ValueRange,
}

impl CalculationRequest {
    /// Parse raw user input.
    ///
    /// # Errors
    ///
    /// [`SumError::InvalidInput`] when a field is empty, not an integer,
    /// a negative dimension, or when `min > max`.
    pub fn parse(rows: &str, cols: &str, min: &str, max: &str) -> Result<Self, SumError> {
        let rows = parse_field::<usize>("rows", rows)?;
        let cols = parse_field::<usize>("cols", cols)?;
        let min_val = parse_field::<i64>("min", min)?;
        let max_val = parse_field::<i64>("max", max)?;

        if min_val > max_val {
            return Err(SumError::invalid_input("max", format!("{} < min {}", max_val, min_val)));
        }

        Ok(Self {
            size: MatrixSize { rows, cols },
            range: ValueRange {
                min: min_val,
                max: max_val,
            },
        })
    }
}

fn parse_field<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, SumError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<T>()
        .map_err(|_| SumError::invalid_input(field, trimmed))
}

/// One participant's share in a finished calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantShare {
    pub worker_id: String,
    pub partition: Partition,
    pub sum: f64,
}

/// Result of a finalized calculation.
#[derive(Debug, Clone)]
pub struct CalculationOutcome {
    pub job_id: String,
    pub request: CalculationRequest,
    pub sum: f64,
    /// Participants in registration order, coordinator last.
    pub participants: Vec<ParticipantShare>,
    pub elapsed: Duration,
}

/// State shared between the coordinator handle and its running task.
struct Shared {
    store: Arc<dyn CoordinationStore>,
    settings: CoordinatorSettings,
    observers: CoordinatorObservers,
    job_id: Mutex<Option<String>>,
    transitions: Mutex<Vec<CoordinatorState>>,
    /// Set while a calculation runs, from either `start` or `run`
    active: AtomicBool,
}

/// Coordinator handle.
///
/// Dropping it cancels a running calculation and deletes its job.
pub struct Coordinator {
    shared: Arc<Shared>,
    task: Option<JoinHandle<Result<CalculationOutcome, SumError>>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, settings: CoordinatorSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                settings,
                observers: CoordinatorObservers::new(),
                job_id: Mutex::new(None),
                transitions: Mutex::new(vec![CoordinatorState::Idle]),
                active: AtomicBool::new(false),
            }),
            task: None,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> watch::Receiver<CoordinatorState> {
        self.shared.observers.state.subscribe()
    }

    pub fn progress(&self) -> watch::Receiver<u8> {
        self.shared.observers.progress.subscribe()
    }

    pub fn result(&self) -> watch::Receiver<String> {
        self.shared.observers.result.subscribe()
    }

    pub fn in_progress(&self) -> watch::Receiver<bool> {
        self.shared.observers.in_progress.subscribe()
    }

    /// Every state entered so far, oldest first.
    pub fn transitions(&self) -> Vec<CoordinatorState> {
        self.shared
            .transitions
            .lock()
            .map(|t| t.to_vec())
            .unwrap_or_default()
    }

    /// Id of the job currently held in the store, if any.
    pub fn job_id(&self) -> Option<String> {
        self.shared.job_id.lock().ok().and_then(|id| id.clone())
    }

    /// Validate raw input and start a calculation in the background.
    ///
    /// Progress and the final result are published through the observables;
    /// [`Coordinator::wait`] yields the outcome.
    ///
    /// # Errors
    ///
    /// [`SumError::InvalidInput`] for malformed input, or
    /// [`SumError::InvalidArgument`] when a calculation is already running.
    pub fn start(&mut self, rows: &str, cols: &str, min: &str, max: &str) -> Result<(), SumError> {
        let request = match CalculationRequest::parse(rows, cols, min, max) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected calculation input: {}", e);
                self.shared.observers.result.send_replace(e.status_message());
                return Err(e);
            }
        };

        if self.shared.active.load(Ordering::SeqCst)
            || self.task.as_ref().is_some_and(|t| !t.is_finished())
        {
            return Err(already_in_progress());
        }

        let shared = Arc::clone(&self.shared);
        self.task = Some(tokio::spawn(async move { shared.run(request).await }));
        Ok(())
    }

    /// Wait for the calculation started with [`Coordinator::start`].
    pub async fn wait(&mut self) -> Result<CalculationOutcome, SumError> {
        let Some(task) = self.task.take() else {
            return Err(SumError::InvalidArgument("no calculation started".to_string()));
        };

        match task.await {
            Ok(result) => result,
            Err(e) => Err(SumError::InvalidArgument(format!("calculation task ended: {}", e))),
        }
    }

    /// Run a calculation to completion on the current task.
    ///
    /// # Errors
    ///
    /// Besides the calculation's own failures, [`SumError::InvalidArgument`]
    /// when another calculation is running on this coordinator.
    pub async fn run(&self, request: CalculationRequest) -> Result<CalculationOutcome, SumError> {
        Arc::clone(&self.shared).run(request).await
    }

    /// Cancel any running calculation and delete its job from the store.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(job_id) = self.shared.take_job_id() {
            teardown(self.shared.store.as_ref(), &job_id).await;
        }
        self.shared.observers.in_progress.send_replace(false);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let Some(job_id) = self.shared.take_job_id() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.shared.store);
                handle.spawn(async move { teardown(store.as_ref(), &job_id).await });
            }
            Err(_) => warn!("No runtime available to delete job {}", job_id),
        }
    }
}

impl Shared {
    async fn run(self: Arc<Self>, request: CalculationRequest) -> Result<CalculationOutcome, SumError> {
        // Rejected before any observable changes, so the running calculation is untouched
        let Some(_active) = ActiveRun::acquire(&self.active) else {
            return Err(already_in_progress());
        };

        match self.execute(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Calculation failed: {}", e);
                self.transition(CoordinatorState::Failed {
                    reason: e.to_string(),
                });
                self.observers.result.send_replace(e.status_message());
                self.observers.in_progress.send_replace(false);
                Err(e)
            }
        }
    }

    async fn execute(&self, request: CalculationRequest) -> Result<CalculationOutcome, SumError> {
        let started = Instant::now();
        self.observers.in_progress.send_replace(true);
        self.observers.progress.send_replace(0);
        self.observers.result.send_replace(String::new());

        let (job_id, matrix) = self.generate(&request).await?;

        self.transition(CoordinatorState::Discovering);
        let registered = self.discover(&job_id).await?;

        self.transition(CoordinatorState::Partitioning);
        let own = self.assign_partitions(&job_id, &request, &registered).await?;

        self.transition(CoordinatorState::Distributing);
        let own_sum = partial_sum(&matrix, &own.partition);
        debug!(
            "Coordinator partial sum over rows {}..={}: {}",
            own.partition.row_start, own.partition.row_end, own_sum
        );
        self.store
            .update_fields(&worker_path(&job_id, &own.key), completion_fields(own_sum))
            .await?;

        self.transition(CoordinatorState::Aggregating);
        let (progress, job) = self.aggregate(&job_id).await?;

        Ok(self.finalize(&job_id, request, progress, job, started.elapsed()).await)
    }

    /// Generate the matrix, allocate a job id and publish the job with no workers.
    async fn generate(&self, request: &CalculationRequest) -> Result<(String, Vec<Vec<f64>>), SumError> {
        self.transition(CoordinatorState::Generating);

        // A job left behind by a failed run would otherwise be orphaned
        if let Some(stale) = self.take_job_id() {
            teardown(self.store.as_ref(), &stale).await;
        }

        info!(
            "Generating {}x{} matrix with values in [{}, {})",
            request.size.rows, request.size.cols, request.range.min, request.range.max
        );
        let matrix = generate_matrix(request.size, request.range, self.settings.seed);

        let job_id = self.store.new_key(JOBS).await?;
        self.set_job_id(Some(job_id.clone()));

        let envelope = JobEnvelope {
            job_id: job_id.clone(),
            coordinator_id: self.settings.coordinator_id.clone(),
            job: Job {
                status: JobStatus::InProgress,
                coordinator_id: self.settings.coordinator_id.clone(),
                matrix_size: request.size,
                value_range: request.range,
                matrix,
                timestamp: chrono::Utc::now().to_rfc3339(),
                result: None,
                workers: BTreeMap::new(),
            },
        };

        let path = job_root(&job_id);
        self.store.write(&path, encode(&path, &envelope)?).await?;
        info!("Published job {}", job_id);

        Ok((job_id, envelope.job.matrix))
    }

    /// Tally registered workers until the discovery window closes.
    async fn discover(&self, job_id: &str) -> Result<BTreeMap<String, WorkerRecord>, SumError> {
        let path = workers_path(job_id);
        let mut subscription = self.store.subscribe(&path).await?;
        info!(
            "Discovery window open for {:.1}s",
            self.settings.discovery_window.as_secs_f64()
        );

        let result = collect_registrations(&mut subscription, &path, self.settings.discovery_window).await;

        // Stop listening before partitions are written, so our own writes are not tallied
        self.release(subscription).await;

        let registered = result?;
        info!("Discovery window closed: {} worker(s) registered", registered.len());
        Ok(registered)
    }

    /// Plan partitions and write them, with the coordinator's own record, as one batch.
    async fn assign_partitions(
        &self,
        job_id: &str,
        request: &CalculationRequest,
        registered: &BTreeMap<String, WorkerRecord>,
    ) -> Result<OwnAssignment, SumError> {
        let plan = plan_partitions(request.size.rows, registered.len() + 1)?;
        let path = workers_path(job_id);

        let mut batch = Map::new();
        for ((key, record), partition) in registered.iter().zip(&plan) {
            let assigned = WorkerRecord {
                worker_id: record.worker_id.clone(),
                status: WorkerStatus::Waiting,
                partition: Some(*partition),
                result: None,
            };
            debug!(
                "Assigning rows {}..={} to worker {}",
                partition.row_start, partition.row_end, record.worker_id
            );
            batch.insert(key.clone(), encode(&path, &assigned)?);
        }

        let own_partition = plan[plan.len() - 1];
        let own_key = self.store.new_key(&path).await?;
        let own_record = WorkerRecord {
            worker_id: self.settings.coordinator_id.clone(),
            status: WorkerStatus::Waiting,
            partition: Some(own_partition),
            result: None,
        };
        batch.insert(own_key.clone(), encode(&path, &own_record)?);

        self.store.update_fields(&path, batch).await?;
        info!("Assigned {} partition(s) over {} rows", plan.len(), request.size.rows);

        Ok(OwnAssignment {
            key: own_key,
            partition: own_partition,
        })
    }

    /// Follow the job until every assigned participant has reported.
    async fn aggregate(&self, job_id: &str) -> Result<(JobProgress, Job), SumError> {
        let path = job_path(job_id);
        let mut subscription = self.store.subscribe(&path).await?;

        let result = self.await_completion(&mut subscription, &path).await;
        self.release(subscription).await;
        result
    }

    async fn await_completion(
        &self,
        subscription: &mut Subscription,
        path: &str,
    ) -> Result<(JobProgress, Job), SumError> {
        loop {
            let value = match subscription.next().await {
                Some(Ok(value)) => value,
                Some(Err(e)) => {
                    warn!("Job subscription failed: {}", e);
                    return Err(e.into());
                }
                None => return Err(StoreError::Unavailable("job subscription closed".into()).into()),
            };

            let Some(job) = decode_job(path, value)? else {
                return Err(StoreError::Unavailable(format!("{} was removed", path)).into());
            };

            let progress = aggregator::reduce(Some(&job));
            self.observers.progress.send_replace(progress.percent);
            debug!(
                "Progress: {}% ({}/{} participants)",
                progress.percent, progress.completed, progress.total
            );

            if progress.is_complete() {
                return Ok((progress, job));
            }
        }
    }

    /// Publish the final sum, mark the job completed, then delete it.
    async fn finalize(
        &self,
        job_id: &str,
        request: CalculationRequest,
        progress: JobProgress,
        job: Job,
        elapsed: Duration,
    ) -> CalculationOutcome {
        let participants = job
            .workers
            .into_values()
            .filter_map(|record| {
                let partition = record.partition?;
                Some(ParticipantShare {
                    worker_id: record.worker_id,
                    partition,
                    sum: record.result.map(|r| r.sum).unwrap_or(0.0),
                })
            })
            .collect();

        self.transition(CoordinatorState::Finalized { sum: progress.sum });
        self.observers.progress.send_replace(100);
        self.observers.result.send_replace(final_sum_message(progress.sum));
        self.observers.in_progress.send_replace(false);
        info!("Calculation finished. Total sum: {}", progress.sum);

        let mut fields = Map::new();
        fields.insert("status".to_string(), json!(JobStatus::Completed));
        fields.insert("result".to_string(), json!({ "sum": progress.sum }));
        if let Err(e) = self.store.update_fields(&job_path(job_id), fields).await {
            warn!("Failed to mark job {} completed: {}", job_id, e);
        }

        if let Some(job_id) = self.take_job_id() {
            teardown(self.store.as_ref(), &job_id).await;
        }

        CalculationOutcome {
            job_id: job_id.to_string(),
            request,
            sum: progress.sum,
            participants,
            elapsed,
        }
    }

    fn transition(&self, state: CoordinatorState) {
        debug!("Coordinator -> {}", state.name());
        if let Ok(mut transitions) = self.transitions.lock() {
            transitions.push(state.clone());
        }
        self.observers.state.send_replace(state);
    }

    async fn release(&self, subscription: Subscription) {
        if let Err(e) = self.store.unsubscribe(subscription).await {
            warn!("Failed to unsubscribe: {}", e);
        }
    }

    fn set_job_id(&self, job_id: Option<String>) {
        if let Ok(mut current) = self.job_id.lock() {
            *current = job_id;
        }
    }

    fn take_job_id(&self) -> Option<String> {
        self.job_id.lock().ok().and_then(|mut id| id.take())
    }
}

/// Marks a calculation as running until dropped, including on abort.
struct ActiveRun<'a>(&'a AtomicBool);

impl<'a> ActiveRun<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn already_in_progress() -> SumError {
    SumError::InvalidArgument("a calculation is already in progress".to_string())
}

struct OwnAssignment {
    key: String,
    partition: Partition,
}

/// Replace the tally with every snapshot until `window` elapses.
async fn collect_registrations(
    subscription: &mut Subscription,
    path: &str,
    window: Duration,
) -> Result<BTreeMap<String, WorkerRecord>, SumError> {
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    let mut registered = BTreeMap::new();
    let mut open = true;
    loop {
        tokio::select! {
            // Registrations already delivered win over a deadline that fired at the same time
            biased;
            event = subscription.next(), if open => match event {
                Some(Ok(value)) => {
                    registered = decode_workers(path, value);
                    debug!("Workers registered so far: {}", registered.len());
                }
                Some(Err(e)) => {
                    warn!("Worker registration subscription failed: {}", e);
                    return Err(e.into());
                }
                // Stream ended; keep the last tally until the window closes
                None => open = false,
            },
            _ = &mut deadline => break,
        }
    }

    Ok(registered)
}

/// Delete the job subtree. Failures are logged, never surfaced.
async fn teardown(store: &dyn CoordinationStore, job_id: &str) {
    match store.delete(&job_root(job_id)).await {
        Ok(()) => info!("Deleted job {}", job_id),
        Err(e) => warn!("Failed to delete job {}: {}", job_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::worker::Worker;
    use crate::distributed::status::WorkerState;
    use crate::job::matrix_sum;
    use crate::store::{MemoryStore, StoreOp};

    fn settings(window_ms: u64) -> CoordinatorSettings {
        CoordinatorSettings {
            discovery_window: Duration::from_millis(window_ms),
            seed: Some(7),
            coordinator_id: DEFAULT_COORDINATOR_ID.to_string(),
        }
    }

    fn request(rows: usize, cols: usize) -> CalculationRequest {
        CalculationRequest {
            size: MatrixSize { rows, cols },
            range: ValueRange { min: 0, max: 10 },
        }
    }

    fn expected_sum(rows: usize, cols: usize) -> f64 {
        let req = request(rows, cols);
        matrix_sum(&generate_matrix(req.size, req.range, Some(7)))
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6 * b.abs().max(1.0), "{} != {}", a, b);
    }

    async fn wait_for_state(coordinator: &Coordinator, target: &str) {
        let mut state = coordinator.state();
        let name = target.to_string();
        state
            .wait_for(|s| s.name() == name || s.is_terminal())
            .await
            .unwrap();
    }

    #[test]
    fn test_parse_request() {
        let req = CalculationRequest::parse("4", " 2 ", "-1", "5").unwrap();
        assert_eq!(req.size, MatrixSize { rows: 4, cols: 2 });
        assert_eq!(req.range, ValueRange { min: -1, max: 5 });
    }

    #[test]
    fn test_parse_request_rejects_bad_input() {
        for (rows, cols, min, max) in [
            ("", "2", "0", "1"),
            ("x", "2", "0", "1"),
            ("-3", "2", "0", "1"),
            ("3", "2.5", "0", "1"),
            ("3", "2", "9", "1"),
        ] {
            let err = CalculationRequest::parse(rows, cols, min, max).unwrap_err();
            assert!(matches!(err, SumError::InvalidInput { .. }), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_start_invalid_input_is_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::new(store, settings(10));

        let err = coordinator.start("abc", "2", "0", "1").unwrap_err();
        assert!(matches!(err, SumError::InvalidInput { field: "rows", .. }));
        assert_eq!(*coordinator.state().borrow(), CoordinatorState::Idle);
        assert!(!coordinator.result().borrow().is_empty());
    }

    #[tokio::test]
    async fn test_alone_coordinator_computes_everything() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(store.clone(), settings(20));

        let outcome = coordinator.run(request(4, 2)).await.unwrap();

        assert_close(outcome.sum, expected_sum(4, 2));
        assert_eq!(outcome.participants.len(), 1);
        assert_eq!(outcome.participants[0].worker_id, DEFAULT_COORDINATOR_ID);
        assert_eq!(outcome.participants[0].partition, Partition { row_start: 0, row_end: 3 });

        assert_eq!(*coordinator.progress().borrow(), 100);
        assert!(!*coordinator.in_progress().borrow());
        assert!(coordinator.result().borrow().starts_with("Final Sum of the Matrix:"));
        assert_eq!(
            coordinator.transitions().iter().map(|s| s.name()).collect::<Vec<_>>(),
            vec!["idle", "generating", "discovering", "partitioning", "distributing", "aggregating", "finalized"]
        );

        // Job removed and no listener leaked
        assert!(store.read(JOBS).await.unwrap().is_none());
        assert_eq!(store.subscriber_count(), 0);
        assert!(coordinator.job_id().is_none());
    }

    #[tokio::test]
    async fn test_two_workers_share_rows() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::new(store.clone(), settings(300));
        coordinator.start("10", "3", "0", "10").unwrap();
        wait_for_state(&coordinator, "discovering").await;

        let mut first = Worker::with_id(store.clone(), "worker-a");
        let mut second = Worker::with_id(store.clone(), "worker-b");
        first.register().await.unwrap();
        second.register().await.unwrap();

        let outcome = coordinator.wait().await.unwrap();
        assert_close(outcome.sum, expected_sum(10, 3));

        let shares: Vec<(String, usize)> = outcome
            .participants
            .iter()
            .map(|p| (p.worker_id.clone(), p.partition.len()))
            .collect();
        assert_eq!(
            shares,
            vec![
                ("worker-a".to_string(), 4),
                ("worker-b".to_string(), 3),
                (DEFAULT_COORDINATOR_ID.to_string(), 3),
            ]
        );
        let partial_total: f64 = outcome.participants.iter().map(|p| p.sum).sum();
        assert_close(partial_total, outcome.sum);
        assert_eq!(*coordinator.progress().borrow(), 100);

        assert!(matches!(first.wait().await, WorkerState::Reported { sum: Some(_) }));
        assert!(matches!(second.wait().await, WorkerState::Reported { sum: Some(_) }));
        assert!(store.read(JOBS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_more_participants_than_rows() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::new(store.clone(), settings(300));
        coordinator.start("2", "4", "0", "10").unwrap();
        wait_for_state(&coordinator, "discovering").await;

        let mut workers = Vec::new();
        for i in 0..3 {
            let mut worker = Worker::with_id(store.clone(), format!("w{}", i));
            worker.register().await.unwrap();
            workers.push(worker);
        }

        let outcome = coordinator.wait().await.unwrap();
        assert_close(outcome.sum, expected_sum(2, 4));
        let empty = outcome.participants.iter().filter(|p| p.partition.is_empty()).count();
        assert_eq!(empty, 2);

        for worker in &mut workers {
            assert!(matches!(worker.wait().await, WorkerState::Reported { .. }));
        }
    }

    #[tokio::test]
    async fn test_one_row_per_participant() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::new(store.clone(), settings(300));
        coordinator.start("3", "4", "0", "10").unwrap();
        wait_for_state(&coordinator, "discovering").await;

        let mut first = Worker::with_id(store.clone(), "w0");
        let mut second = Worker::with_id(store.clone(), "w1");
        first.register().await.unwrap();
        second.register().await.unwrap();

        let outcome = coordinator.wait().await.unwrap();
        assert_close(outcome.sum, expected_sum(3, 4));
        let partitions: Vec<Partition> = outcome.participants.iter().map(|p| p.partition).collect();
        assert_eq!(
            partitions,
            vec![
                Partition { row_start: 0, row_end: 0 },
                Partition { row_start: 1, row_end: 1 },
                Partition { row_start: 2, row_end: 2 },
            ]
        );
        let partial_total: f64 = outcome.participants.iter().map(|p| p.sum).sum();
        assert_close(partial_total, outcome.sum);

        assert!(matches!(first.wait().await, WorkerState::Reported { sum: Some(_) }));
        assert!(matches!(second.wait().await, WorkerState::Reported { sum: Some(_) }));
    }

    #[tokio::test]
    async fn test_late_registration_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::new(store.clone(), settings(200));
        coordinator.start("6", "2", "0", "10").unwrap();
        wait_for_state(&coordinator, "discovering").await;

        // A participant driven by hand, so it reports only when we say so
        let job_id = coordinator.job_id().unwrap();
        let manual_key = store.new_key(&workers_path(&job_id)).await.unwrap();
        let record = encode("", &WorkerRecord::waiting("manual")).unwrap();
        store.write(&worker_path(&job_id, &manual_key), record).await.unwrap();

        wait_for_state(&coordinator, "aggregating").await;

        let mut late = Worker::with_id(store.clone(), "late");
        late.register().await.unwrap();

        let workers = decode_workers("", store.read(&workers_path(&job_id)).await.unwrap());
        let (_, manual) = workers.iter().find(|(_, w)| w.worker_id == "manual").unwrap();
        let (_, late_record) = workers.iter().find(|(_, w)| w.worker_id == "late").unwrap();
        assert!(late_record.partition.is_none());

        let matrix: Vec<Vec<f64>> = decode("", store.read(&join_matrix(&job_id)).await.unwrap().unwrap()).unwrap();
        let manual_sum = partial_sum(&matrix, &manual.partition.unwrap());
        store
            .update_fields(&worker_path(&job_id, &manual_key), completion_fields(manual_sum))
            .await
            .unwrap();

        let outcome = coordinator.wait().await.unwrap();
        assert_close(outcome.sum, expected_sum(6, 2));
        assert_eq!(outcome.participants.len(), 2);

        // The job is gone, so the late worker ends in error, never Reported
        let state = late.wait().await;
        assert!(matches!(state, WorkerState::Error { .. }), "{:?}", state);
    }

    fn join_matrix(job_id: &str) -> String {
        format!("{}/matrix", job_path(job_id))
    }

    #[tokio::test]
    async fn test_store_failure_while_distributing() {
        let store = Arc::new(MemoryStore::new());
        // Partition batch succeeds, the coordinator's own report fails
        store.fail_after(StoreOp::UpdateFields, 1);
        let coordinator = Coordinator::new(store.clone(), settings(20));

        let err = coordinator.run(request(4, 2)).await.unwrap_err();
        assert!(matches!(err, SumError::StoreUnavailable(_)));

        let names: Vec<_> = coordinator.transitions().iter().map(|s| s.name()).collect();
        assert_eq!(names.last(), Some(&"failed"));
        assert!(!names.contains(&"aggregating"));
        assert!(!*coordinator.in_progress().borrow());
        assert!(coordinator.result().borrow().starts_with("Error during calculation"));

        // Left in place until the session ends
        let job_id = coordinator.job_id().unwrap();
        assert!(store.read(&job_root(&job_id)).await.unwrap().is_some());
        assert_eq!(store.subscriber_count(), 0);

        coordinator.shutdown().await;
        assert!(store.read(&job_root(&job_id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_after_failure_removes_failed_job() {
        let store = Arc::new(MemoryStore::new());
        store.fail_after(StoreOp::UpdateFields, 1);
        let mut coordinator = Coordinator::new(store.clone(), settings(20));

        coordinator.start("4", "2", "0", "10").unwrap();
        assert!(coordinator.wait().await.is_err());
        let failed_job = coordinator.job_id().unwrap();
        assert!(store.read(&job_root(&failed_job)).await.unwrap().is_some());

        store.clear_faults();
        coordinator.start("4", "2", "0", "10").unwrap();
        let outcome = coordinator.wait().await.unwrap();
        assert_ne!(outcome.job_id, failed_job);
        assert!(store.read(&job_root(&failed_job)).await.unwrap().is_none());

        coordinator.shutdown().await;
        assert!(store.read(JOBS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_rejected_while_calculation_active() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::new(store.clone(), settings(60_000));
        coordinator.start("5", "5", "0", "1").unwrap();
        wait_for_state(&coordinator, "discovering").await;
        let job_id = coordinator.job_id().unwrap();

        let err = coordinator.run(request(2, 2)).await.unwrap_err();
        assert!(matches!(err, SumError::InvalidArgument(_)));
        assert!(matches!(
            coordinator.start("2", "2", "0", "1").unwrap_err(),
            SumError::InvalidArgument(_)
        ));

        // The running calculation and its job are untouched
        assert_eq!(*coordinator.state().borrow(), CoordinatorState::Discovering);
        assert_eq!(coordinator.job_id(), Some(job_id.clone()));
        assert!(*coordinator.in_progress().borrow());

        coordinator.shutdown().await;
        assert!(store.read(&job_root(&job_id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_aborted_calculation_releases_running_flag() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::new(store.clone(), settings(60_000));
        coordinator.start("5", "5", "0", "1").unwrap();
        wait_for_state(&coordinator, "discovering").await;
        let first_job = coordinator.job_id().unwrap();

        if let Some(task) = coordinator.task.take() {
            task.abort();
            let _ = task.await;
        }
        assert!(!coordinator.shared.active.load(Ordering::SeqCst));

        // A new calculation may start, and replaces the abandoned job
        coordinator.start("5", "5", "0", "1").unwrap();
        let mut state = coordinator.state();
        state
            .wait_for(|_| coordinator.job_id().is_some_and(|id| id != first_job))
            .await
            .unwrap();
        assert!(store.read(&job_root(&first_job)).await.unwrap().is_none());

        coordinator.shutdown().await;
        assert!(store.read(JOBS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registration_queued_at_deadline_is_counted() {
        let store = MemoryStore::new();
        let path = workers_path("job");
        let mut subscription = store.subscribe(&path).await.unwrap();
        let record = encode("", &WorkerRecord::waiting("w")).unwrap();
        store.write(&worker_path("job", "k1"), record).await.unwrap();

        // The deadline is already due when the loop starts
        let registered = collect_registrations(&mut subscription, &path, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered["k1"].worker_id, "w");
    }

    #[tokio::test]
    async fn test_failure_while_generating() {
        let store = Arc::new(MemoryStore::new());
        store.fail_after(StoreOp::Write, 0);
        let coordinator = Coordinator::new(store.clone(), settings(20));

        let err = coordinator.run(request(3, 3)).await.unwrap_err();
        assert!(matches!(err, SumError::StoreUnavailable(_)));
        assert!(matches!(*coordinator.state().borrow(), CoordinatorState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_deletes() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::new(store.clone(), settings(60_000));
        coordinator.start("5", "5", "0", "1").unwrap();
        wait_for_state(&coordinator, "discovering").await;
        let job_id = coordinator.job_id().unwrap();

        coordinator.shutdown().await;
        assert!(store.read(&job_root(&job_id)).await.unwrap().is_none());
        assert_eq!(store.subscriber_count(), 0);

        // Deleting again is harmless
        store.delete(&job_root(&job_id)).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_error_fails_discovery() {
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::new(store.clone(), settings(60_000));
        coordinator.start("5", "5", "0", "1").unwrap();
        wait_for_state(&coordinator, "discovering").await;

        store.break_subscriptions("connection lost");
        let err = coordinator.wait().await.unwrap_err();
        assert!(matches!(err, SumError::StoreUnavailable(_)));
        assert!(!*coordinator.in_progress().borrow());
    }
}
