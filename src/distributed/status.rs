//! State-machine states and observables
//!
//! The presentation layer never polls the state machines. It holds
//! `tokio::sync::watch` receivers for state, progress, result and status text,
//! and redraws whenever one changes.

use tokio::sync::watch;

/// Coordinator lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorState {
    Idle,
    Generating,
    Discovering,
    Partitioning,
    Distributing,
    Aggregating,
    Finalized { sum: f64 },
    Failed { reason: String },
}

impl CoordinatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Finalized { .. } | CoordinatorState::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Generating => "generating",
            CoordinatorState::Discovering => "discovering",
            CoordinatorState::Partitioning => "partitioning",
            CoordinatorState::Distributing => "distributing",
            CoordinatorState::Aggregating => "aggregating",
            CoordinatorState::Finalized { .. } => "finalized",
            CoordinatorState::Failed { .. } => "failed",
        }
    }
}

/// Worker lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerState {
    Unregistered,
    AwaitingAssignment,
    Computing,
    /// `sum` is `None` when the record was already completed and no recomputation happened.
    Reported { sum: Option<f64> },
    Error { reason: String },
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Reported { .. } | WorkerState::Error { .. })
    }
}

/// Observables published by a coordinator.
#[derive(Debug)]
pub struct CoordinatorObservers {
    pub state: watch::Sender<CoordinatorState>,
    /// Percent of assigned participants that reported.
    pub progress: watch::Sender<u8>,
    /// Final result line or error message.
    pub result: watch::Sender<String>,
    pub in_progress: watch::Sender<bool>,
}

impl CoordinatorObservers {
    pub fn new() -> Self {
        Self {
            state: watch::channel(CoordinatorState::Idle).0,
            progress: watch::channel(0).0,
            result: watch::channel(String::new()).0,
            in_progress: watch::channel(false).0,
        }
    }
}

impl Default for CoordinatorObservers {
    fn default() -> Self {
        Self::new()
    }
}

/// Observables published by a worker.
#[derive(Debug)]
pub struct WorkerObservers {
    pub state: watch::Sender<WorkerState>,
    /// 0 until the partial result is stored, then 100.
    pub progress: watch::Sender<u8>,
    /// Human-readable status line.
    pub status: watch::Sender<String>,
    /// Partial sum computed by this worker.
    pub result: watch::Sender<Option<f64>>,
}

impl WorkerObservers {
    pub fn new() -> Self {
        Self {
            state: watch::channel(WorkerState::Unregistered).0,
            progress: watch::channel(0).0,
            status: watch::channel(WAITING_FOR_COORDINATOR.to_string()).0,
            result: watch::channel(None).0,
        }
    }
}

impl Default for WorkerObservers {
    fn default() -> Self {
        Self::new()
    }
}

pub const WAITING_FOR_COORDINATOR: &str = "Waiting for data from the main device";
pub const CONNECTED: &str = "Connected to the calculation, waiting for it to start...";
pub const WAITING_FOR_START: &str = "Waiting for the calculation to start...";
pub const CALCULATING: &str = "Calculating...";
pub const REPORTED: &str = "Calculation complete, the result will appear on the main device...";

/// Result line shown when the coordinator finalizes.
pub fn final_sum_message(sum: f64) -> String {
    format!("Final Sum of the Matrix: {}", sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(CoordinatorState::Finalized { sum: 1.0 }.is_terminal());
        assert!(CoordinatorState::Failed { reason: "x".into() }.is_terminal());
        assert!(!CoordinatorState::Aggregating.is_terminal());

        assert!(WorkerState::Reported { sum: None }.is_terminal());
        assert!(!WorkerState::Computing.is_terminal());
    }

    #[test]
    fn test_observers_start_idle() {
        let observers = CoordinatorObservers::new();
        assert_eq!(*observers.state.subscribe().borrow(), CoordinatorState::Idle);
        assert!(!*observers.in_progress.subscribe().borrow());

        let worker = WorkerObservers::new();
        assert_eq!(*worker.status.subscribe().borrow(), WAITING_FOR_COORDINATOR);
    }
}
