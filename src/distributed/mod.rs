//! Coordinator and worker protocol
//!
//! Participants never talk to each other directly. The coordinator publishes
//! a job to the [`CoordinationStore`](crate::store::CoordinationStore),
//! workers register under it, and both sides drive their state machines from
//! store change notifications.
//!
//! # Modules
//!
//! - `protocol`: store layout and JSON codecs
//! - `planner`: row partitioning
//! - `aggregator`: progress and sum over a job snapshot
//! - `status`: state enums and observables
//! - `coordinator`: coordinator state machine
//! - `worker`: worker state machine

pub mod aggregator;
pub mod coordinator;
pub mod planner;
pub mod protocol;
pub mod status;
pub mod worker;

pub use aggregator::{reduce, JobProgress};
pub use coordinator::{
    CalculationOutcome, CalculationRequest, Coordinator, CoordinatorSettings, ParticipantShare,
};
pub use planner::plan_partitions;
pub use status::{CoordinatorState, WorkerState};
pub use worker::Worker;
