//! parmatrix - distributed matrix summation
//!
//! A coordinator generates a random matrix, waits a fixed discovery window
//! for workers to register, splits the rows among every registered worker
//! plus itself, and sums the partial results as they arrive. Participants
//! only ever talk through a shared coordination store.
//!
//! # Architecture
//!
//! - **Store**: tree-structured key/value store with change subscriptions
//! - **Job model**: the job, worker records and partitions as stored
//! - **Distributed**: partition planner, progress aggregator, and the
//!   coordinator and worker state machines
//! - **Config/output**: CLI, TOML configuration and result reports

pub mod config;
pub mod distributed;
pub mod error;
pub mod job;
pub mod output;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use distributed::{Coordinator, Worker};
pub use error::{StoreError, SumError};
pub use store::{CoordinationStore, MemoryStore};

/// Result type used by the binary and configuration layer
pub type Result<T> = anyhow::Result<T>;
