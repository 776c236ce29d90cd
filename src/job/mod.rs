//! Job data model
//!
//! These types are what coordinator and workers exchange through the
//! coordination store. In memory every status is a tagged enum; the
//! `snake_case` status strings only exist at the serde boundary.
//!
//! # Persisted layout
//!
//! ```text
//! jobs/{jobId} -> { jobId, coordinatorId, job: {
//!     status, matrixSize, valueRange, matrix, coordinatorId, timestamp,
//!     result?, workers: { workerKey -> WorkerRecord } } }
//! ```

pub mod matrix;

pub use matrix::{generate_matrix, matrix_sum, partial_sum, Matrix};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Matrix dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSize {
    pub rows: usize,
    pub cols: usize,
}

/// Bounds for uniform cell sampling, `[min, max)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

/// Inclusive row range `[row_start, row_end]` assigned to one participant.
///
/// An empty share is encoded as `row_end == row_start - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub row_start: i64,
    pub row_end: i64,
}

impl Partition {
    /// Partition covering `count` rows starting at `start`.
    pub fn with_len(start: usize, count: usize) -> Self {
        let row_start = start as i64;
        Self {
            row_start,
            row_end: row_start + count as i64 - 1,
        }
    }

    /// Number of rows in the share.
    pub fn len(&self) -> usize {
        (self.row_end - self.row_start + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Half-open row indices, clamped to `[0, available_rows)`.
    pub fn clamped(&self, available_rows: usize) -> Range<usize> {
        let start = self.row_start.clamp(0, available_rows as i64) as usize;
        let end = (self.row_end + 1).clamp(start as i64, available_rows as i64) as usize;
        start..end
    }
}

/// Partial or final sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub sum: f64,
}

/// Per-worker status as stored on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Waiting,
    Completed,
}

/// Job status as stored on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// One participant's entry under `workers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub worker_id: String,
    #[serde(default)]
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<Partition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CalculationResult>,
}

impl WorkerRecord {
    /// Fresh registration: waiting, no partition.
    pub fn waiting(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Waiting,
            partition: None,
            result: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == WorkerStatus::Completed
    }
}

/// Job body stored at `jobs/{jobId}/job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub coordinator_id: String,
    #[serde(default)]
    pub matrix_size: MatrixSize,
    #[serde(default)]
    pub value_range: ValueRange,
    #[serde(default)]
    pub matrix: Matrix,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CalculationResult>,
    /// Keyed by store-generated key, so iteration follows registration order.
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerRecord>,
}

impl Job {
    /// Find a worker's record by its worker id.
    pub fn find_worker(&self, worker_id: &str) -> Option<(&String, &WorkerRecord)> {
        self.workers.iter().find(|(_, w)| w.worker_id == worker_id)
    }
}

/// Envelope stored at `jobs/{jobId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub job_id: String,
    pub coordinator_id: String,
    pub job: Job,
}
