//! Store layout and wire codecs
//!
//! Coordinator and workers exchange state exclusively through the store.
//! This module owns the path layout and the conversion between the typed job
//! model and the JSON values the store holds.
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                 Store                        Worker
//!     |-- write jobs/{id} ------>|                            |
//!     |                          |<-- read jobs (latest id) --|
//!     |                          |<-- write workers/{key} ----|
//!     |<- workers changed -------|                            |
//!     |   (discovery window)     |                            |
//!     |-- update workers ------->|-- job changed ------------>|
//!     |   (partitions)           |                            |
//!     |                          |<-- update workers/{key} ---|
//!     |<- job changed -----------|   (status, result)         |
//!     |-- delete jobs/{id} ----->|                            |
//! ```

use crate::error::StoreError;
use crate::job::{Job, JobEnvelope, WorkerRecord, WorkerStatus};
use crate::store::{join, CoordinationStore};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Collection holding every published job.
pub const JOBS: &str = "jobs";

/// `jobs/{jobId}`
pub fn job_root(job_id: &str) -> String {
    join(&[JOBS, job_id])
}

/// `jobs/{jobId}/job`
pub fn job_path(job_id: &str) -> String {
    join(&[JOBS, job_id, "job"])
}

/// `jobs/{jobId}/job/workers`
pub fn workers_path(job_id: &str) -> String {
    join(&[JOBS, job_id, "job", "workers"])
}

/// `jobs/{jobId}/job/workers/{workerKey}`
pub fn worker_path(job_id: &str, worker_key: &str) -> String {
    join(&[JOBS, job_id, "job", "workers", worker_key])
}

pub fn encode<T: Serialize>(path: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::serialization(path, e))
}

pub fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::serialization(path, e))
}

/// Decode a job snapshot; an absent value is `None`.
pub fn decode_job(path: &str, value: Option<Value>) -> Result<Option<Job>, StoreError> {
    value.map(|v| decode(path, v)).transpose()
}

/// Decode a `workers` snapshot, skipping entries that are not valid records.
pub fn decode_workers(path: &str, value: Option<Value>) -> BTreeMap<String, WorkerRecord> {
    let Some(Value::Object(entries)) = value else {
        return BTreeMap::new();
    };

    entries
        .into_iter()
        .filter_map(|(key, raw)| match serde_json::from_value::<WorkerRecord>(raw) {
            Ok(record) => Some((key, record)),
            Err(e) => {
                warn!("Ignoring malformed worker record {}/{}: {}", path, key, e);
                None
            }
        })
        .collect()
}

/// Field patch marking a worker record completed with `sum`.
pub fn completion_fields(sum: f64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("status".to_string(), json!(WorkerStatus::Completed));
    fields.insert("result".to_string(), json!({ "sum": sum }));
    fields
}

/// The active job: the one with the greatest key under [`JOBS`].
///
/// Entries that are not a complete envelope (a partial write that landed
/// after the job was deleted) are skipped in favour of the next key.
pub async fn latest_job(
    store: &dyn CoordinationStore,
) -> Result<Option<(String, JobEnvelope)>, StoreError> {
    let Some(Value::Object(jobs)) = store.read(JOBS).await? else {
        return Ok(None);
    };

    let mut candidates: Vec<(String, Value)> = jobs.into_iter().collect();
    candidates.sort_by(|(a, _), (b, _)| b.cmp(a));

    for (job_id, raw) in candidates {
        let path = job_root(&job_id);
        match decode::<JobEnvelope>(&path, raw) {
            Ok(envelope) => return Ok(Some((job_id, envelope))),
            Err(e) => warn!("Skipping job {}: {}", job_id, e),
        }
    }

    Ok(None)
}

/// Whether the job body at `jobs/{jobId}/job` still carries its coordinator.
pub async fn job_exists(store: &dyn CoordinationStore, job_id: &str) -> Result<bool, StoreError> {
    let path = join(&[JOBS, job_id, "job", "coordinatorId"]);
    Ok(store.read(&path).await?.is_some())
}

/// Key of the record registered by `worker_id`, if any.
pub async fn find_worker_key(
    store: &dyn CoordinationStore,
    job_id: &str,
    worker_id: &str,
) -> Result<Option<String>, StoreError> {
    let path = workers_path(job_id);
    let workers = decode_workers(&path, store.read(&path).await?);
    Ok(workers
        .into_iter()
        .find(|(_, record)| record.worker_id == worker_id)
        .map(|(key, _)| key))
}
