//! JSON output formatting
//!
//! Serializes a finished calculation: run metadata, the matrix parameters,
//! the final sum and every participant's share.

use crate::config::Config;
use crate::distributed::CalculationOutcome;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Elapsed time, exact and in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub seconds: f64,
}

impl From<Duration> for JsonDuration {
    fn from(d: Duration) -> Self {
        Self {
            micros: u64::try_from(d.as_micros()).unwrap_or(u64::MAX),
            seconds: d.as_secs_f64(),
        }
    }
}

/// Run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRunInfo {
    pub job_id: String,
    pub hostname: Option<String>,
    /// RFC 3339 time the report was produced
    pub finished_at: String,
    pub elapsed: JsonDuration,
    pub discovery_window_ms: u64,
    pub seed: Option<u64>,
}

/// Matrix parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonMatrix {
    pub rows: usize,
    pub cols: usize,
    pub min: i64,
    pub max: i64,
}

/// One participant's share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonParticipant {
    pub worker_id: String,
    pub row_start: i64,
    pub row_end: i64,
    pub rows: usize,
    pub sum: f64,
}

/// Complete report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub run: JsonRunInfo,
    pub matrix: JsonMatrix,
    pub sum: f64,
    pub participants: Vec<JsonParticipant>,
}

/// Build the report for a finished calculation
pub fn build_report(outcome: &CalculationOutcome, config: &Config) -> JsonReport {
    let size = outcome.request.size;
    let range = outcome.request.range;

    JsonReport {
        run: JsonRunInfo {
            job_id: outcome.job_id.clone(),
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
            finished_at: chrono::Utc::now().to_rfc3339(),
            elapsed: outcome.elapsed.into(),
            discovery_window_ms: config.discovery.window_ms,
            seed: config.generation.seed,
        },
        matrix: JsonMatrix {
            rows: size.rows,
            cols: size.cols,
            min: range.min,
            max: range.max,
        },
        sum: outcome.sum,
        participants: outcome
            .participants
            .iter()
            .map(|share| JsonParticipant {
                worker_id: share.worker_id.clone(),
                row_start: share.partition.row_start,
                row_end: share.partition.row_end,
                rows: share.partition.len(),
                sum: share.sum,
            })
            .collect(),
    }
}

/// Print the report to stdout
pub fn print_json(report: &JsonReport) -> Result<()> {
    let text = serde_json::to_string_pretty(report).context("Failed to serialize JSON report")?;
    println!("{}", text);
    Ok(())
}

/// Write the pretty-printed report to a file
pub fn write_json_output(output_path: &Path, report: &JsonReport) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output: {}", output_path.display()))?;
    serde_json::to_writer_pretty(file, report)
        .with_context(|| format!("Failed to write JSON output: {}", output_path.display()))?;
    Ok(())
}
