//! Job progress aggregation
//!
//! The coordinator re-derives progress from every job snapshot it receives
//! instead of accumulating deltas. Replaying the same snapshot (a duplicate
//! notification) therefore never double-counts a worker.
//!
//! Only records holding a partition take part. A worker that registered after
//! the discovery window closed never receives one and is left out of both
//! counts, so it cannot hold the job open.

use crate::job::Job;

/// Aggregate view of one job snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobProgress {
    pub completed: usize,
    pub total: usize,
    pub sum: f64,
    /// `floor(completed / total * 100)`, 0 when there are no participants.
    pub percent: u8,
}

impl JobProgress {
    /// All assigned participants have reported.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Reduce a job snapshot to its progress. A missing job counts as empty.
pub fn reduce(job: Option<&Job>) -> JobProgress {
    let mut completed = 0usize;
    let mut total = 0usize;
    let mut sum = 0.0;

    let assigned = job
        .into_iter()
        .flat_map(|job| job.workers.values())
        .filter(|record| record.partition.is_some());

    for record in assigned {
        total += 1;
        if record.is_completed() {
            completed += 1;
            sum += record.result.map(|r| r.sum).unwrap_or(0.0);
        }
    }

    let percent = if total == 0 {
        0
    } else {
        (completed * 100 / total) as u8
    };

    JobProgress {
        completed,
        total,
        sum,
        percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CalculationResult, Partition, WorkerRecord, WorkerStatus};

    fn job_with(records: Vec<WorkerRecord>) -> Job {
        let mut job: Job = serde_json::from_value(serde_json::json!({})).unwrap();
        for (i, record) in records.into_iter().enumerate() {
            job.workers.insert(format!("k{}", i), record);
        }
        job
    }

    fn assigned(id: &str, done: Option<f64>) -> WorkerRecord {
        WorkerRecord {
            worker_id: id.to_string(),
            status: if done.is_some() { WorkerStatus::Completed } else { WorkerStatus::Waiting },
            partition: Some(Partition { row_start: 0, row_end: 0 }),
            result: done.map(|sum| CalculationResult { sum }),
        }
    }

    #[test]
    fn test_reduce_missing_job() {
        let progress = reduce(None);
        assert_eq!(progress.total, 0);
        assert_eq!(progress.percent, 0);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_reduce_empty_workers() {
        let job = job_with(vec![]);
        let progress = reduce(Some(&job));
        assert_eq!((progress.completed, progress.total, progress.percent), (0, 0, 0));
    }

    #[test]
    fn test_reduce_partial_progress_floors() {
        let job = job_with(vec![
            assigned("a", Some(1.5)),
            assigned("b", None),
            assigned("c", None),
        ]);
        let progress = reduce(Some(&job));
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.sum, 1.5);
        assert_eq!(progress.percent, 33);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_reduce_complete() {
        let job = job_with(vec![assigned("a", Some(1.0)), assigned("b", Some(2.0))]);
        let progress = reduce(Some(&job));
        assert!(progress.is_complete());
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.sum, 3.0);
    }

    #[test]
    fn test_reduce_ignores_unassigned_records() {
        let job = job_with(vec![assigned("a", Some(4.0)), WorkerRecord::waiting("late")]);
        let progress = reduce(Some(&job));
        assert_eq!(progress.total, 1);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_reduce_duplicate_snapshot_does_not_double_count() {
        let job = job_with(vec![assigned("a", Some(2.0)), assigned("b", None)]);
        let first = reduce(Some(&job));
        let second = reduce(Some(&job));
        assert_eq!(first, second);
        assert_eq!(second.sum, 2.0);
        assert_eq!(second.completed, 1);
    }
}
