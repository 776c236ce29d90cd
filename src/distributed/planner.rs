//! Row partition planning
//!
//! Splits `rows` into one contiguous share per participant. The first
//! `rows % participants` shares get one extra row, so no row is dropped and
//! any two shares differ by at most one row. Assignment is positional, so the
//! same inputs always yield the same plan.

use crate::error::SumError;
use crate::job::Partition;

/// Plan `participants` disjoint inclusive row ranges covering `[0, rows)`.
///
/// Participants beyond `rows` receive empty shares.
///
/// # Errors
///
/// Returns [`SumError::InvalidArgument`] when `participants == 0`.
pub fn plan_partitions(rows: usize, participants: usize) -> Result<Vec<Partition>, SumError> {
    if participants == 0 {
        return Err(SumError::InvalidArgument(
            "partition requested for zero participants".to_string(),
        ));
    }

    let base = rows / participants;
    let remainder = rows % participants;

    let mut plan = Vec::with_capacity(participants);
    let mut start_row = 0usize;
    for i in 0..participants {
        // First `remainder` participants absorb one extra row each
        let count = base + usize::from(i < remainder);
        plan.push(Partition::with_len(start_row, count));
        start_row += count;
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(plan: &[Partition]) -> Vec<usize> {
        plan.iter().map(Partition::len).collect()
    }

    fn assert_covers(plan: &[Partition], rows: usize) {
        let mut next = 0i64;
        for p in plan {
            assert_eq!(p.row_start, next, "gap or overlap at {:?}", p);
            next = p.row_end + 1;
        }
        assert_eq!(next, rows as i64);
    }

    #[test]
    fn test_plan_ten_rows_three_participants() {
        let plan = plan_partitions(10, 3).unwrap();
        assert_eq!(sizes(&plan), vec![4, 3, 3]);
        assert_eq!(plan[0], Partition { row_start: 0, row_end: 3 });
        assert_eq!(plan[1], Partition { row_start: 4, row_end: 6 });
        assert_eq!(plan[2], Partition { row_start: 7, row_end: 9 });
    }

    #[test]
    fn test_plan_single_participant() {
        let plan = plan_partitions(4, 1).unwrap();
        assert_eq!(plan, vec![Partition { row_start: 0, row_end: 3 }]);
    }

    #[test]
    fn test_plan_one_row_each() {
        let plan = plan_partitions(5, 5).unwrap();
        assert_eq!(sizes(&plan), vec![1; 5]);
        assert_covers(&plan, 5);
    }

    #[test]
    fn test_plan_more_participants_than_rows() {
        let plan = plan_partitions(2, 5).unwrap();
        assert_eq!(sizes(&plan), vec![1, 1, 0, 0, 0]);
        assert_covers(&plan, 2);
    }

    #[test]
    fn test_plan_zero_rows() {
        let plan = plan_partitions(0, 3).unwrap();
        assert!(plan.iter().all(Partition::is_empty));
        assert_covers(&plan, 0);
    }

    #[test]
    fn test_plan_zero_participants_rejected() {
        let err = plan_partitions(10, 0).unwrap_err();
        assert!(matches!(err, SumError::InvalidArgument(_)));
    }

    #[test]
    fn test_plan_coverage_and_balance() {
        for rows in 0..60 {
            for participants in 1..12 {
                let plan = plan_partitions(rows, participants).unwrap();
                assert_eq!(plan.len(), participants);
                assert_covers(&plan, rows);

                let s = sizes(&plan);
                let max = *s.iter().max().unwrap();
                let min = *s.iter().min().unwrap();
                assert!(max - min <= 1, "rows={} participants={} sizes={:?}", rows, participants, s);
            }
        }
    }
}
