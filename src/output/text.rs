//! Human-readable text output

use crate::config::Config;
use crate::distributed::CalculationOutcome;

/// Print calculation results to console
///
/// Displays:
/// - Matrix shape and value range
/// - Final sum
/// - One line per participant with its rows and partial sum
/// - Elapsed time
pub fn print_results(outcome: &CalculationOutcome, config: &Config) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                  CALCULATION RESULTS");
    println!("═══════════════════════════════════════════════════════════");
    println!();

    let size = outcome.request.size;
    let range = outcome.request.range;
    println!("Job: {}", outcome.job_id);
    println!(
        "Matrix: {} x {} ({} cells), values in [{}, {})",
        format_number(size.rows as u64),
        format_number(size.cols as u64),
        format_number((size.rows as u64).saturating_mul(size.cols as u64)),
        range.min,
        range.max
    );
    if let Some(seed) = config.generation.seed {
        println!("Seed: {}", seed);
    }
    println!();

    println!("Final Sum of the Matrix: {}", outcome.sum);
    println!();

    println!("Participants ({}):", outcome.participants.len());
    for share in &outcome.participants {
        let rows = if share.partition.is_empty() {
            "no rows".to_string()
        } else {
            format!("rows {:>6}..={:<6}", share.partition.row_start, share.partition.row_end)
        };
        println!("  {:<32} {}  sum={}", share.worker_id, rows, share.sum);
    }
    println!();

    println!("Elapsed Time: {:.3}s", outcome.elapsed.as_secs_f64());
    println!("═══════════════════════════════════════════════════════════");
}

/// Matrix dimensions with thousands separators, e.g. `1,000,000`
pub(crate) fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let digits = digits.as_bytes();
    let groups: Vec<&str> = digits
        .rchunks(3)
        .rev()
        .filter_map(|group| std::str::from_utf8(group).ok())
        .collect();
    groups.join(",")
}
