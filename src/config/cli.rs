//! CLI argument parsing using clap

use clap::Parser;
use std::path::PathBuf;

/// parmatrix - distributed matrix summation over a shared coordination store
///
/// Runs a coordinator and in-process workers, splits the matrix rows among
/// every participant that registered in time and prints the total.
#[derive(Parser, Debug)]
#[command(name = "parmatrix")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Number of matrix rows
    #[arg(value_name = "ROWS", allow_hyphen_values = true)]
    pub rows: String,

    /// Number of matrix columns
    #[arg(value_name = "COLS", allow_hyphen_values = true)]
    pub cols: String,

    /// Lower bound for generated values (inclusive)
    #[arg(value_name = "MIN", allow_hyphen_values = true)]
    pub min: String,

    /// Upper bound for generated values (exclusive)
    #[arg(value_name = "MAX", allow_hyphen_values = true)]
    pub max: String,

    /// TOML configuration file
    #[arg(short = 'c', long, env = "PARMATRIX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Workers registering during the discovery window
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Workers registering after the discovery window closed
    #[arg(long)]
    pub late_workers: Option<usize>,

    /// Discovery window (e.g., 500ms, 10s, 1m)
    #[arg(long)]
    pub window: Option<String>,

    /// Seed for matrix generation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print a JSON report instead of text
    #[arg(long)]
    pub json: bool,

    /// Write the JSON report to a file
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Validate input and configuration, then exit without running
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positionals_and_options() {
        let cli = Cli::try_parse_from([
            "parmatrix", "10", "3", "-5", "5", "--workers", "4", "--window", "500ms", "--json",
        ])
        .unwrap();
        assert_eq!(cli.rows, "10");
        assert_eq!(cli.min, "-5");
        assert_eq!(cli.workers, Some(4));
        assert_eq!(cli.window.as_deref(), Some("500ms"));
        assert!(cli.json);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_missing_positionals_rejected() {
        assert!(Cli::try_parse_from(["parmatrix", "10", "3"]).is_err());
    }
}
