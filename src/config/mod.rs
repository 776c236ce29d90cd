//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//! CLI options override values loaded from a TOML file, which override the
//! built-in defaults.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub standalone: StandaloneConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Worker discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// How long the coordinator accepts registrations (milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_window_ms() -> u64 {
    10_000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
        }
    }
}

/// Matrix generation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// PRNG seed; random when absent
    pub seed: Option<u64>,
}

/// In-process participants spawned by the standalone CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandaloneConfig {
    /// Workers registering during the discovery window
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Workers registering after the window closed
    #[serde(default)]
    pub late_workers: usize,
}

fn default_workers() -> usize {
    2
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            late_workers: 0,
        }
    }
}

/// Report output settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Print a JSON report instead of text
    #[serde(default)]
    pub json: bool,
    /// Also write the JSON report to this file
    pub json_output: Option<PathBuf>,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Discovery window: {}ms", self.discovery.window_ms)?;
        match self.generation.seed {
            Some(seed) => writeln!(f, "  Seed: {}", seed)?,
            None => writeln!(f, "  Seed: random")?,
        }
        writeln!(
            f,
            "  Workers: {} on time, {} late",
            self.standalone.workers, self.standalone.late_workers
        )?;
        write!(f, "  Output: {}", if self.output.json { "json" } else { "text" })?;
        if let Some(ref path) = self.output.json_output {
            write!(f, ", json file={}", path.display())?;
        }
        writeln!(f)
    }
}
