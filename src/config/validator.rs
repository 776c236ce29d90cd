//! Configuration validation

use super::*;
use anyhow::Result;
use log::warn;

/// Upper bound on in-process participants
pub const MAX_WORKERS: usize = 1024;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_discovery(&config.discovery)?;
    validate_standalone(&config.standalone)?;
    Ok(())
}

/// Validate discovery configuration
pub fn validate_discovery(discovery: &DiscoveryConfig) -> Result<()> {
    if discovery.window_ms == 0 {
        anyhow::bail!("discovery.window_ms must be greater than 0");
    }

    if discovery.window_ms > 10 * 60 * 1000 {
        warn!(
            "Very long discovery window ({}ms), the calculation will not start before it closes",
            discovery.window_ms
        );
    }

    Ok(())
}

/// Validate standalone participant counts
pub fn validate_standalone(standalone: &StandaloneConfig) -> Result<()> {
    let total = standalone.workers.saturating_add(standalone.late_workers);
    if total > MAX_WORKERS {
        anyhow::bail!(
            "standalone workers + late_workers must not exceed {} (got {})",
            MAX_WORKERS,
            total
        );
    }

    Ok(())
}
