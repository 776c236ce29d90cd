//! parmatrix CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use parmatrix::config::{cli::Cli, toml::load_config, validator::validate_config, Config};
use parmatrix::distributed::{
    CalculationOutcome, CalculationRequest, Coordinator, CoordinatorSettings, CoordinatorState,
    Worker,
};
use parmatrix::output::{json, text};
use parmatrix::store::{CoordinationStore, MemoryStore};
use std::sync::Arc;
use tokio::sync::watch;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = load_config(&cli)?;
    validate_config(&config).context("Configuration validation failed")?;

    if !config.output.json {
        println!("parmatrix v{}", env!("CARGO_PKG_VERSION"));
        println!("Distributed matrix summation");
        println!();
        print!("{}", config);
    }

    // Reject malformed input before any participant is started
    let request = CalculationRequest::parse(&cli.rows, &cli.cols, &cli.min, &cli.max)
        .context("Invalid calculation input")?;

    if cli.dry_run {
        println!();
        println!("Dry run mode - input and configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let outcome = runtime.block_on(run_standalone(&config, request))?;

    report(&outcome, &config)
}

/// Run a coordinator and the configured in-process workers over a memory store
async fn run_standalone(config: &Config, request: CalculationRequest) -> Result<CalculationOutcome> {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(Arc::clone(&store), CoordinatorSettings::from_config(config));

    let calculation = async {
        let (outcome, workers) = tokio::join!(
            coordinator.run(request),
            launch_workers(Arc::clone(&store), config, coordinator.state())
        );
        let mut workers = workers?;
        let outcome = outcome.map_err(|e| anyhow::anyhow!(e.status_message()))?;

        for worker in &mut workers {
            let state = worker.wait().await;
            debug!("Worker {} finished: {:?}", worker.worker_id(), state);
        }
        Ok(outcome)
    };

    tokio::select! {
        result = calculation => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling calculation");
            anyhow::bail!("Calculation interrupted")
        }
    }
}

/// Register on-time workers once discovery opens, late workers once it closes
async fn launch_workers(
    store: Arc<dyn CoordinationStore>,
    config: &Config,
    mut state: watch::Receiver<CoordinatorState>,
) -> Result<Vec<Worker>> {
    let mut workers = Vec::new();

    let stopped = state
        .wait_for(|s| *s == CoordinatorState::Discovering || s.is_terminal())
        .await
        .context("Coordinator stopped before discovery")?
        .is_terminal();
    if stopped {
        return Ok(workers);
    }

    for _ in 0..config.standalone.workers {
        let mut worker = Worker::new(Arc::clone(&store));
        worker
            .register()
            .await
            .with_context(|| format!("Worker {} failed to register", worker.worker_id()))?;
        workers.push(worker);
    }
    info!("{} worker(s) registered", workers.len());

    if config.standalone.late_workers == 0 {
        return Ok(workers);
    }

    state
        .wait_for(|s| {
            !matches!(
                s,
                CoordinatorState::Idle | CoordinatorState::Generating | CoordinatorState::Discovering
            )
        })
        .await
        .context("Coordinator stopped during discovery")?;

    for _ in 0..config.standalone.late_workers {
        let mut worker = Worker::new(Arc::clone(&store));
        match worker.register().await {
            Ok(()) => {
                info!("Late worker {} registered after the window closed", worker.worker_id());
                workers.push(worker);
            }
            Err(e) => warn!("Late worker {} could not register: {}", worker.worker_id(), e),
        }
    }

    Ok(workers)
}

fn report(outcome: &CalculationOutcome, config: &Config) -> Result<()> {
    let needs_json = config.output.json || config.output.json_output.is_some();
    let json_report = needs_json.then(|| json::build_report(outcome, config));

    match json_report {
        Some(ref report) if config.output.json => json::print_json(report)?,
        _ => {
            println!();
            text::print_results(outcome, config);
        }
    }

    if let (Some(path), Some(report)) = (&config.output.json_output, &json_report) {
        json::write_json_output(path, report)?;
        info!("JSON report written to {}", path.display());
    }

    Ok(())
}
