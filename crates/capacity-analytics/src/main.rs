mod bootstrap;
mod render;

use std::time::Duration;

use anyhow::{Context, Result};
use capacity_core::settings::{EngineConfig, Settings};
use capacity_data::analysis::analyze_path;
use capacity_runtime::batch::BatchRunner;
use capacity_runtime::data_manager::AnalysisJob;
use capacity_runtime::orchestrator::WatchOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let (settings, config) = Settings::load()?;

    bootstrap::setup_logging(&settings.log_level)?;

    tracing::info!("capacity-analytics v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Input: {}, granularity: {}",
        settings.input.display(),
        settings.granularity
    );

    if settings.batch {
        run_batch(&settings, config).await
    } else if settings.watch {
        run_watch(&settings, config).await
    } else {
        run_once(&settings, config).await
    }
}

/// Analyze the input once and print the result.
async fn run_once(settings: &Settings, config: EngineConfig) -> Result<()> {
    let input = settings.input.clone();
    let granularity = settings.granularity;
    let with_utilization = settings.utilization;

    let result = tokio::task::spawn_blocking(move || {
        analyze_path(&input, granularity, &config, with_utilization)
    })
    .await
    .context("analysis task failed")??;

    for e in &result.metric_errors {
        tracing::warn!("{} unavailable: {}", e.metric, e.message);
    }
    println!("{}", render::render_result(&result, settings.format)?);
    Ok(())
}

/// Analyze every facility CSV under the input directory.
async fn run_batch(settings: &Settings, config: EngineConfig) -> Result<()> {
    tracing::info!("Running batch analysis...");
    let runner = BatchRunner::new(settings.granularity, config, settings.utilization);
    let outcomes = runner.run_dir(&settings.input).await?;

    let failed = outcomes.values().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        tracing::warn!("{} of {} facilities failed", failed, outcomes.len());
    }
    println!("{}", render::render_batch(&outcomes, settings.format)?);
    Ok(())
}

/// Re-run the analysis whenever the input changes, until Ctrl+C.
async fn run_watch(settings: &Settings, config: EngineConfig) -> Result<()> {
    tracing::info!(
        "Watching {} every {}s...",
        settings.input.display(),
        settings.refresh_rate
    );
    let job = AnalysisJob {
        input: settings.input.clone(),
        granularity: settings.granularity,
        config,
        with_utilization: settings.utilization,
    };
    let orchestrator =
        WatchOrchestrator::new(job, Duration::from_secs(u64::from(settings.refresh_rate)));
    let (mut rx, handle) = orchestrator.start();

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else {
                    tracing::warn!("watch loop stopped");
                    break;
                };
                tracing::info!("analysis revision {}", update.revision);
                println!("{}", render::render_result(&update.analysis, settings.format)?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received; stopping watch");
                break;
            }
        }
    }
    handle.abort();
    Ok(())
}
