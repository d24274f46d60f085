mod cli;
mod commands;
mod errors;
mod shutdown;
mod tracing;

use crate::cli::{Cli, parse};
use crate::commands::Command;
use crate::tracing::TracingConfig;
use eegflow_cache::{ArtifactCache, CacheConfig, PipelineVersion};
use eegflow_pipeline::{BidsDataset, PipelineWorker};
use std::sync::Arc;

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    if let Err(error) = run_main().await {
        eprintln!("{error:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> miette::Result<()> {
    let cli = parse();

    crate::tracing::init_tracing(TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
        ..TracingConfig::default()
    })?;

    run_cli(cli).await
}

fn open_cache(cli: &Cli) -> miette::Result<ArtifactCache> {
    let mut config = cli
        .cache_dir
        .as_ref()
        .map_or_else(CacheConfig::default, CacheConfig::at);
    if let Some(stamp) = &cli.pipeline_version {
        config = config.with_version(PipelineVersion::new(stamp.clone())?);
    }
    Ok(ArtifactCache::open(&config)?)
}

async fn run_cli(cli: Cli) -> miette::Result<()> {
    let cache = Arc::new(open_cache(&cli)?);
    ::tracing::info!(
        cache = %cache.root().display(),
        data_root = %cli.data_root.display(),
        "[cli] starting"
    );
    let worker = PipelineWorker::new(cache, Arc::new(BidsDataset::new(cli.data_root.clone())));
    shutdown::install_signal_handlers(worker.clone());

    let command: Command = cli.command.into();
    let output = commands::execute(command, &worker).await?;
    commands::emit(&output)?;
    Ok(())
}
