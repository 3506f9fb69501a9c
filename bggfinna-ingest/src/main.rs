//! bggfinna-ingest - Catalog to ranking pipeline
//!
//! Fetches board games held by the configured libraries, matches them to the
//! ranking database, enriches the matches and loads everything into a local
//! SQLite store.

use anyhow::{Context, Result};
use bggfinna_common::config::resolve_run_settings;
use bggfinna_common::TomlConfig;
use bggfinna_ingest::{PipelineOrchestrator, Stage, StageSelection};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Command-line arguments for bggfinna-ingest
#[derive(Parser, Debug)]
#[command(name = "bggfinna-ingest")]
#[command(about = "Match library board games to BoardGameGeek and load the results")]
#[command(version)]
struct Args {
    /// Run size: full, reduced or smoke
    #[arg(short, long, env = "BGGFINNA_PROFILE")]
    profile: Option<String>,

    /// Root folder for artifacts (profiles add their subfolder)
    #[arg(long, env = "BGGFINNA_DATA_ROOT")]
    data_root: Option<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long, env = "BGGFINNA_CONFIG")]
    config: Option<PathBuf>,

    /// Run only this stage, from its input artifact
    #[arg(long, conflicts_with = "from")]
    stage: Option<Stage>,

    /// Resume from this stage and run every later one
    #[arg(long)]
    from: Option<Stage>,
}

impl Args {
    fn selection(&self) -> StageSelection {
        match (self.stage, self.from) {
            (Some(stage), _) => StageSelection::Only(stage),
            (None, Some(stage)) => StageSelection::From(stage),
            (None, None) => StageSelection::All,
        }
    }
}

fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "bggfinna_ingest={level},bggfinna_common={level},warn",
            level = default_level
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&toml_config.logging.level);

    info!("Starting bggfinna-ingest v{}", env!("CARGO_PKG_VERSION"));

    let settings = resolve_run_settings(args.profile.as_deref(), args.data_root.as_deref(), &toml_config)
        .context("Failed to resolve run settings")?;

    // Requests are issued one at a time; a single-threaded runtime is enough
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let statistics = runtime.block_on(async {
        let orchestrator = PipelineOrchestrator::from_config(settings, &toml_config)?;
        orchestrator.run(args.selection()).await
    });

    match statistics {
        Ok(_) => {
            info!("bggfinna-ingest finished");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Pipeline failed");
            Err(anyhow::Error::new(e).context("Pipeline failed"))
        }
    }
}
