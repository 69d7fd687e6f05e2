use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use model_swapper::{
    bus::{JsonLineBus, ModelCommandBus},
    config::{SwapperConfig, read_config_file},
    fatal,
    service::ModelSchedulerService,
    swapper::runner::{ProcessSpawner, RunnerSpawner},
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,

    /// Override the slot count instead of sizing from host resources
    #[arg(long)]
    concurrency: Option<usize>,

    /// Override the model runner executable
    #[arg(long)]
    runner: Option<PathBuf>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("model_swapper", LevelFilter::TRACE),
        ("swapper_scheduler", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    fatal::install_abort_hook();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => SwapperConfig::default(),
    };
    if let Some(concurrency) = args.concurrency {
        config.concurrency = Some(concurrency);
    }
    if let Some(runner) = args.runner {
        config.runner_bin = runner;
    }

    // Model requests arrive as JSON lines on stdin; results leave as JSON
    // lines on stdout. The bus outlives hangup-triggered service rebuilds.
    let bus: Arc<dyn ModelCommandBus> = JsonLineBus::new(
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );
    let spawner: Arc<dyn RunnerSpawner> = Arc::new(ProcessSpawner::new(config.runner_bin.clone()));

    // SIGHUP rebuilds the whole service: the old instance's self-pipe and
    // handler registrations are torn down before the new ones open.
    loop {
        let mut service = ModelSchedulerService::new(&config, bus.clone(), spawner.clone())?;
        if !service.run().await? {
            break;
        }
        info!("hangup received, restarting model scheduler service");
    }

    info!("model scheduler service exited cleanly");
    Ok(())
}
