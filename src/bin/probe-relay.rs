use std::sync::Arc;

use clap::Parser;
use probe_relay::{
    actors::orchestrator::Orchestrator,
    backend::{Backend, MackerelClient},
    config::{ConfigSource, FileConfigSource},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Probe discovered hosts and relay the samples")]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: String,

    /// Dump samples to stdout instead of posting them
    #[arg(long)]
    probe_only: bool,

    /// Log level for this crate (trace, debug, info, warn, error)
    #[arg(long, default_value = "debug")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_target("probe_relay", level);
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
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let source = FileConfigSource::new(&args.file).probe_only(args.probe_only);

    // the backend client is built once from the initial config
    let config = source.load()?;
    let backend: Arc<dyn Backend> =
        Arc::new(MackerelClient::new(&config.backend_url, &config.api_key)?);

    let orchestrator = Orchestrator::new(source, backend)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(tokio::signal::ctrl_c(), cancel.clone()));

    orchestrator.run(cancel).await
}

/// Cancel `cancel` once `interrupt` resolves successfully
///
/// A failure to install the handler is logged and leaves the service running.
async fn cancel_on_interrupt(
    interrupt: impl Future<Output = std::io::Result<()>>,
    cancel: CancellationToken,
) {
    match interrupt.await {
        Ok(()) => {
            info!("received interrupt, shutting down");
            cancel.cancel();
        }
        Err(e) => error!("failed to listen for interrupt, Ctrl-C will not stop the service: {e}"),
    }
}
