use clap::Parser;
use tracing::info;

use maestro_core::MaestroConfig;

#[derive(Parser)]
#[command(name = "maestro-orchestrator", about = "Maestro message orchestrator service")]
struct Cli {
    /// Path to maestro.toml (defaults to ./maestro.toml, env on top).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = MaestroConfig::load(cli.config.as_deref())?;
    maestro_core::logging::init("maestro-orchestrator", &config.observability.log_level);

    let app = maestro_orchestrator::app::App::build(config).await?;
    let cancel = app.cancel.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });

    app.run().await
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("sigint handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
