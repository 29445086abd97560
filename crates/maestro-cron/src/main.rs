//! `maestro-cron` — hosts the reminder scheduler and the periodic memory
//! extraction job in one process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use maestro_core::MaestroConfig;
use maestro_extractor::{MemoryExtractionJob, OpenAiBatchProvider};
use maestro_queue::StreamClient;
use maestro_rest::{HttpClientConfig, RagClient, RestClient};
use maestro_scheduler::{QueueTriggerSink, ReminderScheduler};

#[derive(Parser)]
#[command(name = "maestro-cron", about = "Maestro scheduler and extraction service")]
struct Cli {
    /// Path to maestro.toml (defaults to ./maestro.toml, env on top).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = MaestroConfig::load(cli.config.as_deref())?;
    maestro_core::logging::init("maestro-cron", &config.observability.log_level);

    let metrics = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    maestro_core::metrics_defs::describe_all();

    let http_config = HttpClientConfig::from_core(&config.http);
    let rest = Arc::new(RestClient::new(&config.rest.base_url, http_config.clone())?);
    let rag = Arc::new(RagClient::new(&config.rag.base_url, http_config)?);

    // Refuse to start against an unreachable data plane.
    maestro_rest::DataPlane::health(rest.as_ref(), &maestro_core::Ctx::new()).await?;

    // Dedicated publish connection, separate from any consumer pool.
    let queue = StreamClient::connect(&config.redis.url()).await?;
    let sink = Arc::new(QueueTriggerSink::new(
        queue,
        config.redis.queue_to_secretary.clone(),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            cancel.cancel();
        });
    }

    let scheduler = ReminderScheduler::new(
        Arc::clone(&rest) as Arc<dyn maestro_rest::DataPlane>,
        sink,
        Duration::from_secs(config.scheduler.reconcile_interval_secs),
    );
    let scheduler_task = tokio::spawn(scheduler.run(cancel.child_token()));

    let provider = Arc::new(OpenAiBatchProvider::new(
        config.llm.openai_api_key.clone(),
        config.llm.openai_base_url.clone(),
    ));
    let mut extraction = MemoryExtractionJob::new(
        Arc::clone(&rest) as Arc<dyn maestro_rest::DataPlane>,
        rag,
        provider,
    );
    let extraction_interval = Duration::from_secs(config.extractor.interval_hours * 3600);
    let extraction_cancel = cancel.child_token();
    let extraction_task = tokio::spawn(async move {
        loop {
            let stats = extraction.run().await;
            info!(status = %stats.status, "extraction cycle complete");
            tokio::select! {
                _ = extraction_cancel.cancelled() => break,
                _ = tokio::time::sleep(extraction_interval) => {}
            }
        }
    });

    let http_task = tokio::spawn(serve_health(
        format!(
            "{}:{}",
            config.observability.bind, config.observability.port
        ),
        metrics,
        cancel.child_token(),
    ));

    let _ = scheduler_task.await;
    cancel.cancel();
    let _ = extraction_task.await;
    let _ = http_task.await;
    info!("maestro-cron stopped");
    Ok(())
}

async fn serve_health(
    addr: String,
    metrics: metrics_exporter_prometheus::PrometheusHandle,
    cancel: CancellationToken,
) {
    let addr: SocketAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid bind address, health surface disabled");
            return;
        }
    };
    let router = Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "healthy"})) }),
        )
        .route(
            "/metrics",
            get(move || {
                let handle = metrics.clone();
                async move { handle.render() }
            }),
        );
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "could not bind health surface");
            return;
        }
    };
    info!(%addr, "health/metrics endpoint listening");
    let _ = axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
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
