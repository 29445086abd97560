//! Service wiring: clients, factory, consumer task, HTTP surface.

use std::sync::Arc;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use maestro_agent::AgentFactory;
use maestro_core::{Ctx, MaestroConfig};
use maestro_queue::StreamClient;
use maestro_rest::cache::RedisCache;
use maestro_rest::{DataPlane, HttpClientConfig, RagClient, RestClient};

use crate::orchestrator::Orchestrator;

pub struct AppState {
    pub config: MaestroConfig,
    pub factory: Arc<AgentFactory>,
    pub metrics: PrometheusHandle,
}

pub struct App {
    pub state: Arc<AppState>,
    pub orchestrator: Orchestrator,
    pub cancel: CancellationToken,
}

impl App {
    pub async fn build(config: MaestroConfig) -> anyhow::Result<Self> {
        let metrics = PrometheusBuilder::new().install_recorder()?;
        maestro_core::metrics_defs::describe_all();

        let http_config = HttpClientConfig::from_core(&config.http);

        // Read-through cache for hot config reads, with cross-instance
        // invalidation over pub/sub.
        let redis_client = redis::Client::open(config.redis.url())?;
        let cache_conn = redis_client.get_connection_manager().await?;
        let cache = Arc::new(RedisCache::new(
            cache_conn,
            "maestro",
            std::time::Duration::from_secs(config.http.cache_ttl_secs),
        ));

        let rest = Arc::new(
            RestClient::new(&config.rest.base_url, http_config.clone())?
                .with_cache(Arc::clone(&cache)),
        );
        let rag = Arc::new(RagClient::new(&config.rag.base_url, http_config)?);

        // Startup gate: a data plane that cannot answer /health means the
        // service is misconfigured; refuse to start rather than limp.
        rest.health(&Ctx::new()).await?;

        let factory = AgentFactory::new(
            rest,
            rag,
            &config.llm,
            &config.calendar,
            config.agent.clone(),
        );

        let queue = StreamClient::connect(&config.redis.url()).await?;
        let consumer = format!("orchestrator-{}", uuid::Uuid::new_v4().simple());
        let orchestrator = Orchestrator::new(
            Arc::clone(&factory),
            queue,
            config.redis.queue_to_secretary.clone(),
            config.redis.queue_to_telegram.clone(),
            config.queue.consumer_group.clone(),
            consumer,
            config.queue.max_retries,
            config.queue.retry_window_secs,
            config.queue.pending_idle_ms,
        );

        let state = Arc::new(AppState {
            config,
            factory,
            metrics,
        });

        let cancel = CancellationToken::new();
        tokio::spawn(maestro_rest::cache::run_invalidation_listener(
            redis_client,
            cache,
            cancel.child_token(),
        ));

        Ok(Self {
            state,
            orchestrator,
            cancel,
        })
    }

    /// Startup order: preload caches, start the background refresh, then
    /// consume. Returns once the consumer loop exits.
    pub async fn run(self) -> anyhow::Result<()> {
        let ctx = Ctx::new();
        self.state.factory.preload(&ctx).await;

        let refresh = tokio::spawn(
            Arc::clone(&self.state.factory).run_refresh_loop(self.cancel.child_token()),
        );

        let http = tokio::spawn(crate::http::serve(
            Arc::clone(&self.state),
            self.cancel.child_token(),
        ));

        self.orchestrator.run(self.cancel.clone()).await;

        info!("consumer loop ended, stopping background tasks");
        self.cancel.cancel();
        let _ = refresh.await;
        let _ = http.await;
        self.state.factory.shutdown();
        Ok(())
    }
}
