use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use uncased::Uncased;

use crate::error::{MaestroError, Result};

/// Queue retry budget before a message is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// TTL of the per-message retry counter. Must cover the whole retry window.
pub const DEFAULT_RETRY_WINDOW_SECS: u64 = 3600;
/// Pending-idle time after which an unacked stream entry is reclaimed.
pub const DEFAULT_PENDING_IDLE_MS: u64 = 60_000;

/// Top-level config (maestro.toml + canonical env key overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaestroConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            rest: RestConfig::default(),
            rag: RagConfig::default(),
            calendar: CalendarConfig::default(),
            llm: LlmConfig::default(),
            http: HttpConfig::default(),
            queue: QueueConfig::default(),
            agent: AgentConfig::default(),
            scheduler: SchedulerConfig::default(),
            extractor: ExtractorConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default = "default_queue_to_secretary")]
    pub queue_to_secretary: String,
    #[serde(default = "default_queue_to_telegram")]
    pub queue_to_telegram: String,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            queue_to_secretary: default_queue_to_secretary(),
            queue_to_telegram: default_queue_to_telegram(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_url")]
    pub base_url: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_rest_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_rag_url")]
    pub base_url: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            base_url: default_rag_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_calendar_url")]
    pub base_url: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: default_calendar_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub openai_api_key: String,
    /// Override for OpenAI-compatible gateways. No trailing slash.
    pub openai_base_url: Option<String>,
    pub tavily_api_key: Option<String>,
}

/// Per-call policy of the typed HTTP clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: f64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_retry_min_wait")]
    pub retry_min_wait_secs: f64,
    #[serde(default = "default_retry_max_wait")]
    pub retry_max_wait_secs: f64,
    #[serde(default = "default_fail_max")]
    pub breaker_fail_max: u32,
    #[serde(default = "default_reset_timeout")]
    pub breaker_reset_secs: f64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_timeout(),
            retry_min_wait_secs: default_retry_min_wait(),
            retry_max_wait_secs: default_retry_max_wait(),
            breaker_fail_max: default_fail_max(),
            breaker_reset_secs: default_reset_timeout(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_window")]
    pub retry_window_secs: u64,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_pending_idle")]
    pub pending_idle_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_window_secs: default_retry_window(),
            consumer_group: default_consumer_group(),
            pending_idle_ms: default_pending_idle(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Messages of history loaded into a fresh context window.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Token budget of the model context; drives the summarization check.
    #[serde(default = "default_context_window")]
    pub llm_context_size: u32,
    /// Per model-step timeout in seconds.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: f64,
    #[serde(default = "default_keep_tail")]
    pub messages_to_keep_tail: usize,
    /// Cache refresh cadence of the agent factory.
    #[serde(default = "default_refresh_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            llm_context_size: default_context_window(),
            step_timeout_secs: default_step_timeout(),
            memory_limit: default_memory_limit(),
            memory_threshold: default_memory_threshold(),
            summary_threshold: default_summary_threshold(),
            messages_to_keep_tail: default_keep_tail(),
            refresh_interval_secs: default_refresh_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between reconciliations against the data plane.
    #[serde(default = "default_reconcile_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extract_hours")]
    pub interval_hours: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_extract_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub grafana_url: Option<String>,
    pub prometheus_url: Option<String>,
    pub loki_url: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            bind: default_bind(),
            port: default_port(),
            grafana_url: None,
            prometheus_url: None,
            loki_url: None,
        }
    }
}

impl MaestroConfig {
    /// Load config: explicit path > `maestro.toml` in the working directory,
    /// then the canonical environment keys on top.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let toml_path = path.unwrap_or("maestro.toml");
        Figment::from(Serialized::defaults(MaestroConfig::default()))
            .merge(Toml::file(toml_path))
            .merge(
                Env::raw()
                    .only(CANONICAL_ENV_KEYS)
                    .map(|key| remap_env_key(key.as_str()))
                    .split("."),
            )
            .extract()
            .map_err(|e| MaestroError::Config(e.to_string()))
    }
}

/// Environment keys recognised on top of the TOML file. Names are canonical
/// and unprefixed; each maps onto one nested config field.
const CANONICAL_ENV_KEYS: &[&str] = &[
    "REDIS_HOST",
    "REDIS_PORT",
    "REDIS_DB",
    "REDIS_QUEUE_TO_SECRETARY",
    "REDIS_QUEUE_TO_TELEGRAM",
    "REST_SERVICE_URL",
    "RAG_SERVICE_URL",
    "OPENAI_API_KEY",
    "TAVILY_API_KEY",
    "LOG_LEVEL",
    "HTTP_CLIENT_TIMEOUT",
    "GRAFANA_URL",
    "PROMETHEUS_URL",
    "LOKI_URL",
    "MAX_RETRIES",
];

fn remap_env_key(key: &str) -> Uncased<'static> {
    let mapped = match key.to_ascii_uppercase().as_str() {
        "REDIS_HOST" => "redis.host",
        "REDIS_PORT" => "redis.port",
        "REDIS_DB" => "redis.db",
        "REDIS_QUEUE_TO_SECRETARY" => "redis.queue_to_secretary",
        "REDIS_QUEUE_TO_TELEGRAM" => "redis.queue_to_telegram",
        "REST_SERVICE_URL" => "rest.base_url",
        "RAG_SERVICE_URL" => "rag.base_url",
        "OPENAI_API_KEY" => "llm.openai_api_key",
        "TAVILY_API_KEY" => "llm.tavily_api_key",
        "LOG_LEVEL" => "observability.log_level",
        "HTTP_CLIENT_TIMEOUT" => "http.timeout_secs",
        "GRAFANA_URL" => "observability.grafana_url",
        "PROMETHEUS_URL" => "observability.prometheus_url",
        "LOKI_URL" => "observability.loki_url",
        "MAX_RETRIES" => "queue.max_retries",
        other => return Uncased::from(other.to_owned()),
    };
    Uncased::from(mapped)
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_queue_to_secretary() -> String {
    "queue:to_secretary".to_string()
}
fn default_queue_to_telegram() -> String {
    "queue:to_telegram".to_string()
}
fn default_rest_url() -> String {
    "http://rest-service:8000".to_string()
}
fn default_rag_url() -> String {
    "http://rag-service:8000".to_string()
}
fn default_calendar_url() -> String {
    "http://calendar-service:8000".to_string()
}
fn default_connect_timeout() -> f64 {
    5.0
}
fn default_timeout() -> f64 {
    30.0
}
fn default_retry_min_wait() -> f64 {
    1.0
}
fn default_retry_max_wait() -> f64 {
    10.0
}
fn default_fail_max() -> u32 {
    5
}
fn default_reset_timeout() -> f64 {
    30.0
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_window() -> u64 {
    DEFAULT_RETRY_WINDOW_SECS
}
fn default_consumer_group() -> String {
    "maestro".to_string()
}
fn default_pending_idle() -> u64 {
    DEFAULT_PENDING_IDLE_MS
}
fn default_history_limit() -> usize {
    50
}
fn default_context_window() -> u32 {
    8192
}
fn default_step_timeout() -> u64 {
    60
}
fn default_memory_limit() -> usize {
    5
}
fn default_memory_threshold() -> f64 {
    0.6
}
fn default_summary_threshold() -> f64 {
    0.6
}
fn default_keep_tail() -> usize {
    5
}
fn default_refresh_secs() -> u64 {
    600
}
fn default_reconcile_secs() -> u64 {
    60
}
fn default_extract_hours() -> u64 {
    24
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = MaestroConfig::default();
        assert_eq!(cfg.queue.max_retries, 3);
        assert_eq!(cfg.agent.history_limit, 50);
        assert_eq!(cfg.agent.messages_to_keep_tail, 5);
        assert!((cfg.agent.summary_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(cfg.redis.url(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn env_key_remapping_targets_nested_fields() {
        assert_eq!(remap_env_key("REST_SERVICE_URL").as_str(), "rest.base_url");
        assert_eq!(remap_env_key("MAX_RETRIES").as_str(), "queue.max_retries");
        assert_eq!(
            remap_env_key("REDIS_QUEUE_TO_SECRETARY").as_str(),
            "redis.queue_to_secretary"
        );
    }
}
