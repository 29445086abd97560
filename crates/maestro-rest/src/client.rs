//! The shared HTTP call policy: timeouts, retry, circuit breaking,
//! correlation propagation and latency metrics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use metrics::histogram;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use maestro_core::ctx::{Ctx, CORRELATION_HEADER};
use maestro_core::metrics_defs;
use maestro_core::logging::EventType;

use crate::breaker::{endpoint_template, CircuitBreaker};
use crate::error::{RestError, Result};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub retry_min_wait: Duration,
    pub retry_max_wait: Duration,
    /// Total budget for one logical call including retries.
    pub max_elapsed: Duration,
    pub breaker_fail_max: u32,
    pub breaker_reset_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
            retry_min_wait: Duration::from_secs(1),
            retry_max_wait: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(60),
            breaker_fail_max: 5,
            breaker_reset_timeout: Duration::from_secs(30),
        }
    }
}

impl HttpClientConfig {
    pub fn from_core(http: &maestro_core::config::HttpConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs_f64(http.connect_timeout_secs),
            timeout: Duration::from_secs_f64(http.timeout_secs),
            retry_min_wait: Duration::from_secs_f64(http.retry_min_wait_secs),
            retry_max_wait: Duration::from_secs_f64(http.retry_max_wait_secs),
            max_elapsed: Duration::from_secs_f64(http.timeout_secs * 2.0),
            breaker_fail_max: http.breaker_fail_max,
            breaker_reset_timeout: Duration::from_secs_f64(http.breaker_reset_secs),
        }
    }
}

/// Outcome of a single HTTP attempt, before policy is applied.
#[derive(Debug)]
enum CallFailure {
    Timeout,
    Connect(String),
    Status { status: u16, detail: String },
    Decode(String),
}

/// One client per target service; long-lived, internally pooled.
pub struct HttpClient {
    client: reqwest::Client,
    service: String,
    base_url: String,
    config: HttpClientConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl HttpClient {
    pub fn new(service: impl Into<String>, base_url: impl Into<String>, config: HttpClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| RestError::ServiceUnavailable {
                service: "http".to_string(),
                endpoint: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            service: service.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
            breakers: Mutex::new(HashMap::new()),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// GET/POST/… returning a decoded JSON body.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        ctx: &Ctx,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let text = self.execute(ctx, method, path, body).await?;
        serde_json::from_str(&text).map_err(|e| RestError::Decode(e.to_string()))
    }

    /// Like [`Self::request_json`] but maps a 404 to `None`.
    pub async fn request_optional<T: DeserializeOwned>(
        &self,
        ctx: &Ctx,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<T>> {
        match self.request_json(ctx, method, path, body).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Request whose response body is irrelevant.
    pub async fn request_unit(
        &self,
        ctx: &Ctx,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<()> {
        self.execute(ctx, method, path, body).await.map(|_| ())
    }

    async fn execute(
        &self,
        ctx: &Ctx,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<String> {
        let template = endpoint_template(path);
        let breaker = self.breaker_for(&template);

        if !breaker.try_acquire() {
            warn!(
                service = %self.service,
                endpoint = %template,
                correlation_id = %ctx.correlation_id,
                "failing fast: circuit breaker open"
            );
            return Err(RestError::ServiceUnavailable {
                service: self.service.clone(),
                endpoint: template,
                reason: "circuit breaker open".to_string(),
            });
        }

        let url = format!("{}{}", self.base_url, path);
        let policy = ExponentialBackoff {
            initial_interval: self.config.retry_min_wait,
            max_interval: self.config.retry_max_wait,
            max_elapsed_time: Some(self.config.max_elapsed),
            ..ExponentialBackoff::default()
        };

        let started = Instant::now();
        let outcome = backoff::future::retry(policy, || {
            let method = method.clone();
            let url = url.clone();
            let body = body.clone();
            async move { self.attempt(ctx, method, &url, body).await }
        })
        .await;

        histogram!(
            metrics_defs::REST_LATENCY,
            "service" => self.service.clone(),
            "endpoint" => template.clone(),
            "method" => method.as_str().to_string()
        )
        .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(text) => {
                breaker.record_success();
                Ok(text)
            }
            Err(failure) => {
                let err = match failure {
                    CallFailure::Timeout => {
                        breaker.record_failure();
                        RestError::ServiceTimeout {
                            service: self.service.clone(),
                            endpoint: template,
                        }
                    }
                    CallFailure::Connect(reason) => {
                        breaker.record_failure();
                        RestError::ServiceUnavailable {
                            service: self.service.clone(),
                            endpoint: template,
                            reason,
                        }
                    }
                    CallFailure::Status { status, detail } => {
                        if status >= 500 {
                            breaker.record_failure();
                        } else {
                            // The service is alive and answered; a 4xx says
                            // nothing about its health.
                            breaker.record_success();
                        }
                        RestError::ServiceResponse { status, detail }
                    }
                    CallFailure::Decode(detail) => {
                        breaker.record_success();
                        RestError::Decode(detail)
                    }
                };
                Err(err)
            }
        }
    }

    /// One HTTP attempt. Transport failures and 5xx are transient (retried
    /// with backoff); 4xx is permanent.
    async fn attempt(
        &self,
        ctx: &Ctx,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> std::result::Result<String, backoff::Error<CallFailure>> {
        debug!(
            service = %self.service,
            method = %method,
            url,
            correlation_id = %ctx.correlation_id,
            event_type = %EventType::RequestOut,
            "data-plane request"
        );
        let mut request = self
            .client
            .request(method, url)
            .header(CORRELATION_HEADER, &ctx.correlation_id);
        if let Some(b) = body {
            request = request.json(&b);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(backoff::Error::transient(CallFailure::Timeout))
            }
            Err(e) if e.is_connect() => {
                return Err(backoff::Error::transient(CallFailure::Connect(e.to_string())))
            }
            Err(e) => {
                return Err(backoff::Error::permanent(CallFailure::Connect(
                    e.to_string(),
                )))
            }
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| backoff::Error::permanent(CallFailure::Decode(e.to_string())))?;

        if status.is_success() {
            Ok(text)
        } else if status.is_server_error() {
            Err(backoff::Error::transient(CallFailure::Status {
                status: status.as_u16(),
                detail: text,
            }))
        } else {
            Err(backoff::Error::permanent(CallFailure::Status {
                status: status.as_u16(),
                detail: text,
            }))
        }
    }

    fn breaker_for(&self, template: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(template.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    format!("{}:{}", self.service, template),
                    self.config.breaker_fail_max,
                    self.config.breaker_reset_timeout,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakers_are_shared_per_template() {
        let client = HttpClient::new(
            "rest-service",
            "http://localhost:9",
            HttpClientConfig::default(),
        )
        .unwrap();
        let a = client.breaker_for("/api/users/{id}");
        let b = client.breaker_for("/api/users/{id}");
        assert!(Arc::ptr_eq(&a, &b));
        let c = client.breaker_for("/api/assistants");
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn open_breaker_fails_fast() {
        let mut config = HttpClientConfig::default();
        config.breaker_fail_max = 1;
        let client = HttpClient::new("rest-service", "http://localhost:9", config).unwrap();
        let breaker = client.breaker_for("/api/users/{id}");
        breaker.record_failure();

        let ctx = Ctx::new();
        let err = client
            .request_unit(&ctx, Method::GET, "/api/users/42", None)
            .await
            .unwrap_err();
        match err {
            RestError::ServiceUnavailable { reason, .. } => {
                assert!(reason.contains("circuit breaker open"))
            }
            other => panic!("expected ServiceUnavailable, got {other:?}"),
        }
    }
}
