//! Metric names and registration.
//!
//! All series are described once at process start so the Prometheus endpoint
//! exposes help texts even before the first observation.

use metrics::{describe_counter, describe_gauge, describe_histogram};

pub const CACHE_HITS: &str = "maestro_cache_hits_total";
pub const CACHE_MISSES: &str = "maestro_cache_misses_total";
pub const REST_LATENCY: &str = "maestro_rest_request_duration_seconds";
pub const BREAKER_TRANSITIONS: &str = "maestro_circuit_breaker_transitions_total";
pub const QUEUE_PUBLISHED: &str = "maestro_queue_published_total";
pub const QUEUE_CONSUMED: &str = "maestro_queue_consumed_total";
pub const QUEUE_DLQ: &str = "maestro_queue_dlq_total";
pub const QUEUE_DEPTH: &str = "maestro_queue_depth";
pub const MESSAGE_RETRIES: &str = "maestro_message_retries";
pub const JOB_DURATION: &str = "maestro_job_duration_seconds";
pub const JOB_RUNS: &str = "maestro_job_runs_total";

pub fn describe_all() {
    describe_counter!(CACHE_HITS, "Read-through cache hits, by prefix and key pattern");
    describe_counter!(CACHE_MISSES, "Read-through cache misses, by prefix and key pattern");
    describe_histogram!(
        REST_LATENCY,
        "REST client latency, by target service, endpoint template and method"
    );
    describe_counter!(
        BREAKER_TRANSITIONS,
        "Circuit-breaker state transitions, by endpoint template and new state"
    );
    describe_counter!(QUEUE_PUBLISHED, "Stream entries published, by stream");
    describe_counter!(QUEUE_CONSUMED, "Stream entries consumed, by stream");
    describe_counter!(QUEUE_DLQ, "Entries forwarded to the dead-letter stream");
    describe_gauge!(QUEUE_DEPTH, "Approximate stream length, by stream");
    describe_histogram!(MESSAGE_RETRIES, "Retry count observed when a message settles");
    describe_histogram!(JOB_DURATION, "Background job duration, by job name");
    describe_counter!(JOB_RUNS, "Background job executions, by job name and status");
}
