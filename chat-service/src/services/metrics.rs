//! Prometheus metrics for chat-service.
//!
//! Attempt, generation, quota and persistence counters. Recording helpers are
//! no-ops until [`init_metrics`] has run, so library code and tests can call
//! them freely.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Orchestration metrics
pub static GENAI_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static GENAI_ATTEMPT_LATENCY_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static GENAI_GENERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

// Quota metrics
pub static USAGE_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

// Persistence metrics
pub static SESSION_PERSIST_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static SESSION_COMPENSATIONS_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Initialize all metrics. Must be called once at startup.
pub fn init_metrics() {
    let registry = Registry::new();

    // One increment per attempt; outcome is success or the attempt class
    let attempts = IntCounterVec::new(
        Opts::new("genai_attempts_total", "Total generation attempts"),
        &["endpoint", "outcome"],
    )
    .expect("Failed to create genai_attempts_total metric");

    let attempt_latency = HistogramVec::new(
        HistogramOpts::new(
            "genai_attempt_latency_seconds",
            "Latency of a single generation attempt in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["endpoint"],
    )
    .expect("Failed to create genai_attempt_latency_seconds metric");

    let generations = IntCounterVec::new(
        Opts::new("genai_generations_total", "Total orchestrated generations"),
        &["result"], // success, exhausted, rejected, cancelled
    )
    .expect("Failed to create genai_generations_total metric");

    let usage_decisions = IntCounterVec::new(
        Opts::new("usage_decisions_total", "Total usage gate decisions"),
        &["decision"],
    )
    .expect("Failed to create usage_decisions_total metric");

    let persist = IntCounterVec::new(
        Opts::new("session_persist_total", "Total turn persistence outcomes"),
        &["outcome"],
    )
    .expect("Failed to create session_persist_total metric");

    let compensations = IntCounter::new(
        "session_compensations_total",
        "Sessions created to repair a missing parent row",
    )
    .expect("Failed to create session_compensations_total metric");

    // Register all metrics
    registry
        .register(Box::new(attempts.clone()))
        .expect("Failed to register genai_attempts_total");
    registry
        .register(Box::new(attempt_latency.clone()))
        .expect("Failed to register genai_attempt_latency_seconds");
    registry
        .register(Box::new(generations.clone()))
        .expect("Failed to register genai_generations_total");
    registry
        .register(Box::new(usage_decisions.clone()))
        .expect("Failed to register usage_decisions_total");
    registry
        .register(Box::new(persist.clone()))
        .expect("Failed to register session_persist_total");
    registry
        .register(Box::new(compensations.clone()))
        .expect("Failed to register session_compensations_total");

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = GENAI_ATTEMPTS_TOTAL.set(attempts);
    let _ = GENAI_ATTEMPT_LATENCY_SECONDS.set(attempt_latency);
    let _ = GENAI_GENERATIONS_TOTAL.set(generations);
    let _ = USAGE_DECISIONS_TOTAL.set(usage_decisions);
    let _ = SESSION_PERSIST_TOTAL.set(persist);
    let _ = SESSION_COMPENSATIONS_TOTAL.set(compensations);

    tracing::info!("Prometheus metrics initialized");
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

// Helper functions for recording metrics

/// Record one attempt against an endpoint.
pub fn record_attempt(endpoint: &str, outcome: &str, duration_secs: f64) {
    if let Some(counter) = GENAI_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[endpoint, outcome]).inc();
    }
    if let Some(histogram) = GENAI_ATTEMPT_LATENCY_SECONDS.get() {
        histogram.with_label_values(&[endpoint]).observe(duration_secs);
    }
}

/// Record the terminal result of an orchestration call.
pub fn record_generation(result: &str) {
    if let Some(counter) = GENAI_GENERATIONS_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}

/// Record a usage gate decision.
pub fn record_usage_decision(decision: &str) {
    if let Some(counter) = USAGE_DECISIONS_TOTAL.get() {
        counter.with_label_values(&[decision]).inc();
    }
}

/// Record a persistence outcome.
pub fn record_persist(outcome: &str) {
    if let Some(counter) = SESSION_PERSIST_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_compensation() {
    if let Some(counter) = SESSION_COMPENSATIONS_TOTAL.get() {
        counter.inc();
    }
}
