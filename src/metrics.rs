//! Prometheus metrics registry and instruments.
//!
//! Instruments are usable before `init_metrics` runs; registration only
//! makes them visible to `gather_text`.

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Event Bus Metrics
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("campuswall_events_published_total", "Total number of domain events published"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref LISTENER_INVOCATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("campuswall_listener_invocations_total", "Total number of listener invocations"),
        &["listener", "outcome"]
    ).expect("metric can be created");
    pub static ref LISTENER_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "campuswall_listener_duration_seconds",
            "Listener invocation duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["listener"]
    ).expect("metric can be created");
    pub static ref LISTENERS_IN_FLIGHT: IntGauge = IntGauge::new(
        "campuswall_listeners_in_flight",
        "Current number of running listener invocations"
    ).expect("metric can be created");

    // Store Metrics
    pub static ref COUNTER_UPDATES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("campuswall_counter_updates_total", "Total number of denormalized counter updates"),
        &["target", "field", "direction"]
    ).expect("metric can be created");
    pub static ref NOTIFICATIONS_WRITTEN_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("campuswall_notifications_written_total", "Total number of notification writes"),
        &["notification_type", "action"]
    ).expect("metric can be created");

    // Agent Metrics
    pub static ref AGENT_REPLIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("campuswall_agent_replies_total", "Total number of agent reply attempts"),
        &["trigger", "outcome"]
    ).expect("metric can be created");
    pub static ref GENERATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "campuswall_generation_duration_seconds",
            "Text generation request duration in seconds"
        ).buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["outcome"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("campuswall_errors_total", "Total number of errors"),
        &["error_type", "origin"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(EVENTS_PUBLISHED_TOTAL.clone()))
        .expect("EVENTS_PUBLISHED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(LISTENER_INVOCATIONS_TOTAL.clone()))
        .expect("LISTENER_INVOCATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(LISTENER_DURATION_SECONDS.clone()))
        .expect("LISTENER_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(LISTENERS_IN_FLIGHT.clone()))
        .expect("LISTENERS_IN_FLIGHT can be registered");
    REGISTRY
        .register(Box::new(COUNTER_UPDATES_TOTAL.clone()))
        .expect("COUNTER_UPDATES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(NOTIFICATIONS_WRITTEN_TOTAL.clone()))
        .expect("NOTIFICATIONS_WRITTEN_TOTAL can be registered");
    REGISTRY
        .register(Box::new(AGENT_REPLIES_TOTAL.clone()))
        .expect("AGENT_REPLIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(GENERATION_DURATION_SECONDS.clone()))
        .expect("GENERATION_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Render every registered metric in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, crate::error::AppError> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| crate::error::AppError::Internal(e.into()))?;
    String::from_utf8(buffer).map_err(|e| crate::error::AppError::Internal(e.into()))
}
