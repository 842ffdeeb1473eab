// Prometheus metrics definitions for the ladder backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Matches created but not yet completed.
    pub static ref PENDING_MATCHES: IntGauge =
        IntGauge::new("ladder_pending_matches", "Matches awaiting a result").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total matches created.
    pub static ref MATCHES_CREATED_TOTAL: IntCounter =
        IntCounter::new("ladder_matches_created_total", "Total matches created").unwrap();

    /// Total matches completed (result reported and ratings applied).
    pub static ref MATCHES_COMPLETED_TOTAL: IntCounter =
        IntCounter::new("ladder_matches_completed_total", "Total matches completed").unwrap();

    /// Total rating adjustments applied (one per completed match).
    pub static ref RATING_UPDATES_TOTAL: IntCounter =
        IntCounter::new("ladder_rating_updates_total", "Total rating adjustments applied").unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    /// Total requests to the tournament provider, by operation and outcome.
    pub static ref PROVIDER_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ladder_provider_requests_total", "Total tournament provider requests"),
        &["operation", "outcome"],
    )
    .unwrap();

    /// Total OAuth access-token refreshes against the provider.
    pub static ref PROVIDER_TOKEN_REFRESHES_TOTAL: IntCounter = IntCounter::new(
        "ladder_provider_token_refreshes_total",
        "OAuth token refreshes performed",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "ladder_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(PENDING_MATCHES.clone()),
        Box::new(MATCHES_CREATED_TOTAL.clone()),
        Box::new(MATCHES_COMPLETED_TOTAL.clone()),
        Box::new(RATING_UPDATES_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(PROVIDER_REQUESTS_TOTAL.clone()),
        Box::new(PROVIDER_TOKEN_REFRESHES_TOTAL.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Normalize a URL path for metric labels: replace numeric path segments with `:id`
/// to prevent cardinality explosion.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
