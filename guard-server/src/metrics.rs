use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_INGESTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "guard_readings_ingested_total",
        "Total readings appended to the store"
    ))
    .unwrap();
    pub static ref INVALID_PAYLOADS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "guard_invalid_payloads_total",
        "Total ingestion payloads rejected by validation"
    ))
    .unwrap();
    pub static ref STORAGE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "guard_storage_failures_total",
        "Total storage operations that failed"
    ))
    .unwrap();
    pub static ref SYNC_TICKS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "guard_sync_ticks_total",
        "Total feed synchronization ticks"
    ))
    .unwrap();
    pub static ref SYNC_DUPLICATES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "guard_sync_duplicates_total",
        "Feed entries skipped because they were already stored"
    ))
    .unwrap();
    pub static ref SYNC_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "guard_sync_failures_total",
        "Feed synchronization ticks that ended in an error"
    ))
    .unwrap();
    pub static ref INSIGHT_ATTEMPTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "guard_insight_attempts_total",
        "Total calls issued to the text generation service"
    ))
    .unwrap();
    pub static ref INSIGHT_KEY_ROTATIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "guard_insight_key_rotations_total",
        "Credential rotations caused by quota exhaustion"
    ))
    .unwrap();
    pub static ref INSIGHT_FALLBACKS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "guard_insight_fallbacks_total",
        "Insight operations answered with their local fallback"
    ))
    .unwrap();
    pub static ref INSIGHT_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "guard_insight_latency_seconds",
            "Time taken by a single text generation call"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY
        .register(Box::new(READINGS_INGESTED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INVALID_PAYLOADS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(STORAGE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(SYNC_TICKS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(SYNC_DUPLICATES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SYNC_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INSIGHT_ATTEMPTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INSIGHT_KEY_ROTATIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INSIGHT_FALLBACKS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INSIGHT_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
