//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Histogram, IntCounter, IntCounterVec, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Trimming metrics
    pub trim_requests: IntCounterVec,
    pub trim_overflows: IntCounter,
    pub token_budget_used: Histogram,
    pub token_budget_remaining: Histogram,
    pub summarizations: IntCounterVec,

    // Rate limiting metrics
    pub rate_limit_hits: IntCounterVec,
    pub rate_limit_allowed: IntCounterVec,
    pub rate_limit_window_resets: IntCounterVec,

    // History metrics
    pub history_appends: IntCounter,
    pub history_evictions: IntCounter,
    pub history_archives: IntCounter,

    // Conversation turns
    pub turns: IntCounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let trim_requests = register_int_counter_vec_with_registry!(
            Opts::new("trim_requests_total", "Total history trims by strategy"),
            &["strategy"],
            registry
        )?;

        let trim_overflows = register_int_counter_with_registry!(
            Opts::new(
                "trim_overflows_total",
                "Trims that had to drop or summarize messages"
            ),
            registry
        )?;

        let token_budget_used = register_histogram_with_registry!(
            "token_budget_used",
            "Tokens in trimmed context",
            registry
        )?;

        let token_budget_remaining = register_histogram_with_registry!(
            "token_budget_remaining",
            "Tokens left in budget after trimming",
            registry
        )?;

        let summarizations = register_int_counter_vec_with_registry!(
            Opts::new("summarizations_total", "Summarizations by outcome"),
            &["outcome"],
            registry
        )?;

        let rate_limit_hits = register_int_counter_vec_with_registry!(
            Opts::new("rate_limit_hits_total", "Calls rejected by the quota guard"),
            &["resource"],
            registry
        )?;

        let rate_limit_allowed = register_int_counter_vec_with_registry!(
            Opts::new("rate_limit_allowed_total", "Calls admitted by the quota guard"),
            &["resource"],
            registry
        )?;

        let rate_limit_window_resets = register_int_counter_vec_with_registry!(
            Opts::new("rate_limit_window_resets_total", "Quota window resets"),
            &["resource"],
            registry
        )?;

        let history_appends = register_int_counter_with_registry!(
            Opts::new("history_appends_total", "Messages persisted"),
            registry
        )?;

        let history_evictions = register_int_counter_with_registry!(
            Opts::new("history_evictions_total", "History artifacts evicted"),
            registry
        )?;

        let history_archives = register_int_counter_with_registry!(
            Opts::new("history_archives_total", "Sessions archived"),
            registry
        )?;

        let turns = register_int_counter_vec_with_registry!(
            Opts::new("conversation_turns_total", "Conversation turns by outcome"),
            &["outcome"],
            registry
        )?;

        Ok(Self {
            registry,
            trim_requests,
            trim_overflows,
            token_budget_used,
            token_budget_remaining,
            summarizations,
            rate_limit_hits,
            rate_limit_allowed,
            rate_limit_window_resets,
            history_appends,
            history_evictions,
            history_archives,
            turns,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a trim and its token usage
    pub fn record_trim(&self, strategy: &str, used: usize, remaining: usize, overflow: bool) {
        self.trim_requests.with_label_values(&[strategy]).inc();
        self.token_budget_used.observe(used as f64);
        self.token_budget_remaining.observe(remaining as f64);
        if overflow {
            self.trim_overflows.inc();
        }
    }

    /// Record a summarization attempt
    pub fn record_summarization(&self, degraded: bool) {
        let outcome = if degraded { "degraded" } else { "success" };
        self.summarizations.with_label_values(&[outcome]).inc();
    }

    /// Record rate limit decision
    pub fn record_rate_limit(&self, resource: &str, allowed: bool) {
        if allowed {
            self.rate_limit_allowed.with_label_values(&[resource]).inc();
        } else {
            self.rate_limit_hits.with_label_values(&[resource]).inc();
        }
    }

    pub fn record_window_reset(&self, resource: &str) {
        self.rate_limit_window_resets
            .with_label_values(&[resource])
            .inc();
    }

    pub fn record_history_append(&self) {
        self.history_appends.inc();
    }

    pub fn record_evictions(&self, count: usize) {
        self.history_evictions.inc_by(count as u64);
    }

    pub fn record_archive(&self) {
        self.history_archives.inc();
    }

    /// Record how a conversation turn ended
    pub fn record_turn(&self, outcome: &str) {
        self.turns.with_label_values(&[outcome]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
