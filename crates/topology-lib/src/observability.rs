//! Observability for construction passes
//!
//! Provides:
//! - Prometheus metrics (pass latency, skipped samples, created entities)
//! - Structured logging of pass and external service events with tracing

use crate::constructor::{ExternalService, PassStats};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Histogram buckets for pass latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<Option<ConstructorMetricsInner>> = OnceLock::new();

struct ConstructorMetricsInner {
    registry: Registry,
    pass_latency_seconds: Histogram,
    passes: IntCounter,
    samples_skipped: IntCounter,
    instances_created: IntCounter,
    unresolved_connections: IntCounter,
    external_services: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl ConstructorMetricsInner {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let pass_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "topology_pass_latency_seconds",
                "Time spent in one construction pass",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(pass_latency_seconds.clone()))?;

        Ok(Self {
            passes: counter(
                &registry,
                "topology_passes_total",
                "Total number of construction passes",
            )?,
            samples_skipped: counter(
                &registry,
                "topology_samples_skipped_total",
                "Samples that could not be attributed to an entity",
            )?,
            instances_created: counter(
                &registry,
                "topology_instances_created_total",
                "Instances created from container identifiers",
            )?,
            unresolved_connections: counter(
                &registry,
                "topology_unresolved_connections_total",
                "Connections without a known remote instance after resolution",
            )?,
            external_services: counter(
                &registry,
                "topology_external_services_total",
                "Connections attributed to a synthesized external service",
            )?,
            pass_latency_seconds,
            registry,
        })
    }
}

/// Construction metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics. If registration fails the handle is a no-op.
#[derive(Clone)]
pub struct ConstructorMetrics {
    _private: (),
}

impl Default for ConstructorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstructorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match ConstructorMetricsInner::new() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register construction metrics");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&ConstructorMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    /// Record one finished pass
    pub fn observe_pass(&self, duration_secs: f64, stats: &PassStats) {
        let Some(m) = self.inner() else {
            return;
        };
        m.pass_latency_seconds.observe(duration_secs);
        m.passes.inc();
        m.samples_skipped.inc_by(stats.samples_skipped as u64);
        m.instances_created.inc_by(stats.instances_created as u64);
        m.unresolved_connections.inc_by(stats.unresolved_connections as u64);
        m.external_services.inc_by(stats.external_services as u64);
    }

    pub fn passes(&self) -> u64 {
        self.inner().map(|m| m.passes.get()).unwrap_or(0)
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let Some(m) = self.inner() else {
            return String::new();
        };
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&m.registry.gather(), &mut buf) {
            warn!(error = %e, "Failed to encode construction metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Structured logger for construction events
#[derive(Clone)]
pub struct StructuredLogger {
    project: String,
}

impl StructuredLogger {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
        }
    }

    pub fn log_pass_started(&self, samples: usize, applications: usize) {
        debug!(
            event = "pass_started",
            project = %self.project,
            samples = samples,
            applications = applications,
            "Construction pass started"
        );
    }

    pub fn log_pass_finished(&self, stats: &PassStats, elapsed_ms: u128) {
        info!(
            event = "pass_finished",
            project = %self.project,
            samples = stats.samples,
            samples_skipped = stats.samples_skipped,
            instances_created = stats.instances_created,
            connections = stats.connections,
            unresolved_connections = stats.unresolved_connections,
            external_services = stats.external_services,
            elapsed_ms = elapsed_ms as u64,
            "Construction pass finished"
        );
    }

    pub fn log_external_service(&self, service: &ExternalService) {
        debug!(
            event = "external_service",
            project = %self.project,
            application = %service.application,
            instance = %service.instance,
            custom = service.custom,
            "Attributed connection to external service"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_metrics_observe_pass() {
        let metrics = ConstructorMetrics::new();
        let before = metrics.passes();
        let stats = PassStats {
            samples_skipped: 2,
            external_services: 1,
            ..Default::default()
        };

        metrics.observe_pass(0.003, &stats);
        assert!(metrics.passes() > before);
        let text = metrics.gather_text();
        assert!(text.contains("topology_pass_latency_seconds"));
        assert!(text.contains("topology_samples_skipped_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("prod");
        assert_eq!(logger.project, "prod");
    }
}
