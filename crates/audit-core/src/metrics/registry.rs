use crate::config::MonitoringSettings;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Centralized Prometheus registry, gated by `monitoring.enabled`
/// (spec.md §6's config schema). Collectors for the worker pool, circuit
/// breaker, and alert monitor register into one shared instance here
/// rather than each owning a private `Registry`.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    registry: Arc<Mutex<Registry>>,
    settings: MonitoringSettings,
}

impl MetricsRegistry {
    pub fn new(settings: MonitoringSettings) -> Self {
        let registry = Registry::new_custom(Some("audit".to_string()), None).unwrap_or_else(|_| {
            warn!("failed to create custom registry, using default");
            Registry::new()
        });

        Self { registry: Arc::new(Mutex::new(registry)), settings }
    }

    pub fn register<T>(&self, collector: T) -> Result<(), prometheus::Error>
    where
        T: prometheus::core::Collector + 'static,
    {
        if let Ok(registry) = self.registry.lock() {
            registry.register(Box::new(collector))
        } else {
            Err(prometheus::Error::Msg("failed to acquire registry lock".to_string()))
        }
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        if let Ok(registry) = self.registry.lock() {
            registry.gather()
        } else {
            Vec::new()
        }
    }

    pub fn metrics_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!("failed to encode metrics: {e}");
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_else(|e| {
            warn!("failed to convert metrics to utf-8: {e}");
            String::new()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }
}

/// Renders the registry's current state for a `/metrics` scrape.
pub struct MetricsService {
    registry: MetricsRegistry,
}

impl MetricsService {
    pub fn new(registry: MetricsRegistry) -> Self {
        Self { registry }
    }

    pub fn get_metrics(&self) -> String {
        if !self.registry.is_enabled() {
            return "# metrics disabled\n".to_string();
        }

        let mut response = format!(
            "# HELP audit_build_info build metadata\n# TYPE audit_build_info gauge\naudit_build_info{{version=\"{}\"}} 1\n",
            env!("CARGO_PKG_VERSION")
        );
        response.push_str(&self.registry.metrics_text());
        response
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_registry_reports_disabled_text() {
        let settings = MonitoringSettings {
            enabled: false,
            metrics_interval: 60_000,
            health_check_interval: 30_000,
            alert_thresholds: crate::config::AlertThresholds {
                error_rate: 0.1,
                processing_latency: 1000,
                queue_depth: 100,
                memory_usage: 0.8,
            },
        };
        let service = MetricsService::new(MetricsRegistry::new(settings));
        assert_eq!(service.get_metrics(), "# metrics disabled\n");
    }
}
