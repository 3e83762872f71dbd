use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Process-wide counters exposed on `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounter,
    pub rate_limited: IntCounter,
    pub invoices_created: IntCounter,
    pub payments_recorded: IntCounter,
    pub campaign_sends_ok: IntCounter,
    pub campaign_sends_failed: IntCounter,
    pub router_sync_failures: IntCounter,
    pub audit_dropped: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        Ok(Self {
            http_requests: counter(&registry, "netbill_http_requests_total", "HTTP requests served")?,
            rate_limited: counter(&registry, "netbill_rate_limited_total", "Requests rejected by the rate limiter")?,
            invoices_created: counter(&registry, "netbill_invoices_created_total", "Invoices created")?,
            payments_recorded: counter(&registry, "netbill_payments_recorded_total", "Payments recorded")?,
            campaign_sends_ok: counter(
                &registry,
                "netbill_campaign_sends_ok_total",
                "Campaign messages delivered to the gateway",
            )?,
            campaign_sends_failed: counter(
                &registry,
                "netbill_campaign_sends_failed_total",
                "Campaign messages that failed",
            )?,
            router_sync_failures: counter(
                &registry,
                "netbill_router_sync_failures_total",
                "Router sync operations that failed",
            )?,
            audit_dropped: counter(
                &registry,
                "netbill_audit_dropped_total",
                "Audit records dropped because the writer was saturated",
            )?,
            registry,
        })
    }

    pub fn incr(counter: &IntCounter) {
        counter.inc();
    }

    pub fn add(counter: &IntCounter, n: u64) {
        counter.inc_by(n);
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_prometheus_text() {
        let metrics = Metrics::new().unwrap();
        Metrics::incr(&metrics.invoices_created);
        Metrics::add(&metrics.payments_recorded, 3);

        let text = metrics.render().unwrap();
        assert!(text.contains("# TYPE netbill_invoices_created_total counter"));
        assert!(text.contains("netbill_invoices_created_total 1\n"));
        assert!(text.contains("netbill_payments_recorded_total 3\n"));
        assert!(text.contains("netbill_rate_limited_total 0\n"));
    }

    #[test]
    fn registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        Metrics::incr(&a.http_requests);
        assert_eq!(a.http_requests.get(), 1);
        assert_eq!(b.http_requests.get(), 0);
    }
}
