//! Operator metrics
use crate::Result;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

/// Metrics owned by one operator instance, on their own registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    lock: IntGaugeVec,
    reconciles: IntCounterVec,
    failures: IntCounterVec,
    queue_depth: IntGauge,
}

impl Metrics {
    /// Create and register every metric
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let lock = IntGaugeVec::new(
            Opts::new("vmo_lock", "Set to 1 while an instance is locked against reconciliation"),
            &["namespace", "vmo_name"],
        )?;
        let reconciles = IntCounterVec::new(
            Opts::new("vmo_reconcile_total", "Pipeline steps run"),
            &["step"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new("vmo_reconcile_errors_total", "Pipeline steps that failed"),
            &["step"],
        )?;
        let queue_depth = IntGauge::new("vmo_queue_depth", "Instances waiting for a pass")?;

        registry.register(Box::new(lock.clone()))?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        Ok(Self {
            registry,
            lock,
            reconciles,
            failures,
            queue_depth,
        })
    }

    /// Mark an instance as locked, or drop its series once unlocked
    pub fn set_locked(&self, namespace: &str, name: &str, locked: bool) {
        if locked {
            self.lock.with_label_values(&[namespace, name]).set(1);
        } else {
            // absent series is fine
            let _ = self.lock.remove_label_values(&[namespace, name]);
        }
    }

    /// Record the outcome of one pipeline step
    pub fn step_finished(&self, step: &str, ok: bool) {
        self.reconciles.with_label_values(&[step]).inc();
        if !ok {
            self.failures.with_label_values(&[step]).inc();
        }
    }

    /// Publish the number of instances waiting for a pass
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Text exposition of every metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_series_is_removed_on_unlock() {
        let metrics = Metrics::new().unwrap();
        metrics.set_locked("monitoring", "system", true);
        assert!(metrics
            .render()
            .unwrap()
            .contains(r#"vmo_lock{namespace="monitoring",vmo_name="system"} 1"#));

        metrics.set_locked("monitoring", "system", false);
        assert!(!metrics.render().unwrap().contains("vmo_name=\"system\""));
        // unlocking twice is harmless
        metrics.set_locked("monitoring", "system", false);
    }

    #[test]
    fn step_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.step_finished("services", true);
        metrics.step_finished("config_maps", false);
        metrics.set_queue_depth(3);
        let text = metrics.render().unwrap();
        assert!(text.contains(r#"vmo_reconcile_total{step="services"} 1"#));
        assert!(text.contains(r#"vmo_reconcile_errors_total{step="config_maps"} 1"#));
        assert!(!text.contains(r#"vmo_reconcile_errors_total{step="services"}"#));
        assert!(text.contains("vmo_queue_depth 3"));
    }
}
