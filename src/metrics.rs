//! Prometheus instruments for migration operations

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::time::Duration;

/// The three migration instruments, registered in their own [`Registry`]
///
/// Each manager gets its own instance unless one is injected, so tests and
/// embedded use never collide on the global default registry.
#[derive(Clone)]
pub struct MigrationMetrics {
    pub registry: Registry,
    pub applied_total: IntCounter,
    pub rollback_total: IntCounter,
    pub duration: Histogram,
}

impl MigrationMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let applied_total = IntCounter::new("migrations_applied_total", "Total migration versions applied")?;
        let rollback_total =
            IntCounter::new("migrations_rollback_total", "Total migration versions rolled back")?;
        let duration = Histogram::with_opts(HistogramOpts::new(
            "migration_duration_seconds",
            "Wall-clock duration of migration operations",
        ))?;

        registry.register(Box::new(applied_total.clone()))?;
        registry.register(Box::new(rollback_total.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            applied_total,
            rollback_total,
            duration,
        })
    }

    pub fn record_applied(&self, versions: u64) {
        self.applied_total.inc_by(versions);
    }

    pub fn record_rollback(&self, versions: u64) {
        self.rollback_total.inc_by(versions);
    }

    pub fn observe_duration(&self, elapsed: Duration) {
        self.duration.observe(elapsed.as_secs_f64());
    }

    /// Registry contents in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_exposes_all_instruments() {
        let metrics = MigrationMetrics::new().unwrap();
        metrics.record_applied(3);
        metrics.record_rollback(1);
        metrics.observe_duration(Duration::from_millis(250));

        let text = metrics.render().unwrap();
        assert!(text.contains("migrations_applied_total 3"));
        assert!(text.contains("migrations_rollback_total 1"));
        assert!(text.contains("migration_duration_seconds_count 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = MigrationMetrics::new().unwrap();
        let b = MigrationMetrics::new().unwrap();
        a.record_applied(2);
        assert_eq!(a.applied_total.get(), 2);
        assert_eq!(b.applied_total.get(), 0);
    }
}
