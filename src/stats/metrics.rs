//! GC Metrics - Export Metrics
//!
//! Module for exporting metrics to monitoring systems
//! (Prometheus, Grafana, etc.)

use crate::error::{GcError, Result};
use indexmap::IndexMap;
use std::sync::Mutex;

/// GcMetrics - metrics exporter
///
/// Export GC metrics in various formats.
pub struct GcMetrics {
    /// Metrics data
    metrics: Mutex<IndexMap<String, MetricValue>>,
}

impl GcMetrics {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(IndexMap::new()),
        }
    }

    /// Add metric
    pub fn add(&self, name: String, value: MetricValue) -> Result<()> {
        self.metrics
            .lock()
            .map_err(|e| GcError::LockPoisoned(format!("metrics mutex poisoned: {}", e)))?
            .insert(name, value);
        Ok(())
    }

    /// Get metric
    pub fn get(&self, name: &str) -> Result<Option<MetricValue>> {
        Ok(self
            .metrics
            .lock()
            .map_err(|e| GcError::LockPoisoned(format!("metrics mutex poisoned: {}", e)))?
            .get(name)
            .copied())
    }

    /// Export to Prometheus format
    pub fn to_prometheus(&self) -> Result<String> {
        let metrics = self
            .metrics
            .lock()
            .map_err(|e| GcError::LockPoisoned(format!("metrics mutex poisoned: {}", e)))?;
        let mut output = String::new();

        for (name, value) in metrics.iter() {
            output.push_str(&format!("{} {}\n", name, value.as_f64()));
        }

        Ok(output)
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String> {
        let metrics = self
            .metrics
            .lock()
            .map_err(|e| GcError::LockPoisoned(format!("metrics mutex poisoned: {}", e)))?;
        let mut pairs = Vec::new();

        for (name, value) in metrics.iter() {
            pairs.push(format!("\"{}\": {}", name, value.as_f64()));
        }

        Ok(format!("{{{}}}", pairs.join(",")))
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metric value
#[derive(Debug, Clone, Copy)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram(u64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Counter(v) => *v as f64,
            MetricValue::Gauge(v) => *v,
            MetricValue::Histogram(v) => *v as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get_roundtrip() {
        let metrics = GcMetrics::new();
        metrics.add("gc_cycles".into(), MetricValue::Counter(3)).unwrap();
        assert_eq!(metrics.get("gc_cycles").unwrap().unwrap().as_f64(), 3.0);
        assert!(metrics.get("missing").unwrap().is_none());
    }

    #[test]
    fn prometheus_export_contains_each_metric() {
        let metrics = GcMetrics::new();
        metrics.add("gc_heap_used".into(), MetricValue::Gauge(42.5)).unwrap();
        let rendered = metrics.to_prometheus().unwrap();
        assert!(rendered.contains("gc_heap_used 42.5"));
    }

    #[test]
    fn json_export_is_well_formed() {
        let metrics = GcMetrics::new();
        metrics.add("gc_pauses".into(), MetricValue::Histogram(7)).unwrap();
        let rendered = metrics.to_json().unwrap();
        assert_eq!(rendered, "{\"gc_pauses\": 7}");
    }
}
