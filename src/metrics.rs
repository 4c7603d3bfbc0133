use anyhow::Result;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Per-send latency statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub median_ns: f64,
    pub std_dev_ns: f64,
    pub percentiles: Vec<PercentileValue>,
    pub total_samples: usize,
}

/// Percentile value pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_ns: u64,
}

/// Sender-side throughput
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputMetrics {
    pub messages_per_second: f64,
    pub bytes_per_second: f64,
    pub total_messages: usize,
    pub total_bytes: usize,
    pub duration_ns: u64,
}

/// Metrics gathered while the sender ran
///
/// Diagnostic only; the authoritative trial result is the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMetrics {
    pub latency: Option<LatencyMetrics>,
    pub throughput: ThroughputMetrics,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Latency collector using HDR histogram for accurate measurement
pub struct LatencyCollector {
    histogram: Histogram<u64>,
    sample_count: usize,
}

impl LatencyCollector {
    pub fn new() -> Result<Self> {
        // 3 significant figures, auto-resizing
        let histogram = Histogram::<u64>::new(3)?;

        Ok(Self {
            histogram,
            sample_count: 0,
        })
    }

    /// Record a latency measurement
    pub fn record(&mut self, latency: Duration) -> Result<()> {
        let latency_ns = latency.as_nanos() as u64;
        self.histogram.record(latency_ns)?;
        self.sample_count += 1;
        Ok(())
    }

    /// Summarise the recorded samples, `None` when nothing was recorded
    pub fn get_metrics(&self, percentiles: &[f64]) -> Option<LatencyMetrics> {
        if self.sample_count == 0 {
            return None;
        }

        let percentile_values = percentiles
            .iter()
            .map(|&p| PercentileValue {
                percentile: p,
                value_ns: self.histogram.value_at_percentile(p),
            })
            .collect();

        Some(LatencyMetrics {
            min_ns: self.histogram.min(),
            max_ns: self.histogram.max(),
            mean_ns: self.histogram.mean(),
            median_ns: self.histogram.value_at_percentile(50.0) as f64,
            std_dev_ns: self.histogram.stdev(),
            percentiles: percentile_values,
            total_samples: self.sample_count,
        })
    }
}

/// Throughput calculator for measuring message and data rates
pub struct ThroughputCalculator {
    start_time: Instant,
    message_count: usize,
    byte_count: usize,
}

impl ThroughputCalculator {
    /// Measure from the instant sending started
    pub fn starting_at(start_time: Instant) -> Self {
        Self {
            start_time,
            message_count: 0,
            byte_count: 0,
        }
    }

    /// Record a message transmission
    pub fn record_message(&mut self, message_size: usize) {
        self.message_count += 1;
        self.byte_count += message_size;
    }

    /// Get current throughput metrics
    pub fn get_metrics(&self) -> ThroughputMetrics {
        let elapsed = self.start_time.elapsed();
        let duration_secs = elapsed.as_secs_f64();

        let (messages_per_second, bytes_per_second) = if duration_secs > 0.0 {
            (
                self.message_count as f64 / duration_secs,
                self.byte_count as f64 / duration_secs,
            )
        } else {
            (0.0, 0.0)
        };

        ThroughputMetrics {
            messages_per_second,
            bytes_per_second,
            total_messages: self.message_count,
            total_bytes: self.byte_count,
            duration_ns: elapsed.as_nanos() as u64,
        }
    }
}

/// Combined collector the sender feeds after every acknowledged message
pub struct MetricsCollector {
    latency_collector: LatencyCollector,
    throughput_calculator: ThroughputCalculator,
    percentiles: Vec<f64>,
}

impl MetricsCollector {
    pub fn new(start_time: Instant, percentiles: Vec<f64>) -> Result<Self> {
        Ok(Self {
            latency_collector: LatencyCollector::new()?,
            throughput_calculator: ThroughputCalculator::starting_at(start_time),
            percentiles,
        })
    }

    pub fn record_message(&mut self, message_size: usize, latency: Duration) -> Result<()> {
        self.throughput_calculator.record_message(message_size);
        self.latency_collector.record(latency)
    }

    pub fn get_metrics(&self) -> SendMetrics {
        SendMetrics {
            latency: self.latency_collector.get_metrics(&self.percentiles),
            throughput: self.throughput_calculator.get_metrics(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Formatting helpers for metric values
pub mod utils {
    /// Format latency value for human-readable output
    pub fn format_latency(latency_ns: u64) -> String {
        if latency_ns < 1_000 {
            format!("{}ns", latency_ns)
        } else if latency_ns < 1_000_000 {
            format!("{:.2}μs", latency_ns as f64 / 1_000.0)
        } else if latency_ns < 1_000_000_000 {
            format!("{:.2}ms", latency_ns as f64 / 1_000_000.0)
        } else {
            format!("{:.2}s", latency_ns as f64 / 1_000_000_000.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_collector() {
        let mut collector = LatencyCollector::new().unwrap();
        assert!(collector.get_metrics(&[50.0]).is_none());

        collector.record(Duration::from_millis(1)).unwrap();
        collector.record(Duration::from_millis(2)).unwrap();
        collector.record(Duration::from_millis(3)).unwrap();

        let metrics = collector.get_metrics(&[50.0, 95.0, 99.0]).unwrap();
        assert_eq!(metrics.total_samples, 3);
        assert_eq!(metrics.percentiles.len(), 3);
        assert!(metrics.mean_ns > 0.0);
        assert!(metrics.min_ns <= metrics.max_ns);
    }

    #[test]
    fn test_throughput_calculator() {
        let mut calculator = ThroughputCalculator::starting_at(Instant::now());

        calculator.record_message(30);
        calculator.record_message(31);

        let metrics = calculator.get_metrics();
        assert_eq!(metrics.total_messages, 2);
        assert_eq!(metrics.total_bytes, 61);
        assert!(metrics.messages_per_second >= 0.0);
    }

    #[test]
    fn test_metrics_collector() {
        let mut collector = MetricsCollector::new(Instant::now(), vec![50.0, 99.0]).unwrap();
        collector
            .record_message(32, Duration::from_micros(250))
            .unwrap();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.throughput.total_messages, 1);
        assert_eq!(metrics.latency.unwrap().total_samples, 1);
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(utils::format_latency(500), "500ns");
        assert_eq!(utils::format_latency(1500), "1.50μs");
        assert_eq!(utils::format_latency(1500000), "1.50ms");
        assert_eq!(utils::format_latency(1500000000), "1.50s");
    }
}
