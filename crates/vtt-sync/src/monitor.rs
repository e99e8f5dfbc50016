//! Link quality measurement.
//!
//! Latency comes from ping/pong probes. Latency, jitter and bandwidth are
//! smoothed with an exponential moving average; packet loss is the share of
//! lost probes in a rolling window. A probe that never comes back is loss,
//! not a disconnect.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};
use vtt_config::MonitorConfig;
use vtt_net::{NetworkMetricsReport, Timestamp, TrafficSnapshot};

/// Smoothed link measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMetrics {
    /// Round-trip latency in milliseconds.
    pub latency_ms: f64,
    /// Latency variation in milliseconds.
    pub jitter_ms: f64,
    /// Lost probe fraction, 0.0 to 1.0.
    pub packet_loss: f64,
    /// Inbound bandwidth estimate in bits per second.
    pub bandwidth_estimate: f64,
    /// When a measurement last landed.
    pub last_measured_at: Option<Timestamp>,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self {
            latency_ms: 50.0,
            jitter_ms: 5.0,
            packet_loss: 0.0,
            bandwidth_estimate: 10_000_000.0,
            last_measured_at: None,
        }
    }
}

/// Coarse link quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NetworkQuality {
    /// Under 20 ms latency, 5 ms jitter and 1 % loss.
    Excellent,
    /// Under 50 ms, 10 ms and 2 %.
    Good,
    /// Under 100 ms, 20 ms and 5 %.
    Fair,
    /// Anything worse.
    Poor,
}

impl NetworkQuality {
    /// Tier for a set of metrics. Every threshold of a tier must hold.
    pub fn classify(metrics: &NetworkMetrics) -> Self {
        let within = |latency: f64, jitter: f64, loss: f64| {
            metrics.latency_ms < latency && metrics.jitter_ms < jitter && metrics.packet_loss < loss
        };
        if within(20.0, 5.0, 0.01) {
            NetworkQuality::Excellent
        } else if within(50.0, 10.0, 0.02) {
            NetworkQuality::Good
        } else if within(100.0, 20.0, 0.05) {
            NetworkQuality::Fair
        } else {
            NetworkQuality::Poor
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkQuality::Excellent => "excellent",
            NetworkQuality::Good => "good",
            NetworkQuality::Fair => "fair",
            NetworkQuality::Poor => "poor",
        }
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tier transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityChange {
    /// Previous tier.
    pub from: NetworkQuality,
    /// New tier.
    pub to: NetworkQuality,
}

/// Probe bookkeeping and smoothed metrics.
#[derive(Debug)]
pub struct NetworkMonitor {
    metrics: NetworkMetrics,
    quality: NetworkQuality,
    alpha: f64,
    probe_timeout: Duration,
    in_flight: BTreeSet<Timestamp>,
    outcomes: VecDeque<bool>,
    loss_window: usize,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(&MonitorConfig::default())
    }
}

impl NetworkMonitor {
    /// Monitor with default metrics and the configured smoothing.
    pub fn new(config: &MonitorConfig) -> Self {
        let metrics = NetworkMetrics::default();
        Self {
            quality: NetworkQuality::classify(&metrics),
            metrics,
            alpha: config.smoothing_alpha.clamp(0.0, 1.0),
            probe_timeout: config.probe_timeout(),
            in_flight: BTreeSet::new(),
            outcomes: VecDeque::new(),
            loss_window: config.loss_window.max(1),
        }
    }

    /// Current metrics.
    pub fn metrics(&self) -> &NetworkMetrics {
        &self.metrics
    }

    /// Last computed tier.
    pub fn quality(&self) -> NetworkQuality {
        self.quality
    }

    /// Probes awaiting a pong.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn smooth(&self, old: f64, sample: f64) -> f64 {
        self.alpha * sample + (1.0 - self.alpha) * old
    }

    fn record_outcome(&mut self, delivered: bool) {
        self.outcomes.push_back(delivered);
        while self.outcomes.len() > self.loss_window {
            self.outcomes.pop_front();
        }
        let lost = self.outcomes.iter().filter(|ok| !**ok).count();
        self.metrics.packet_loss = lost as f64 / self.outcomes.len() as f64;
    }

    /// Register a probe sent at `now`. Returns the timestamp to put in the
    /// ping, unique among probes in flight.
    pub fn begin_probe(&mut self, now: Timestamp) -> Timestamp {
        let mut stamp = now;
        while self.in_flight.contains(&stamp) {
            stamp += 1;
        }
        self.in_flight.insert(stamp);
        stamp
    }

    /// Fold in a pong. Returns `false` for replies to unknown or expired
    /// probes.
    pub fn on_pong(&mut self, probe: Timestamp, now: Timestamp) -> bool {
        if !self.in_flight.remove(&probe) {
            debug!(probe, "pong for unknown probe");
            return false;
        }
        let sample = now.saturating_sub(probe) as f64;
        let jitter_sample = (sample - self.metrics.latency_ms).abs();
        self.metrics.latency_ms = self.smooth(self.metrics.latency_ms, sample);
        self.metrics.jitter_ms = self.smooth(self.metrics.jitter_ms, jitter_sample);
        self.metrics.last_measured_at = Some(now);
        self.record_outcome(true);
        true
    }

    /// Count probes older than the timeout as lost. Returns how many expired.
    pub fn expire_probes(&mut self, now: Timestamp) -> usize {
        let timeout = self.probe_timeout.as_millis() as u64;
        let expired: Vec<Timestamp> = self
            .in_flight
            .iter()
            .copied()
            .filter(|sent| now.saturating_sub(*sent) >= timeout)
            .collect();
        for probe in &expired {
            self.in_flight.remove(probe);
            self.record_outcome(false);
        }
        if !expired.is_empty() {
            warn!(count = expired.len(), loss = self.metrics.packet_loss, "probes timed out");
        }
        expired.len()
    }

    /// Fold observed inbound traffic into the bandwidth estimate. Returns
    /// whether the estimate moved.
    pub fn record_bandwidth(&mut self, traffic: &TrafficSnapshot, elapsed: Duration) -> bool {
        let Some(rate) = traffic.receive_rate_bps(elapsed) else {
            return false;
        };
        self.metrics.bandwidth_estimate = self.smooth(self.metrics.bandwidth_estimate, rate);
        true
    }

    /// Adopt server-reported values for the fields it sent.
    pub fn merge_remote(&mut self, report: &NetworkMetricsReport, now: Timestamp) {
        if let Some(latency) = report.latency {
            self.metrics.latency_ms = latency;
        }
        if let Some(jitter) = report.jitter {
            self.metrics.jitter_ms = jitter;
        }
        if let Some(loss) = report.packet_loss {
            self.metrics.packet_loss = loss.clamp(0.0, 1.0);
        }
        if let Some(bandwidth) = report.bandwidth {
            self.metrics.bandwidth_estimate = bandwidth;
        }
        self.metrics.last_measured_at = Some(now);
    }

    /// Reclassify. Returns the transition if the tier changed.
    pub fn refresh_quality(&mut self) -> Option<QualityChange> {
        let next = NetworkQuality::classify(&self.metrics);
        if next == self.quality {
            return None;
        }
        let change = QualityChange {
            from: self.quality,
            to: next,
        };
        self.quality = next;
        Some(change)
    }

    /// Metrics in upstream report form.
    pub fn report(&self) -> NetworkMetricsReport {
        NetworkMetricsReport {
            latency: Some(self.metrics.latency_ms),
            jitter: Some(self.metrics.jitter_ms),
            packet_loss: Some(self.metrics.packet_loss),
            bandwidth: Some(self.metrics.bandwidth_estimate),
        }
    }

    /// Forget probes in flight. Metrics are kept.
    pub fn reset_probes(&mut self) {
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(latency_ms: f64, jitter_ms: f64, packet_loss: f64) -> NetworkMetrics {
        NetworkMetrics {
            latency_ms,
            jitter_ms,
            packet_loss,
            ..NetworkMetrics::default()
        }
    }

    #[test]
    fn test_latency_smoothing() {
        let mut monitor = NetworkMonitor::default();
        let probe = monitor.begin_probe(1_000);
        assert!(monitor.on_pong(probe, 1_100));
        assert!((monitor.metrics().latency_ms - 65.0).abs() < 1e-9);
        // jitter sample |100 - 50| = 50, 0.3 * 50 + 0.7 * 5
        assert!((monitor.metrics().jitter_ms - 18.5).abs() < 1e-9);
        assert_eq!(monitor.metrics().last_measured_at, Some(1_100));
    }

    #[test]
    fn test_quality_tiers() {
        assert_eq!(NetworkQuality::classify(&metrics(15.0, 3.0, 0.005)), NetworkQuality::Excellent);
        assert_eq!(NetworkQuality::classify(&metrics(40.0, 8.0, 0.01)), NetworkQuality::Good);
        assert_eq!(NetworkQuality::classify(&metrics(80.0, 15.0, 0.03)), NetworkQuality::Fair);
        assert_eq!(NetworkQuality::classify(&metrics(150.0, 30.0, 0.1)), NetworkQuality::Poor);
    }

    #[test]
    fn test_every_threshold_must_hold() {
        assert_eq!(NetworkQuality::classify(&metrics(10.0, 3.0, 0.04)), NetworkQuality::Fair);
        assert_eq!(NetworkQuality::classify(&metrics(10.0, 25.0, 0.0)), NetworkQuality::Poor);
    }

    #[test]
    fn test_default_metrics_are_fair() {
        // 50 ms sits on the good/fair boundary
        assert_eq!(NetworkMonitor::default().quality(), NetworkQuality::Fair);
    }

    #[test]
    fn test_unknown_pong_ignored() {
        let mut monitor = NetworkMonitor::default();
        assert!(!monitor.on_pong(42, 100));
        assert_eq!(monitor.metrics(), &NetworkMetrics::default());
    }

    #[test]
    fn test_timeouts_become_loss() {
        let mut monitor = NetworkMonitor::default();
        let a = monitor.begin_probe(0);
        let b = monitor.begin_probe(0);
        assert_ne!(a, b);

        assert_eq!(monitor.expire_probes(2_000), 0);
        monitor.on_pong(a, 2_500);
        assert_eq!(monitor.expire_probes(3_001), 1);
        assert!((monitor.metrics().packet_loss - 0.5).abs() < 1e-9);
        assert!(!monitor.on_pong(b, 3_100));
    }

    #[test]
    fn test_loss_window_rolls() {
        let config = MonitorConfig {
            loss_window: 2,
            ..MonitorConfig::default()
        };
        let mut monitor = NetworkMonitor::new(&config);
        monitor.begin_probe(0);
        monitor.expire_probes(10_000);
        assert_eq!(monitor.metrics().packet_loss, 1.0);

        for t in [20_000, 30_000] {
            let probe = monitor.begin_probe(t);
            monitor.on_pong(probe, t + 10);
        }
        assert_eq!(monitor.metrics().packet_loss, 0.0);
    }

    #[test]
    fn test_bandwidth_estimate() {
        let mut monitor = NetworkMonitor::default();
        let traffic = TrafficSnapshot {
            bytes_received: 1_250_000,
            ..TrafficSnapshot::default()
        };
        assert!(monitor.record_bandwidth(&traffic, Duration::from_secs(1)));
        // 10 Mbit/s sample against a 10 Mbit/s default
        assert!((monitor.metrics().bandwidth_estimate - 10_000_000.0).abs() < 1e-3);
        assert!(!monitor.record_bandwidth(&TrafficSnapshot::default(), Duration::from_secs(1)));
    }

    #[test]
    fn test_remote_metrics_and_quality_change() {
        let mut monitor = NetworkMonitor::default();
        monitor.merge_remote(
            &NetworkMetricsReport {
                latency: Some(10.0),
                jitter: Some(1.0),
                ..NetworkMetricsReport::default()
            },
            5,
        );
        let change = monitor.refresh_quality().unwrap();
        assert_eq!(change.from, NetworkQuality::Fair);
        assert_eq!(change.to, NetworkQuality::Excellent);
        assert!(monitor.refresh_quality().is_none());
        assert_eq!(monitor.report().latency, Some(10.0));
    }
}
