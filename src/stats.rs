//! Bridge statistics.
//!
//! Counters for both directions of the bridge: spot lines turned into UDP
//! frames, and WinTest frames turned into skimmer, cluster and radio
//! commands.

use chrono::NaiveTime;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::spot::Spot;

/// Thread-safe statistics shared between the poll loop and the metrics
/// server.
#[derive(Debug)]
pub struct BridgeStats {
    /// Spots framed and broadcast
    pub spots_relayed: AtomicU64,

    /// Spots dropped by the digi filter
    pub spots_suppressed: AtomicU64,

    /// Session lines that matched neither spot grammar
    pub non_spot_lines: AtomicU64,

    /// Bytes received from the two sessions
    pub bytes_received: AtomicU64,

    /// UDP sends that failed
    pub send_failures: AtomicU64,

    /// Datagrams received from WinTest
    pub frames_received: AtomicU64,

    /// Datagrams that failed to decode
    pub decode_failures: AtomicU64,

    /// QSY/SETT pairs sent to the skimmer
    pub qsy_commands: AtomicU64,

    /// Commands forwarded to the cluster
    pub forwarded_commands: AtomicU64,

    /// CAT commands sent to the radio
    pub cat_commands: AtomicU64,

    /// Reconnect attempts made by the poll loop
    pub reconnects: AtomicU64,

    /// Outbound frame sizes
    frame_sizes: RwLock<Option<Histogram<u64>>>,

    spots_by_source: RwLock<HashMap<String, u64>>,

    top_spotters: RwLock<HashMap<String, u64>>,

    /// Time token of the most recently relayed spot
    last_spot_time: RwLock<Option<NaiveTime>>,

    start_time: Instant,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            spots_relayed: AtomicU64::new(0),
            spots_suppressed: AtomicU64::new(0),
            non_spot_lines: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            qsy_commands: AtomicU64::new(0),
            forwarded_commands: AtomicU64::new(0),
            cat_commands: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            // 1 byte to 10KB, 3 significant figures
            frame_sizes: RwLock::new(Histogram::new_with_bounds(1, 10_000, 3).ok()),
            spots_by_source: RwLock::new(HashMap::new()),
            top_spotters: RwLock::new(HashMap::new()),
            last_spot_time: RwLock::new(None),
            start_time: Instant::now(),
        }
    }

    /// Record a spot that was framed into `frame_len` bytes and broadcast.
    pub fn record_relayed(&self, spot: &Spot, frame_len: usize) {
        self.spots_relayed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut guard) = self.frame_sizes.write()
            && let Some(hist) = guard.as_mut()
        {
            let _ = hist.record((frame_len as u64).clamp(1, 10_000));
        }

        if let Ok(mut map) = self.spots_by_source.write() {
            *map.entry(spot.source.to_string()).or_insert(0) += 1;
        }

        if let Ok(mut map) = self.top_spotters.write() {
            *map.entry(spot.spotter.clone()).or_insert(0) += 1;
        }

        if let Some(time) = spot.time_of_day()
            && let Ok(mut last) = self.last_spot_time.write()
        {
            *last = Some(time);
        }
    }

    pub fn record_suppressed(&self) {
        self.spots_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_non_spot(&self) {
        self.non_spot_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_qsy(&self) {
        self.qsy_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cat_command(&self) {
        self.cat_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Relayed spots per second since start.
    pub fn spots_per_second(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.spots_relayed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Snapshot of all counters.
    pub fn summary(&self) -> StatsSummary {
        let frame_size_percentiles = self
            .frame_sizes
            .read()
            .ok()
            .and_then(|guard| {
                guard.as_ref().filter(|h| !h.is_empty()).map(|h| HistogramPercentiles {
                    p50: h.value_at_quantile(0.50),
                    p90: h.value_at_quantile(0.90),
                    p99: h.value_at_quantile(0.99),
                    min: h.min(),
                    max: h.max(),
                    mean: h.mean(),
                })
            });

        let spots_by_source = self
            .spots_by_source
            .read()
            .map(|m| m.clone())
            .unwrap_or_default();

        // Top 10
        let top_spotters = self
            .top_spotters
            .read()
            .map(|m| {
                let mut vec: Vec<_> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
                vec.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                vec.truncate(10);
                vec
            })
            .unwrap_or_default();

        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            spots_relayed: self.spots_relayed.load(Ordering::Relaxed),
            spots_suppressed: self.spots_suppressed.load(Ordering::Relaxed),
            non_spot_lines: self.non_spot_lines.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            qsy_commands: self.qsy_commands.load(Ordering::Relaxed),
            forwarded_commands: self.forwarded_commands.load(Ordering::Relaxed),
            cat_commands: self.cat_commands.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            spots_per_second: self.spots_per_second(),
            frame_size_percentiles,
            spots_by_source,
            top_spotters,
            last_spot_time: self.last_spot_time.read().ok().and_then(|t| *t),
        }
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile values from a histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub spots_relayed: u64,
    pub spots_suppressed: u64,
    pub non_spot_lines: u64,
    pub bytes_received: u64,
    pub send_failures: u64,
    pub frames_received: u64,
    pub decode_failures: u64,
    pub qsy_commands: u64,
    pub forwarded_commands: u64,
    pub cat_commands: u64,
    pub reconnects: u64,
    pub spots_per_second: f64,
    pub frame_size_percentiles: Option<HistogramPercentiles>,
    pub spots_by_source: HashMap<String, u64>,
    pub top_spotters: Vec<(String, u64)>,
    pub last_spot_time: Option<NaiveTime>,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f, "                 WINTEST BRIDGE STATISTICS")?;
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f)?;
        writeln!(f, "Runtime: {:.1}s", self.elapsed_secs)?;
        writeln!(f, "Spots relayed: {}", self.spots_relayed)?;
        writeln!(f, "Spots suppressed: {}", self.spots_suppressed)?;
        writeln!(f, "Non-spot lines: {}", self.non_spot_lines)?;
        writeln!(f, "Bytes received: {} KB", self.bytes_received / 1024)?;
        writeln!(f, "Rate: {:.2} spots/sec", self.spots_per_second)?;
        if let Some(time) = self.last_spot_time {
            writeln!(f, "Last spot: {}Z", time.format("%H%M"))?;
        }
        if self.send_failures > 0 {
            writeln!(f, "UDP send failures: {}", self.send_failures)?;
        }
        writeln!(f)?;

        writeln!(f, "WinTest frames: {}", self.frames_received)?;
        writeln!(f, "  Decode failures: {}", self.decode_failures)?;
        writeln!(f, "  Skimmer QSYs: {}", self.qsy_commands)?;
        writeln!(f, "  Cluster commands: {}", self.forwarded_commands)?;
        writeln!(f, "CAT commands: {}", self.cat_commands)?;
        writeln!(f, "Reconnects: {}", self.reconnects)?;
        writeln!(f)?;

        if let Some(ref p) = self.frame_size_percentiles {
            writeln!(f, "Frame Size (bytes):")?;
            writeln!(f, "  Min: {}, Max: {}, Mean: {:.1}", p.min, p.max, p.mean)?;
            writeln!(f, "  P50: {}, P90: {}, P99: {}", p.p50, p.p90, p.p99)?;
            writeln!(f)?;
        }

        if !self.spots_by_source.is_empty() {
            writeln!(f, "Spots by Source:")?;
            let mut sources: Vec<_> = self.spots_by_source.iter().collect();
            sources.sort_by(|a, b| b.1.cmp(a.1));
            for (source, count) in sources {
                writeln!(f, "  {}: {}", source, count)?;
            }
            writeln!(f)?;
        }

        if !self.top_spotters.is_empty() {
            writeln!(f, "Top 10 Spotters:")?;
            for (i, (spotter, count)) in self.top_spotters.iter().enumerate() {
                writeln!(f, "  {}. {}: {}", i + 1, spotter, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_spot;

    fn make_test_spot() -> Spot {
        parse_spot("DX de F5XYZ:     7005.0  UA9ABC       599 TNX QSO      2210Z").unwrap()
    }

    #[test]
    fn test_record_relayed() {
        let stats = BridgeStats::new();
        stats.record_relayed(&make_test_spot(), 90);

        assert_eq!(stats.spots_relayed.load(Ordering::Relaxed), 1);
        let summary = stats.summary();
        assert_eq!(summary.top_spotters, vec![("F5XYZ".to_string(), 1)]);
        assert_eq!(summary.frame_size_percentiles.unwrap().max, 90);
        assert_eq!(summary.last_spot_time, NaiveTime::from_hms_opt(22, 10, 0));
    }

    #[test]
    fn test_empty_histogram_has_no_percentiles() {
        let stats = BridgeStats::new();
        assert!(stats.summary().frame_size_percentiles.is_none());
    }

    #[test]
    fn test_summary_generation() {
        let stats = BridgeStats::new();

        for _ in 0..10 {
            stats.record_relayed(&make_test_spot(), 80);
        }
        stats.record_suppressed();
        stats.record_non_spot();
        stats.record_bytes(1000);
        stats.record_frame_received();
        stats.record_decode_failure();
        stats.record_qsy();
        stats.record_reconnect();

        let summary = stats.summary();

        assert_eq!(summary.spots_relayed, 10);
        assert_eq!(summary.spots_suppressed, 1);
        assert_eq!(summary.non_spot_lines, 1);
        assert_eq!(summary.bytes_received, 1000);
        assert_eq!(summary.frames_received, 1);
        assert_eq!(summary.decode_failures, 1);
        assert_eq!(summary.qsy_commands, 1);
        assert_eq!(summary.reconnects, 1);
        assert_eq!(summary.spots_by_source.values().sum::<u64>(), 10);

        let text = summary.to_string();
        assert!(text.contains("Spots relayed: 10"));
        assert!(text.contains("1. F5XYZ: 10"));
        assert!(text.contains("Last spot: 2210Z"));
    }
}
