//! Prometheus-compatible diagnostic counters for the snoop pipeline.
//!
//! Every data outcome the pipeline treats as "expected" (discarded partial
//! blocks, filter false positives, overruns, load hazards) is counted here
//! so it stays observable without ever surfacing as an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Upper bounds, in ticks, of the lookup latency histogram buckets.
pub const LATENCY_BUCKETS: [u64; 6] = [3, 5, 6, 7, 8, 16];

/// The type of metric: counter, gauge, or histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up or down.
    Gauge,
    /// A histogram with buckets.
    Histogram,
}

/// The value of a metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// A counter value.
    Counter(u64),
    /// A gauge value.
    Gauge(f64),
    /// A histogram with sum, count, and cumulative bucket counts.
    Histogram {
        /// Sum of all observed values.
        sum: f64,
        /// Total count of observations.
        count: u64,
        /// Bucket upper bounds and cumulative counts.
        buckets: Vec<(f64, u64)>,
    },
}

/// A single metric with metadata and value.
#[derive(Debug, Clone, PartialEq)]
pub struct SnoopMetric {
    /// The metric name.
    pub name: String,
    /// Help text describing the metric.
    pub help: String,
    /// The kind of metric.
    pub kind: MetricKind,
    /// The metric value.
    pub value: MetricValue,
}

/// Lock-free counters shared between the pipeline and whoever reports them.
pub struct SnoopMetrics {
    writes_observed: AtomicU64,
    writes_outside_window: AtomicU64,
    writes_dropped_streaming: AtomicU64,
    captures_started: AtomicU64,
    captures_completed: AtomicU64,
    captures_discarded: AtomicU64,
    captures_lost: AtomicU64,
    fingerprints: AtomicU64,
    filter_rejects: AtomicU64,
    filter_passes: AtomicU64,
    false_positives: AtomicU64,
    matches: AtomicU64,
    chains_exhausted: AtomicU64,
    overruns: AtomicU64,
    load_hazards: AtomicU64,
    latency_sum: AtomicU64,
    latency_count: AtomicU64,
    latency_buckets: [AtomicU64; LATENCY_BUCKETS.len()],
}

impl SnoopMetrics {
    /// Create a new SnoopMetrics with all counters at zero.
    pub fn new() -> Self {
        Self {
            writes_observed: AtomicU64::new(0),
            writes_outside_window: AtomicU64::new(0),
            writes_dropped_streaming: AtomicU64::new(0),
            captures_started: AtomicU64::new(0),
            captures_completed: AtomicU64::new(0),
            captures_discarded: AtomicU64::new(0),
            captures_lost: AtomicU64::new(0),
            fingerprints: AtomicU64::new(0),
            filter_rejects: AtomicU64::new(0),
            filter_passes: AtomicU64::new(0),
            false_positives: AtomicU64::new(0),
            matches: AtomicU64::new(0),
            chains_exhausted: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            load_hazards: AtomicU64::new(0),
            latency_sum: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            latency_buckets: Default::default(),
        }
    }

    /// Record a write event with the strobe high.
    #[inline]
    pub fn record_write(&self, in_window: bool) {
        self.writes_observed.fetch_add(1, Ordering::Relaxed);
        if !in_window {
            self.writes_outside_window.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an in-window write lost because the buffer was streaming.
    #[inline]
    pub fn record_dropped_while_streaming(&self) {
        self.writes_dropped_streaming.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a capture opening.
    #[inline]
    pub fn record_capture_started(&self) {
        self.captures_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a block reaching completion.
    #[inline]
    pub fn record_capture_completed(&self) {
        self.captures_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a partial block abandoned for another index.
    #[inline]
    pub fn record_capture_discarded(&self) {
        self.captures_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a block whose writes all fell while the buffer was streaming.
    #[inline]
    pub fn record_capture_lost(&self) {
        self.captures_lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a digest leaving the fingerprint stage.
    #[inline]
    pub fn record_fingerprint(&self) {
        self.fingerprints.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a filter verdict.
    #[inline]
    pub fn record_filter(&self, positive: bool) {
        if positive {
            self.filter_passes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.filter_rejects.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a filter pass that the chain scan did not confirm.
    #[inline]
    pub fn record_false_positive(&self, exhausted: bool) {
        self.false_positives.fetch_add(1, Ordering::Relaxed);
        if exhausted {
            self.chains_exhausted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a dictionary hit.
    #[inline]
    pub fn record_match(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fingerprint lost because a lookup was in flight.
    #[inline]
    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a load issued while a lookup was in flight.
    #[inline]
    pub fn record_load_hazard(&self) {
        self.load_hazards.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the latency of a completed lookup, in ticks.
    #[inline]
    pub fn record_lookup_latency(&self, ticks: u64) {
        self.latency_sum.fetch_add(ticks, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        if let Some(i) = LATENCY_BUCKETS.iter().position(|&b| ticks <= b) {
            self.latency_buckets[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fraction of fingerprints rejected by the filter.
    ///
    /// Returns 0.0 if no fingerprint has been checked.
    pub fn filter_reject_ratio(&self) -> f64 {
        let rejects = self.filter_rejects.load(Ordering::Relaxed);
        let passes = self.filter_passes.load(Ordering::Relaxed);
        ratio(rejects, rejects + passes)
    }

    /// Fraction of looked-up fingerprints found in the dictionary.
    ///
    /// Returns 0.0 if no lookup has completed.
    pub fn match_ratio(&self) -> f64 {
        let matches = self.matches.load(Ordering::Relaxed);
        let rejects = self.filter_rejects.load(Ordering::Relaxed);
        let passes = self.filter_passes.load(Ordering::Relaxed);
        ratio(matches, rejects + passes)
    }

    fn latency_histogram(&self) -> MetricValue {
        let mut cumulative = 0;
        let buckets = LATENCY_BUCKETS
            .iter()
            .zip(self.latency_buckets.iter())
            .map(|(&bound, count)| {
                cumulative += count.load(Ordering::Relaxed);
                (bound as f64, cumulative)
            })
            .collect();
        MetricValue::Histogram {
            sum: self.latency_sum.load(Ordering::Relaxed) as f64,
            count: self.latency_count.load(Ordering::Relaxed),
            buckets,
        }
    }

    /// Collect all metrics with Prometheus names and help text.
    pub fn collect(&self) -> Vec<SnoopMetric> {
        let counter = |name: &str, help: &str, v: &AtomicU64| SnoopMetric {
            name: format!("tilesnoop_{}", name),
            help: help.to_string(),
            kind: MetricKind::Counter,
            value: MetricValue::Counter(v.load(Ordering::Relaxed)),
        };

        vec![
            counter(
                "writes_observed_total",
                "Write events with the strobe asserted",
                &self.writes_observed,
            ),
            counter(
                "writes_outside_window_total",
                "Writes ignored because they fell outside the monitored window",
                &self.writes_outside_window,
            ),
            counter(
                "writes_dropped_streaming_total",
                "In-window writes lost while a completed block was streaming",
                &self.writes_dropped_streaming,
            ),
            counter(
                "captures_started_total",
                "Block captures opened",
                &self.captures_started,
            ),
            counter(
                "captures_completed_total",
                "Blocks fully written and streamed to the fingerprint stage",
                &self.captures_completed,
            ),
            counter(
                "captures_discarded_total",
                "Partial blocks abandoned for a write to another block",
                &self.captures_discarded,
            ),
            counter(
                "captures_lost_total",
                "Blocks written while the buffer was streaming, never captured",
                &self.captures_lost,
            ),
            counter(
                "fingerprints_total",
                "Fingerprints produced",
                &self.fingerprints,
            ),
            counter(
                "filter_rejects_total",
                "Fingerprints rejected by the membership filter",
                &self.filter_rejects,
            ),
            counter(
                "filter_passes_total",
                "Fingerprints passed by the membership filter",
                &self.filter_passes,
            ),
            counter(
                "filter_false_positives_total",
                "Filter passes with no dictionary entry",
                &self.false_positives,
            ),
            counter(
                "matches_total",
                "Dictionary hits",
                &self.matches,
            ),
            counter(
                "chains_exhausted_total",
                "Scans that read every slot of a full chain without a hit",
                &self.chains_exhausted,
            ),
            counter(
                "overruns_total",
                "Fingerprints dropped because a lookup was in flight",
                &self.overruns,
            ),
            counter(
                "load_hazards_total",
                "Loads issued while a lookup was in flight",
                &self.load_hazards,
            ),
            SnoopMetric {
                name: "tilesnoop_filter_reject_ratio".to_string(),
                help: "Filter rejects / fingerprints checked".to_string(),
                kind: MetricKind::Gauge,
                value: MetricValue::Gauge(self.filter_reject_ratio()),
            },
            SnoopMetric {
                name: "tilesnoop_match_ratio".to_string(),
                help: "Matches / fingerprints checked".to_string(),
                kind: MetricKind::Gauge,
                value: MetricValue::Gauge(self.match_ratio()),
            },
            SnoopMetric {
                name: "tilesnoop_lookup_latency_ticks".to_string(),
                help: "Ticks from fingerprint acceptance to the done pulse".to_string(),
                kind: MetricKind::Histogram,
                value: self.latency_histogram(),
            },
        ]
    }

    /// Render [`collect`](Self::collect) in the Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        for metric in self.collect() {
            let kind = match metric.kind {
                MetricKind::Counter => "counter",
                MetricKind::Gauge => "gauge",
                MetricKind::Histogram => "histogram",
            };
            output.push_str(&format!("# HELP {} {}\n", metric.name, metric.help));
            output.push_str(&format!("# TYPE {} {}\n", metric.name, kind));
            match metric.value {
                MetricValue::Counter(v) => output.push_str(&format!("{} {}\n", metric.name, v)),
                MetricValue::Gauge(v) => output.push_str(&format!("{} {}\n", metric.name, v)),
                MetricValue::Histogram {
                    sum,
                    count,
                    buckets,
                } => {
                    for (bound, n) in buckets {
                        output.push_str(&format!(
                            "{}_bucket{{le=\"{}\"}} {}\n",
                            metric.name, bound, n
                        ));
                    }
                    output.push_str(&format!(
                        "{}_bucket{{le=\"+Inf\"}} {}\n",
                        metric.name, count
                    ));
                    output.push_str(&format!("{}_sum {}\n", metric.name, sum));
                    output.push_str(&format!("{}_count {}\n", metric.name, count));
                }
            }
        }
        output
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl Default for SnoopMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A shareable handle to [`SnoopMetrics`].
#[derive(Clone, Default)]
pub struct MetricsHandle {
    inner: Arc<SnoopMetrics>,
}

impl MetricsHandle {
    /// Create a handle over fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying counters.
    #[inline]
    pub fn metrics(&self) -> &SnoopMetrics {
        &self.inner
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::from_metrics(&self.inner)
    }
}

/// A point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Write events with the strobe asserted.
    pub writes_observed: u64,
    /// Writes outside the window.
    pub writes_outside_window: u64,
    /// Writes lost while streaming.
    pub writes_dropped_streaming: u64,
    /// Captures opened.
    pub captures_started: u64,
    /// Blocks completed.
    pub captures_completed: u64,
    /// Partial blocks abandoned.
    pub captures_discarded: u64,
    /// Blocks never captured because the buffer was streaming.
    pub captures_lost: u64,
    /// Fingerprints produced.
    pub fingerprints: u64,
    /// Filter rejects.
    pub filter_rejects: u64,
    /// Filter passes.
    pub filter_passes: u64,
    /// Filter passes without a dictionary entry.
    pub false_positives: u64,
    /// Dictionary hits.
    pub matches: u64,
    /// Full chains scanned without a hit.
    pub chains_exhausted: u64,
    /// Fingerprints dropped while busy.
    pub overruns: u64,
    /// Loads issued mid-lookup.
    pub load_hazards: u64,
    /// Completed lookups.
    pub lookups: u64,
    /// Mean lookup latency in ticks.
    pub mean_latency_ticks: f64,
}

impl MetricsSnapshot {
    fn from_metrics(m: &SnoopMetrics) -> Self {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        let lookups = load(&m.latency_count);
        let mean_latency_ticks = if lookups == 0 {
            0.0
        } else {
            load(&m.latency_sum) as f64 / lookups as f64
        };
        Self {
            writes_observed: load(&m.writes_observed),
            writes_outside_window: load(&m.writes_outside_window),
            writes_dropped_streaming: load(&m.writes_dropped_streaming),
            captures_started: load(&m.captures_started),
            captures_completed: load(&m.captures_completed),
            captures_discarded: load(&m.captures_discarded),
            captures_lost: load(&m.captures_lost),
            fingerprints: load(&m.fingerprints),
            filter_rejects: load(&m.filter_rejects),
            filter_passes: load(&m.filter_passes),
            false_positives: load(&m.false_positives),
            matches: load(&m.matches),
            chains_exhausted: load(&m.chains_exhausted),
            overruns: load(&m.overruns),
            load_hazards: load(&m.load_hazards),
            lookups,
            mean_latency_ticks,
        }
    }
}
