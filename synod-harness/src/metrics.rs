//! Metrics collection for harness runs
//!
//! Time is measured in simulation steps (one delivered or discarded
//! message per step), which keeps runs reproducible for a given seed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Run metrics
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Submit-to-decide latencies in steps
    pub latencies_steps: Vec<u64>,
    /// Messages sent, by type
    pub message_counts: BTreeMap<String, u64>,
    pub delivered: u64,
    /// Messages lost to loss, partitions or crashed receivers
    pub dropped: u64,
    pub duplicated: u64,
    pub revokes: u64,
    pub skips: u64,
}

/// Summary statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub min_latency_steps: u64,
    pub max_latency_steps: u64,
    pub avg_latency_steps: f64,
    pub p50_latency_steps: u64,
    pub p95_latency_steps: u64,
    pub p99_latency_steps: u64,
    pub decided_ops: usize,
    pub messages_sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub revokes: u64,
    pub skips: u64,
}

/// Full metrics export format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsExport {
    pub scenario: String,
    pub latencies_steps: Vec<u64>,
    pub message_counts: BTreeMap<String, u64>,
    pub summary: MetricsSummary,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how many steps a command took from submit to first decision
    pub fn record_latency(&mut self, submitted_at: u64, decided_at: u64) {
        self.latencies_steps.push(decided_at.saturating_sub(submitted_at));
    }

    /// Increment message count
    pub fn count_message(&mut self, msg_type: &str) {
        *self.message_counts.entry(msg_type.to_string()).or_insert(0) += 1;
    }

    /// Calculate percentile from sorted values
    fn percentile(sorted: &[u64], p: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let idx = ((sorted.len() as f64 - 1.0) * p / 100.0).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// Calculate summary statistics
    pub fn summary(&self) -> MetricsSummary {
        let mut sorted = self.latencies_steps.clone();
        sorted.sort_unstable();

        let avg_latency_steps = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };

        MetricsSummary {
            min_latency_steps: sorted.first().copied().unwrap_or(0),
            max_latency_steps: sorted.last().copied().unwrap_or(0),
            avg_latency_steps,
            p50_latency_steps: Self::percentile(&sorted, 50.0),
            p95_latency_steps: Self::percentile(&sorted, 95.0),
            p99_latency_steps: Self::percentile(&sorted, 99.0),
            decided_ops: sorted.len(),
            messages_sent: self.message_counts.values().sum(),
            delivered: self.delivered,
            dropped: self.dropped,
            duplicated: self.duplicated,
            revokes: self.revokes,
            skips: self.skips,
        }
    }

    pub fn export(&self, scenario: &str) -> MetricsExport {
        MetricsExport {
            scenario: scenario.to_string(),
            latencies_steps: self.latencies_steps.clone(),
            message_counts: self.message_counts.clone(),
            summary: self.summary(),
        }
    }

    /// Export as JSON string
    pub fn export_json(&self, scenario: &str) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.export(scenario))
    }
}
