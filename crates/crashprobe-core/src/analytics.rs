//! Campaign analytics.
//!
//! Tracks outcome counts, how far event-count thresholds got, and how much
//! of a calibrated window the time-offset kills have covered.

use serde::{Deserialize, Serialize};

use crashprobe_trigger::Trigger;

use crate::iteration::{Iteration, Outcome};

/// Number of equal slices a calibrated window is split into for coverage.
pub const TIMELINE_BUCKETS: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub aborted: u64,
    pub finished_naturally: u64,
    pub corrupted: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.aborted + self.finished_naturally + self.corrupted
    }
}

/// Campaign-level analytics aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignAnalytics {
    pub counts: OutcomeCounts,
    /// Highest event-count threshold tried.
    pub max_threshold: u64,
    /// Calibrated window, when the campaign samples offsets.
    pub window_ns: Option<u64>,
    /// Kills per window slice.
    pub timeline: Vec<u32>,
    pub elapsed_secs: f64,
}

impl CampaignAnalytics {
    pub fn new() -> Self {
        Self {
            counts: OutcomeCounts::default(),
            max_threshold: 0,
            window_ns: None,
            timeline: vec![0; TIMELINE_BUCKETS],
            elapsed_secs: 0.0,
        }
    }

    pub fn set_window(&mut self, window_ns: u64) {
        self.window_ns = Some(window_ns);
    }

    pub fn set_elapsed(&mut self, secs: f64) {
        self.elapsed_secs = secs;
    }

    pub fn record(&mut self, iteration: &Iteration) {
        match iteration.outcome {
            Outcome::Aborted => self.counts.aborted += 1,
            Outcome::FinishedNaturally => self.counts.finished_naturally += 1,
            Outcome::Corrupted { .. } => self.counts.corrupted += 1,
        }

        match iteration.trigger {
            Trigger::EventCount { threshold, .. } => {
                self.max_threshold = self.max_threshold.max(threshold);
            }
            Trigger::TimeOffset { window_ns, offset_ns } => {
                // Only kills that landed say anything about the timeline.
                if iteration.outcome != Outcome::FinishedNaturally && window_ns > 0 {
                    let slot = (u128::from(offset_ns) * TIMELINE_BUCKETS as u128
                        / u128::from(window_ns)) as usize;
                    self.timeline[slot.min(TIMELINE_BUCKETS - 1)] += 1;
                }
            }
        }
    }

    /// Fraction of window slices with at least one kill (0.0-1.0).
    pub fn timeline_coverage(&self) -> f64 {
        let hit = self.timeline.iter().filter(|&&kills| kills > 0).count();
        hit as f64 / TIMELINE_BUCKETS as f64
    }

    pub fn summary(&self) -> AnalyticsSummary {
        AnalyticsSummary {
            iterations: self.counts.total(),
            counts: self.counts.clone(),
            max_threshold: self.max_threshold,
            window_ns: self.window_ns,
            timeline_coverage: self.window_ns.map(|_| self.timeline_coverage()),
            elapsed_secs: self.elapsed_secs,
        }
    }
}

impl Default for CampaignAnalytics {
    fn default() -> Self {
        Self::new()
    }
}

/// Compact analytics summary carried in campaign results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub iterations: u64,
    pub counts: OutcomeCounts,
    pub max_threshold: u64,
    pub window_ns: Option<u64>,
    pub timeline_coverage: Option<f64>,
    pub elapsed_secs: f64,
}
