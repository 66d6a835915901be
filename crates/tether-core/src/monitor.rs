//! Usage monitor
//!
//! Observes cumulative usage minutes and reports each threshold the first
//! time it is reached. It never decides anything about escalation.

use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use tether_util::NightWindow;
use tracing::debug;

/// Ordered minute thresholds with night-mode halving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdLadder {
    thresholds: Vec<u32>,
    night: NightWindow,
}

impl ThresholdLadder {
    pub fn new(thresholds: Vec<u32>, night: NightWindow) -> Self {
        Self { thresholds, night }
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn is_night(&self, now: &DateTime<Local>) -> bool {
        self.night.contains(now)
    }

    /// Thresholds in effect at `now` (halved, floor, inside the night window)
    pub fn scaled(&self, now: &DateTime<Local>) -> Vec<u32> {
        let night = self.is_night(now);
        self.thresholds
            .iter()
            .map(|&t| scale_threshold(t, night))
            .collect()
    }
}

pub fn scale_threshold(minutes: u32, night: bool) -> u32 {
    if night { minutes / 2 } else { minutes }
}

/// A threshold reached for the first time today
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdCrossed {
    pub index: usize,
    pub threshold_minutes: u32,
}

/// Observes cumulative usage reports for the current day
#[derive(Debug)]
pub struct UsageMonitor {
    ladder: ThresholdLadder,
    reported: BTreeSet<usize>,
    last_minutes: u32,
}

impl UsageMonitor {
    pub fn new(ladder: ThresholdLadder) -> Self {
        Self {
            ladder,
            reported: BTreeSet::new(),
            last_minutes: 0,
        }
    }

    pub fn ladder(&self) -> &ThresholdLadder {
        &self.ladder
    }

    /// Last reported minutes today
    pub fn minutes_used(&self) -> u32 {
        self.last_minutes
    }

    /// Record a usage report. Returns thresholds reached for the first time,
    /// in increasing index order.
    pub fn observe(&mut self, minutes_used: u32, now: &DateTime<Local>) -> Vec<ThresholdCrossed> {
        if minutes_used < self.last_minutes {
            debug!(
                minutes_used,
                last = self.last_minutes,
                "Usage report went backwards"
            );
        }
        self.last_minutes = self.last_minutes.max(minutes_used);

        let mut crossed = Vec::new();
        for (index, threshold) in self.ladder.scaled(now).into_iter().enumerate() {
            if minutes_used >= threshold && self.reported.insert(index) {
                crossed.push(ThresholdCrossed {
                    index,
                    threshold_minutes: threshold,
                });
            }
        }
        crossed
    }

    /// Seed state after a restart
    pub fn restore(&mut self, minutes_used: u32, reported: impl IntoIterator<Item = usize>) {
        self.last_minutes = minutes_used;
        self.reported = reported.into_iter().collect();
    }

    /// Start a new day
    pub fn reset(&mut self) {
        self.reported.clear();
        self.last_minutes = 0;
    }
}
