//! Escalation controller
//!
//! Owns which threshold indices already fired today and the current level.
//! Levels are 1-indexed: level `i + 1` corresponds to threshold index `i`.

use chrono::{DateTime, Datelike, Local, NaiveDate};
use std::collections::BTreeSet;
use tether_api::{Intervention, SceneCategory};
use tether_store::EscalationSnapshot;
use tracing::{debug, info};

use crate::ThresholdLadder;

/// Level whose prosocial branch is a text challenge
pub const TEXT_LEVEL: u8 = 2;
/// Level whose prosocial branch is a call challenge
pub const CALL_LEVEL: u8 = 4;
/// First level that applies hard friction
pub const HARD_FRICTION_LEVEL: u8 = 5;

/// Mutable escalation state for one calendar day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationState {
    pub fired_levels: BTreeSet<usize>,
    /// 0 means inactive
    pub current_level: u8,
    pub prosocial_enabled: bool,
}

#[derive(Debug)]
pub struct EscalationController {
    ladder: ThresholdLadder,
    state: EscalationState,
    day: NaiveDate,
    last_reset_day: Option<NaiveDate>,
}

impl EscalationController {
    pub fn new(ladder: ThresholdLadder, prosocial_enabled: bool, today: NaiveDate) -> Self {
        Self {
            ladder,
            state: EscalationState {
                fired_levels: BTreeSet::new(),
                current_level: 0,
                prosocial_enabled,
            },
            day: today,
            last_reset_day: None,
        }
    }

    pub fn state(&self) -> &EscalationState {
        &self.state
    }

    pub fn current_level(&self) -> u8 {
        self.state.current_level
    }

    /// Day the current state belongs to
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn is_night(&self, now: &DateTime<Local>) -> bool {
        self.ladder.is_night(now)
    }

    /// Check cumulative usage against the ladder.
    ///
    /// Every crossed, not-yet-fired index is marked fired, but a single call
    /// produces at most one level: the highest newly crossed one.
    pub fn check_threshold(&mut self, minutes_used: u32, now: &DateTime<Local>) -> Option<u8> {
        let mut highest = None;
        for (index, threshold) in self.ladder.scaled(now).into_iter().enumerate() {
            if minutes_used >= threshold && self.state.fired_levels.insert(index) {
                highest = Some(index);
            }
        }

        let index = highest?;
        let level = u8::try_from(index + 1).unwrap_or(u8::MAX);
        self.state.current_level = self.state.current_level.max(level);
        info!(level, minutes_used, "Escalation level reached");
        Some(level)
    }

    /// Whether `level` takes its prosocial branch
    pub fn is_prosocial_level(&self, level: u8, has_contacts: bool) -> bool {
        (level == TEXT_LEVEL || level == CALL_LEVEL) && self.state.prosocial_enabled && has_contacts
    }

    /// Intervention chosen for a level
    pub fn intervention_for(&self, level: u8, has_contacts: bool) -> Intervention {
        let prosocial = self.is_prosocial_level(level, has_contacts);
        match level {
            0 | 1 => Intervention::Nudge,
            TEXT_LEVEL if prosocial => Intervention::TextChallenge,
            TEXT_LEVEL => Intervention::BreathingExercise,
            3 => Intervention::GroundingChallenge {
                scene: scene_for_day(self.day),
            },
            CALL_LEVEL if prosocial => Intervention::CallChallenge,
            CALL_LEVEL => Intervention::MoodCheckIn,
            _ => Intervention::HardFriction,
        }
    }

    /// Clear fired levels for a new calendar day.
    ///
    /// Returns `false` (and changes nothing) if `today` was already reset.
    pub fn reset_for_new_day(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_day == Some(today) {
            debug!(day = %today, "Daily reset already done");
            return false;
        }

        self.state.fired_levels.clear();
        self.state.current_level = 0;
        self.day = today;
        self.last_reset_day = Some(today);
        info!(day = %today, "Escalation reset for new day");
        true
    }

    pub fn snapshot(&self, minutes_used: u32, hard_friction: bool) -> EscalationSnapshot {
        EscalationSnapshot {
            day: self.day,
            fired_levels: self
                .state
                .fired_levels
                .iter()
                .filter_map(|&i| u8::try_from(i).ok())
                .collect(),
            current_level: self.state.current_level,
            minutes_used,
            hard_friction,
        }
    }

    /// Adopt a persisted snapshot for the same day
    pub fn restore(&mut self, snapshot: &EscalationSnapshot) {
        self.day = snapshot.day;
        self.state.fired_levels = snapshot.fired_levels.iter().map(|&i| i as usize).collect();
        self.state.current_level = snapshot.current_level;
        self.last_reset_day = Some(snapshot.day);
    }
}

/// Grounding scene rotates by day
pub fn scene_for_day(day: NaiveDate) -> SceneCategory {
    SceneCategory::ALL[day.ordinal0() as usize % SceneCategory::ALL.len()]
}
