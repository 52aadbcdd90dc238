//! SessionState: the single mutable value the Wheel Loop owns.
//!
//! Modeled as one owning struct updated only on the loop thread, per the
//! "pervasive mutable session state" design note - parallel ticket workers
//! take immutable snapshots of the fields they need and return immutable
//! outcomes merged serially by the caller.

use serde::{Deserialize, Serialize};

use super::drill_history::{AmbitionLevel, DrillHistoryFile, DrillOutcome};
use super::trajectory::{Trajectory, TrajectoryState};

/// Coarse phase of a session's lifetime, used to bias `effectiveMinConfidence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Warmup,
    Mid,
    Deep,
    Cooldown,
}

/// Outcome of a single completed cycle, folded into `cycleOutcomes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub completed_tickets: u32,
    pub failed_tickets: u32,
    pub proposals_seen: u32,
}

impl CycleOutcome {
    pub fn is_idle(&self) -> bool {
        self.completed_tickets == 0 && self.failed_tickets == 0 && self.proposals_seen == 0
    }

    pub fn is_low_yield(&self) -> bool {
        self.completed_tickets == 0
    }
}

/// A perspective (category/scope filter) rotated through when a sector
/// yields little. Rotation is a simple round-robin over a fixed list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LensRotation {
    pub lenses: Vec<String>,
    pub index: usize,
    pub rotations_completed: u32,
}

impl LensRotation {
    pub fn current(&self) -> Option<&str> {
        self.lenses.get(self.index).map(String::as_str)
    }

    /// Advance to the next lens, wrapping and counting a full rotation.
    pub fn rotate(&mut self) {
        if self.lenses.is_empty() {
            return;
        }
        self.index += 1;
        if self.index >= self.lenses.len() {
            self.index = 0;
            self.rotations_completed += 1;
        }
    }

    pub fn has_untried(&self) -> bool {
        !self.lenses.is_empty() && self.rotations_completed == 0
    }
}

/// A proposal repeatedly rejected at ticket granularity, eligible for
/// promotion into a synthesized high-impact drill proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationCandidate {
    pub proposal_id: String,
    pub hit_count: u32,
    pub failure_reason: String,
}

/// The mutable, per-session record the Wheel Loop owns exclusively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub cycle_count: u64,
    pub cycle_outcomes: Vec<CycleOutcome>,
    pub consecutive_idle_cycles: u32,
    pub consecutive_low_yield_cycles: u32,
    pub effective_min_confidence: u32,
    pub session_phase: SessionPhase,

    pub active_trajectory: Option<Trajectory>,
    pub active_trajectory_state: Option<TrajectoryState>,
    pub current_trajectory_step: Option<String>,

    pub drill_mode: bool,
    pub drill_history: DrillHistoryFile,
    pub drill_last_outcome: Option<DrillOutcome>,
    pub drill_trajectories_generated: u64,
    pub drill_last_generated_at_cycle: Option<u64>,
    pub drill_last_freshness_drop_ratio: Option<f64>,
    pub drill_consecutive_insufficient: u32,
    pub drill_consecutive_low_quality: u32,

    pub lens_rotation: LensRotation,

    pub pending_external_reviews: u32,

    pub shutdown_requested: bool,
    pub shutdown_reason: Option<String>,

    pub escalation_candidates: Vec<EscalationCandidate>,
}

impl SessionState {
    /// Construct a fresh session, as an external initializer would at
    /// session start (before any history/calibration rehydration).
    pub fn new() -> Self {
        Self {
            cycle_count: 0,
            cycle_outcomes: Vec::new(),
            consecutive_idle_cycles: 0,
            consecutive_low_yield_cycles: 0,
            effective_min_confidence: 0,
            session_phase: SessionPhase::Warmup,
            active_trajectory: None,
            active_trajectory_state: None,
            current_trajectory_step: None,
            drill_mode: false,
            drill_history: DrillHistoryFile::default(),
            drill_last_outcome: None,
            drill_trajectories_generated: 0,
            drill_last_generated_at_cycle: None,
            drill_last_freshness_drop_ratio: None,
            drill_consecutive_insufficient: 0,
            drill_consecutive_low_quality: 0,
            lens_rotation: LensRotation::default(),
            pending_external_reviews: 0,
            shutdown_requested: false,
            shutdown_reason: None,
            escalation_candidates: Vec::new(),
        }
    }

    /// First-writer-wins shutdown request, per the cancellation design note.
    pub fn request_shutdown(&mut self, reason: impl Into<String>) {
        if self.shutdown_requested {
            return;
        }
        self.shutdown_requested = true;
        self.shutdown_reason = Some(reason.into());
    }

    pub fn has_active_trajectory(&self) -> bool {
        self.active_trajectory.is_some()
    }

    /// Highest recorded ambition level among the last `window` history
    /// entries that carry one, most recent first.
    pub fn recent_ambition_levels(&self, window: usize) -> Vec<AmbitionLevel> {
        self.drill_history
            .entries
            .iter()
            .rev()
            .take(window)
            .filter_map(|e| e.ambition_level)
            .collect()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
