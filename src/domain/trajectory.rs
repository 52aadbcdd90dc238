//! Trajectory data model: steps, step states, and the measurement contract.
//!
//! These are plain value types. All behavior over them (readiness,
//! selection, completion, cycle detection) lives in [`crate::engine`] as
//! pure functions, matching the split `domain/spec.rs` draws between the
//! `Spec` value type and the free functions that act on it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Direction a measurement is expected to move for a step to be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// A numeric acceptance contract: run `cmd`, parse a number from its
/// output, and compare against `target` in the direction given by
/// `direction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub cmd: String,
    pub target: f64,
    pub direction: Direction,
}

impl Measurement {
    /// Whether `sample` satisfies this contract.
    pub fn is_met(&self, sample: f64) -> bool {
        match self.direction {
            Direction::Up => sample >= self.target,
            Direction::Down => sample <= self.target,
        }
    }

    /// Render the target as `target >= N` / `target <= N`, matching the
    /// engine's prompt-formatting convention.
    pub fn describe_target(&self) -> String {
        match self.direction {
            Direction::Up => format!("target >= {}", self.target),
            Direction::Down => format!("target <= {}", self.target),
        }
    }
}

/// A single unit of coding work inside a [`Trajectory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub verification_commands: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub measurement: Option<Measurement>,
}

impl Step {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            scope: None,
            categories: Vec::new(),
            acceptance_criteria: Vec::new(),
            verification_commands: Vec::new(),
            depends_on: Vec::new(),
            max_retries: None,
            priority: None,
            measurement: None,
        }
    }

    /// Retry budget for this step: its own override, or the caller-supplied
    /// default (per-trajectory calls pass `3` as documented).
    pub fn effective_max_retries(&self, default_max_retries: u32) -> u32 {
        self.max_retries.unwrap_or(default_max_retries)
    }
}

/// An ordered, dependency-linked list of steps.
///
/// Declaration order (the `steps` vector's index) is load-bearing: it is
/// the tie-break for ready-step selection and the basis for YAML
/// round-trip stability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Trajectory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Trajectory {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }
}

/// Lifecycle status of a single step within an active trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Terminal per the data model's definition of `trajectoryComplete`.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }

    /// Resolved per `stepReady`'s definition - completed, skipped, AND
    /// (deliberately) failed all unblock dependents.
    pub fn is_resolved(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped | StepStatus::Failed)
    }
}

/// The outcome of one verification command run against a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: String,
    pub passed: bool,
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub last_output: Option<String>,
}

const LAST_VERIFICATION_OUTPUT_CAP: usize = 1000;
const LAST_COMMAND_OUTPUT_CAP: usize = 200;

/// Truncate `s` to at most `cap` chars (not bytes), matching the data
/// model's "bounded to N chars" phrasing.
pub fn bound_chars(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        s.to_string()
    } else {
        s.chars().take(cap).collect()
    }
}

/// Mutable execution state for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    #[serde(default)]
    pub cycles_attempted: u32,
    #[serde(default)]
    pub last_attempted_cycle: u64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub last_verification_output: Option<String>,
    #[serde(default)]
    pub command_outcomes: Vec<CommandOutcome>,
    #[serde(default)]
    pub measurement_sample: Option<f64>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub total_failures: u32,
}

impl StepState {
    pub fn initial() -> Self {
        Self {
            status: StepStatus::Pending,
            cycles_attempted: 0,
            last_attempted_cycle: 0,
            completed_at: None,
            failure_reason: None,
            last_verification_output: None,
            command_outcomes: Vec::new(),
            measurement_sample: None,
            consecutive_failures: 0,
            total_failures: 0,
        }
    }

    pub fn record_verification_output(&mut self, output: &str) {
        self.last_verification_output = Some(bound_chars(output, LAST_VERIFICATION_OUTPUT_CAP));
    }
}

pub fn bound_command_output(output: &str) -> String {
    bound_chars(output, LAST_COMMAND_OUTPUT_CAP)
}

/// Overall lifecycle status of an active/finished trajectory run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryRunStatus {
    Active,
    Completed,
    Abandoned,
}

/// Mutable, persisted state of one trajectory in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryState {
    pub trajectory_name: String,
    pub started_at: i64,
    #[serde(default)]
    pub current_step_id: Option<String>,
    #[serde(default)]
    pub paused: bool,
    pub status: TrajectoryRunStatus,
    pub step_states: HashMap<String, StepState>,
}

impl TrajectoryState {
    pub fn new(trajectory_name: impl Into<String>, started_at: i64) -> Self {
        Self {
            trajectory_name: trajectory_name.into(),
            started_at,
            current_step_id: None,
            paused: false,
            status: TrajectoryRunStatus::Active,
            step_states: HashMap::new(),
        }
    }
}
