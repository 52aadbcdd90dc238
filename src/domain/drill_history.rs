//! Drill history data model: immutable outcome entries plus the persisted
//! coverage file built from them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Why a trajectory run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrillOutcome {
    Completed,
    Stalled,
}

/// The planner's risk appetite for a generated trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbitionLevel {
    Conservative,
    Moderate,
    Ambitious,
}

/// Per-step pass/fail, recorded at trajectory finalization for
/// `stepPositionFailureRates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub position: usize,
    pub failed: bool,
}

/// Optional generation-time telemetry captured alongside a history entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrillTelemetry {
    #[serde(default)]
    pub step_outcomes: Vec<StepOutcome>,
    #[serde(default)]
    pub avg_proposal_confidence: Option<f64>,
    #[serde(default)]
    pub avg_proposal_impact: Option<f64>,
    #[serde(default)]
    pub freshness_drop_count: u32,
    #[serde(default)]
    pub proposal_category_count: u32,
}

const MAX_FAILED_STEPS: usize = 5;
const MAX_COMPLETED_SUMMARIES: usize = 5;
const MAX_MODIFIED_FILES: usize = 20;
const MAX_STEP_OUTCOMES: usize = 10;

/// One immutable record of a finished trajectory run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillHistoryEntry {
    pub name: String,
    pub description: String,
    pub steps_total: u32,
    pub steps_completed: u32,
    pub steps_failed: u32,
    pub outcome: DrillOutcome,
    pub completion_pct: f64,
    pub categories: Vec<String>,
    pub scopes: Vec<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub failed_steps: Option<Vec<String>>,
    #[serde(default)]
    pub completed_step_summaries: Option<Vec<String>>,
    #[serde(default)]
    pub modified_files: Option<Vec<String>>,
    #[serde(default)]
    pub ambition_level: Option<AmbitionLevel>,
    #[serde(default)]
    pub telemetry: Option<DrillTelemetry>,
}

fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

impl DrillHistoryEntry {
    /// Build an entry, applying every documented cap and uniqueness rule so
    /// callers cannot construct a non-conforming history entry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        steps_total: u32,
        steps_completed: u32,
        steps_failed: u32,
        outcome: DrillOutcome,
        categories: Vec<String>,
        scopes: Vec<String>,
        timestamp: i64,
    ) -> Self {
        let completion_pct = if steps_total == 0 {
            0.0
        } else {
            f64::from(steps_completed) / f64::from(steps_total)
        };
        Self {
            name: name.into(),
            description: description.into(),
            steps_total,
            steps_completed,
            steps_failed,
            outcome,
            completion_pct,
            categories: dedup_preserve_order(categories),
            scopes: dedup_preserve_order(scopes),
            timestamp,
            failed_steps: None,
            completed_step_summaries: None,
            modified_files: None,
            ambition_level: None,
            telemetry: None,
        }
    }

    pub fn with_failed_steps(mut self, mut steps: Vec<String>) -> Self {
        steps.truncate(MAX_FAILED_STEPS);
        self.failed_steps = Some(steps);
        self
    }

    pub fn with_completed_step_summaries(mut self, mut summaries: Vec<String>) -> Self {
        summaries.truncate(MAX_COMPLETED_SUMMARIES);
        self.completed_step_summaries = Some(summaries);
        self
    }

    pub fn with_modified_files(mut self, mut files: Vec<String>) -> Self {
        files.truncate(MAX_MODIFIED_FILES);
        self.modified_files = Some(files);
        self
    }

    pub fn with_ambition_level(mut self, level: AmbitionLevel) -> Self {
        self.ambition_level = Some(level);
        self
    }

    pub fn with_telemetry(mut self, mut telemetry: DrillTelemetry) -> Self {
        telemetry.step_outcomes.truncate(MAX_STEP_OUTCOMES);
        self.telemetry = Some(telemetry);
        self
    }
}

/// The persisted drill-history file: `{entries, coveredCategories,
/// coveredScopes}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrillHistoryFile {
    #[serde(default)]
    pub entries: Vec<DrillHistoryEntry>,
    #[serde(default)]
    pub covered_categories: HashMap<String, u64>,
    #[serde(default)]
    pub covered_scopes: HashMap<String, u64>,
}

/// Cap on `coveredScopes` entries, by frequency, per the data model.
pub const MAX_COVERED_SCOPES: usize = 200;

impl DrillHistoryFile {
    /// Append `entry`, dropping the oldest entry first if already at `cap`,
    /// and folding its categories/scopes into the coverage maps.
    pub fn append(&mut self, entry: DrillHistoryEntry, cap: usize) {
        if self.entries.len() >= cap && !self.entries.is_empty() {
            self.entries.remove(0);
        }
        for category in &entry.categories {
            *self.covered_categories.entry(category.clone()).or_insert(0) += 1;
        }
        for scope in &entry.scopes {
            *self.covered_scopes.entry(scope.clone()).or_insert(0) += 1;
        }
        self.entries.push(entry);
        self.enforce_scope_cap();
    }

    fn enforce_scope_cap(&mut self) {
        if self.covered_scopes.len() <= MAX_COVERED_SCOPES {
            return;
        }
        let mut by_freq: Vec<(String, u64)> = self.covered_scopes.drain().collect();
        by_freq.sort_by(|a, b| b.1.cmp(&a.1));
        by_freq.truncate(MAX_COVERED_SCOPES);
        self.covered_scopes = by_freq.into_iter().collect();
    }
}

/// Clamp a configured history cap to the documented [10,1000] range.
pub fn clamp_history_cap(cap: usize) -> usize {
    cap.clamp(10, 1000)
}
