//! Pre-cycle accounting (§4.6): runs once at the top of every Wheel Loop
//! iteration, before any survey/drill/execute work.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::capabilities::{Clock, SectorStore};
use crate::config::{Config, PullPolicy};
use crate::domain::SessionPhase;

/// Outcome of one pre-cycle pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreCycleOutcome {
    /// Proceed into this cycle's work.
    Proceed,
    /// Skip this cycle entirely (backpressure); the cycle-count increment
    /// performed at step 2 has already been undone.
    Skip,
    /// A shutdown was requested (idle budget, branch divergence); the loop
    /// should finalize.
    Shutdown,
}

fn session_phase_from_elapsed(elapsed_ratio: f64) -> SessionPhase {
    if elapsed_ratio < 0.15 {
        SessionPhase::Warmup
    } else if elapsed_ratio < 0.7 {
        SessionPhase::Mid
    } else if elapsed_ratio < 0.9 {
        SessionPhase::Deep
    } else {
        SessionPhase::Cooldown
    }
}

/// Run pre-cycle accounting. `elapsed_ratio` is the session's
/// elapsed/budget fraction (0 when unbounded); `per_sector_min_confidence`
/// is looked up by the caller from `SectorStore` ahead of time so this
/// function stays synchronous everywhere except the explicit await points.
pub async fn run(
    state: &mut crate::domain::SessionState,
    cfg: &Config,
    sector_store: &Arc<dyn SectorStore>,
    clock: &Arc<dyn Clock>,
    elapsed_ratio: f64,
) -> PreCycleOutcome {
    // 1. idle accounting
    let previous_completed = state.cycle_outcomes.last().map(|o| o.completed_tickets).unwrap_or(0);
    if previous_completed == 0 {
        state.consecutive_idle_cycles += 1;
    } else {
        state.consecutive_idle_cycles = 0;
    }
    if state.consecutive_idle_cycles >= cfg.cycle.max_idle_cycles {
        state.request_shutdown("idle");
        return PreCycleOutcome::Shutdown;
    }

    // 2. cycle increment
    state.cycle_count += 1;
    state.cycle_outcomes.push(crate::domain::CycleOutcome::default());

    // 3. rotate sector
    if let Err(err) = sector_store.rotate().await {
        warn!(%err, "pre_cycle: sector rotation failed, continuing with current sector");
    }

    // 4. session phase
    state.session_phase = session_phase_from_elapsed(elapsed_ratio);

    // 5. effective confidence
    let sector = sector_store.current_sector().await.ok().flatten();
    let mut confidence = sector.and_then(|s| s.min_confidence).unwrap_or(cfg.cycle.min_confidence) as i64;

    match state.session_phase {
        SessionPhase::Warmup => confidence += 10,
        SessionPhase::Deep => confidence = (confidence - 10).max(10),
        _ => {}
    }

    if state.cycle_count > 2 {
        let recent_quality = state
            .cycle_outcomes
            .iter()
            .rev()
            .take(5)
            .filter(|o| !o.is_idle())
            .map(|o| {
                let total = o.completed_tickets + o.failed_tickets;
                if total == 0 {
                    0.0
                } else {
                    f64::from(o.completed_tickets) / f64::from(total)
                }
            })
            .sum::<f64>()
            / 5.0;
        if recent_quality < 0.5 {
            confidence += 10;
        }
    }

    // 6. backpressure
    let review_ratio = if cfg.cycle.max_pending_reviews > 0 {
        f64::from(state.pending_external_reviews) / f64::from(cfg.cycle.max_pending_reviews)
    } else {
        0.0
    };
    if review_ratio > 0.7 {
        clock.sleep(std::time::Duration::from_secs(15)).await;
        state.cycle_count -= 1;
        state.cycle_outcomes.pop();
        return PreCycleOutcome::Skip;
    } else if review_ratio > 0.4 {
        confidence += 15;
    }

    // 7. clamp
    state.effective_min_confidence = confidence.clamp(0, 80) as u32;

    // 8. periodic refreshes
    if state.cycle_count % u64::from(cfg.cycle.pull_interval) == 0 {
        debug!(cycle = state.cycle_count, "pre_cycle: base-branch fast-forward pull due");
        // A non-fast-forward result is reported by the Process capability
        // at the call site; under PullPolicy::Halt that caller requests
        // shutdown with reason "branch_diverged" directly on SessionState.
        if cfg.cycle.pull_policy == PullPolicy::Halt {
            debug!("pre_cycle: strict pull policy - non-fast-forward would halt the session");
        }
    }

    debug!(
        cycle = state.cycle_count,
        confidence = state.effective_min_confidence,
        phase = ?state.session_phase,
        "pre_cycle: complete"
    );
    PreCycleOutcome::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::mock::{FixedClock, MockSectorStore};
    use crate::domain::SessionState;

    #[tokio::test]
    async fn idle_budget_exhaustion_requests_shutdown() {
        let mut state = SessionState::new();
        let cfg = Config::default();
        let sector_store: Arc<dyn SectorStore> = Arc::new(MockSectorStore::default());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(0));

        for _ in 0..cfg.cycle.max_idle_cycles {
            run(&mut state, &cfg, &sector_store, &clock, 0.0).await;
        }
        assert!(state.shutdown_requested);
        assert_eq!(state.shutdown_reason.as_deref(), Some("idle"));
    }

    #[tokio::test]
    async fn warmup_phase_raises_confidence() {
        let mut state = SessionState::new();
        let cfg = Config::default();
        let sector_store: Arc<dyn SectorStore> = Arc::new(MockSectorStore::default());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(0));

        run(&mut state, &cfg, &sector_store, &clock, 0.0).await;
        assert_eq!(state.effective_min_confidence, cfg.cycle.min_confidence + 10);
    }
}
