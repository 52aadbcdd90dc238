//! The Wheel Loop (§4.7): the top-level driver composing pre-cycle, drill
//! planning, scout, ticket execution, and post-cycle into one repeating
//! cycle, plus directive-hint handling (§6) and shutdown signaling.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::capabilities::{Capabilities, Process, Proposal, SurveyRequest, Ticket, TicketOutcome, TrajectoryContext};
use crate::config::Config;
use crate::domain::SessionState;
use crate::drill;
use crate::finalizer::{self, SessionSummary};
use crate::scheduler::{post_cycle, pre_cycle, worker_pool, PostCycleSignal, PreCycleOutcome};

/// A single directive consumed once from the hints file (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveHint {
    DrillPause,
    DrillResume,
    DrillDisable,
}

impl DirectiveHint {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "drill:pause" => Some(Self::DrillPause),
            "drill:resume" => Some(Self::DrillResume),
            "drill:disable" => Some(Self::DrillDisable),
            _ => None,
        }
    }
}

fn apply_directive(state: &mut SessionState, hint: DirectiveHint) {
    match hint {
        DirectiveHint::DrillPause => state.drill_mode = false,
        DirectiveHint::DrillResume => state.drill_mode = true,
        DirectiveHint::DrillDisable => {
            state.drill_mode = false;
            info!("wheel: drill mode disabled by directive");
        }
    }
}

/// Budgets that bound how many cycles/reviews/time a session may run for.
#[derive(Debug, Clone, Default)]
pub struct SessionBudgets {
    pub max_cycles: Option<u64>,
    pub max_reviews: Option<u32>,
    pub started_at_unix: Option<i64>,
    pub expires_at_unix: Option<i64>,
}

impl SessionBudgets {
    /// Fraction of the time budget elapsed, in [0,1]; 0 when unbounded.
    fn elapsed_ratio(&self, now_unix: i64) -> f64 {
        match (self.started_at_unix, self.expires_at_unix) {
            (Some(start), Some(end)) if end > start => ((now_unix - start) as f64 / (end - start) as f64).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

fn should_continue(state: &SessionState, budgets: &SessionBudgets, now_unix: i64) -> bool {
    if state.shutdown_requested {
        return false;
    }
    if let Some(max_cycles) = budgets.max_cycles {
        if state.cycle_count >= max_cycles {
            return false;
        }
    }
    if let Some(expires_at) = budgets.expires_at_unix {
        if now_unix >= expires_at {
            return false;
        }
    }
    true
}

const FRESHNESS_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of [`maybe_generate_trajectory`]'s decision cascade (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrillPlanResult {
    Generated,
    Cooldown,
    Failed,
    Insufficient,
    LowQuality,
    Stale,
}

/// Deterministic uniform jitter in {-1, 0, +1}, keyed off the cycle count so
/// repeated calls within a cycle agree and the sequence still wanders.
fn drill_jitter(cycle_count: u64) -> i32 {
    (cycle_count % 3) as i32 - 1
}

/// Files changed in the working tree since the last commit, used as the
/// freshness filter's per-proposal staleness signal (§4.4 step 5). Grounded
/// on the `Process` capability rather than a dedicated file-mtime
/// collaborator, since none is named in the capability bundle.
async fn modified_files_since_survey(process: &Arc<dyn Process>) -> Vec<String> {
    match process.run("git diff --name-only", FRESHNESS_CHECK_TIMEOUT).await {
        Ok(output) if output.exit_code == 0 => output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect(),
        _ => Vec::new(),
    }
}

/// Stratified sample (§4.4 step 8): one pick per category (highest
/// confidence+impact first), then fill the remainder by quality.
fn stratified_sample(proposals: Vec<Proposal>, max: usize) -> Vec<Proposal> {
    if proposals.len() <= max {
        return proposals;
    }

    let mut by_category: std::collections::BTreeMap<String, Vec<Proposal>> = std::collections::BTreeMap::new();
    for p in proposals {
        by_category.entry(p.category.clone()).or_default().push(p);
    }
    for bucket in by_category.values_mut() {
        bucket.sort_by_key(|p| std::cmp::Reverse(p.confidence + p.impact));
    }

    let mut selected = Vec::new();
    let mut remaining = Vec::new();
    for bucket in by_category.values_mut() {
        if !bucket.is_empty() {
            selected.push(bucket.remove(0));
        }
        remaining.extend(bucket.drain(..));
    }
    remaining.sort_by_key(|p| std::cmp::Reverse(p.confidence + p.impact));

    for p in remaining {
        if selected.len() >= max {
            break;
        }
        selected.push(p);
    }
    selected.truncate(max);
    selected
}

/// `maybeGenerateTrajectory` (§4.4): the decision cascade gating whether a
/// fresh trajectory gets activated this cycle.
async fn maybe_generate_trajectory(state: &mut SessionState, cfg: &Config, caps: &Capabilities) -> DrillPlanResult {
    // 1. Cooldown gate.
    let jitter = drill_jitter(state.cycle_count);
    let cooldown = drill::get_drill_cooldown(state, &cfg.drill, jitter);
    if let Some(last_cycle) = state.drill_last_generated_at_cycle {
        if state.cycle_count.saturating_sub(last_cycle) < u64::from(cooldown) {
            return DrillPlanResult::Cooldown;
        }

        // 2. Staleness gate: nothing structural has changed since the last
        // generation attempt, so resurveying now would just repeat it.
        if matches!(caps.codebase_index.structural_change_since(last_cycle).await, Ok(false)) {
            return DrillPlanResult::Cooldown;
        }
    }

    let ambition = drill::compute_ambition_level(state, &cfg.drill);
    let thresholds = drill::get_adaptive_proposal_thresholds(state, &cfg.drill);
    let arc_guidance = drill::compute_arc_guidance(state, None, &cfg.drill);

    // 3. Broad survey with a temporarily lowered confidence threshold.
    let request = SurveyRequest {
        min_confidence: state.effective_min_confidence.saturating_sub(cfg.drill.confidence_discount),
        token_budget: cfg.scout.batch_token_budget,
        ..Default::default()
    };

    let proposals = match caps.surveyor.survey(request).await {
        Ok(proposals) => proposals,
        Err(err) => {
            debug!(%err, "wheel: survey failed, falling through to a normal cycle");
            return DrillPlanResult::Failed;
        }
    };

    if let Some(outcome) = state.cycle_outcomes.last_mut() {
        outcome.proposals_seen = proposals.len() as u32;
    }

    if proposals.is_empty() {
        state.drill_last_freshness_drop_ratio = Some(0.0);
        return DrillPlanResult::Insufficient;
    }

    // 5. Freshness filter: drop proposals whose primary files (first 3)
    // already changed since this survey started.
    let modified = modified_files_since_survey(&caps.process).await;
    let total = proposals.len();
    let survived: Vec<Proposal> = proposals
        .into_iter()
        .filter(|p| !p.primary_files.iter().take(3).any(|f| modified.contains(f)))
        .collect();
    let dropped = total - survived.len();
    let drop_ratio = dropped as f64 / total as f64;
    state.drill_last_freshness_drop_ratio = Some(drop_ratio);

    // 6. Effective minimum, reduced when escalation candidates are present.
    let effective_min = if state.escalation_candidates.is_empty() {
        thresholds.min
    } else {
        thresholds.min.saturating_sub(1).max(1)
    };
    if (survived.len() as u32) < effective_min {
        return if drop_ratio > 0.3 {
            DrillPlanResult::Stale
        } else {
            DrillPlanResult::Insufficient
        };
    }

    // 7. Quality gate.
    let avg_confidence = survived.iter().map(|p| f64::from(p.confidence)).sum::<f64>() / survived.len() as f64;
    let avg_impact = survived.iter().map(|p| f64::from(p.impact)).sum::<f64>() / survived.len() as f64;
    let hard_floor_confidence = (cfg.drill.min_avg_confidence / 2.0).max(10.0);
    let hard_floor_impact = (cfg.drill.min_avg_impact / 2.0).max(1.0);
    if avg_confidence < hard_floor_confidence || avg_impact < hard_floor_impact {
        return DrillPlanResult::LowQuality;
    }
    let soft_warning = avg_confidence < cfg.drill.min_avg_confidence || avg_impact < cfg.drill.min_avg_impact;

    // 8. Stratified sampling to maxProposals.
    let selected = stratified_sample(survived, thresholds.max as usize);

    let mut context = TrajectoryContext {
        arc_guidance: arc_guidance.signals,
        ..Default::default()
    };
    if soft_warning {
        context.metrics_hint = "conservative, short trajectory".to_string();
    }

    let proposal_refs: Vec<drill::ProposalRef> = selected
        .iter()
        .map(|p| drill::ProposalRef { primary_files: p.primary_files.clone() })
        .collect();

    match caps.trajectory_generator.generate(&selected, &context, ambition, state.session_phase).await {
        Ok(trajectory) => {
            // Trajectory Critic (§4.5): a freshly generated trajectory must
            // pass the quality gate before it is ever activated.
            let critique = drill::critique_trajectory(&trajectory, &proposal_refs, ambition, &[], &cfg.drill);
            if !critique.passed {
                debug!(critique = %critique.critique, "wheel: generated trajectory failed the quality gate, discarding");
                return DrillPlanResult::LowQuality;
            }

            let step_states = crate::engine::create_initial_step_states(&trajectory);
            state.current_trajectory_step = crate::engine::get_next_step(&trajectory, &step_states).map(|s| s.id.clone());
            state.active_trajectory_state = Some(crate::domain::TrajectoryState {
                step_states,
                ..crate::domain::TrajectoryState::new(trajectory.name.clone(), caps.clock.now_unix())
            });
            state.active_trajectory = Some(trajectory);
            state.drill_trajectories_generated += 1;
            state.drill_last_generated_at_cycle = Some(state.cycle_count);
            DrillPlanResult::Generated
        }
        Err(err) => {
            debug!(%err, "wheel: trajectory generation failed, drill_last_generated_at_cycle not advanced");
            DrillPlanResult::Failed
        }
    }
}

/// Wheel Loop counter handling for each decision-cascade result (§4.7).
fn apply_drill_plan_result(state: &mut SessionState, cfg: &Config, result: DrillPlanResult) {
    match result {
        DrillPlanResult::Generated => {
            state.drill_consecutive_insufficient = 0;
            state.drill_consecutive_low_quality = 0;
        }
        DrillPlanResult::Insufficient => {
            state.drill_consecutive_insufficient += 1;
            if state.drill_consecutive_insufficient >= cfg.drill.max_consecutive_insufficient {
                state.drill_mode = false;
                info!("wheel: disabling drill mode - codebase appears converged");
            }
        }
        DrillPlanResult::LowQuality => {
            state.drill_consecutive_low_quality += 1;
            // Low quality gets two extra rounds beyond the normal
            // insufficient-proposals threshold before disabling drill.
            if state.drill_consecutive_low_quality >= cfg.drill.max_consecutive_insufficient + 2 {
                state.drill_mode = false;
                info!("wheel: disabling drill mode - sustained low-quality proposals");
            }
        }
        DrillPlanResult::Stale => {
            state.drill_consecutive_insufficient = state.drill_consecutive_insufficient.saturating_sub(1);
        }
        DrillPlanResult::Cooldown | DrillPlanResult::Failed => {}
    }
}

async fn run_drill_planner(state: &mut SessionState, cfg: &Config, caps: &Capabilities) {
    if !state.drill_mode || state.has_active_trajectory() {
        return;
    }
    let result = maybe_generate_trajectory(state, cfg, caps).await;
    apply_drill_plan_result(state, cfg, result);
}

/// Greedily pre-verify the active trajectory's current step without
/// invoking an agent; advance as far as verification alone allows, capped
/// by the trajectory's step count (§4.7).
async fn pre_verify_active_trajectory(state: &mut SessionState, cfg: &Config, caps: &Capabilities) {
    let Some(trajectory) = state.active_trajectory.clone() else { return };
    let cap = trajectory.steps.len();
    for _ in 0..cap {
        if !state.has_active_trajectory() {
            break;
        }
        let finished = post_cycle::progress_active_trajectory(state, cfg, &caps.process).await;
        if finished || state.current_trajectory_step.is_none() {
            break;
        }
    }
}

fn tickets_from_trajectory(state: &SessionState) -> Vec<Ticket> {
    let Some(trajectory) = &state.active_trajectory else { return Vec::new() };
    let Some(step_id) = &state.current_trajectory_step else { return Vec::new() };
    let Some(step) = trajectory.step(step_id) else { return Vec::new() };
    vec![Ticket {
        title: step.title.clone(),
        description: step.description.clone(),
        allowed_paths: step.scope.clone().into_iter().collect(),
        forbidden_paths: Vec::new(),
        verification_commands: step.verification_commands.clone(),
        max_retries: step.effective_max_retries(3),
    }]
}

/// Run one full Wheel Loop cycle. Returns the post-cycle signal so the
/// caller's driving loop knows whether to keep iterating.
pub async fn run_cycle(
    state: &mut SessionState,
    cfg: &Config,
    caps: &Capabilities,
    elapsed_ratio: f64,
    checkpoint_path: &std::path::Path,
    parallel: usize,
) -> Result<PostCycleSignal, crate::error::WheelError> {
    let pre = pre_cycle::run(state, cfg, &caps.sector_store, &caps.clock, elapsed_ratio).await;
    match pre {
        PreCycleOutcome::Skip => return Ok(PostCycleSignal::Continue),
        PreCycleOutcome::Shutdown => return Ok(PostCycleSignal::Break),
        PreCycleOutcome::Proceed => {}
    }

    run_drill_planner(state, cfg, caps).await;

    if state.has_active_trajectory() {
        pre_verify_active_trajectory(state, cfg, caps).await;
    }

    let tickets = tickets_from_trajectory(state);
    if !tickets.is_empty() {
        let results = worker_pool::execute_tickets(Arc::clone(&caps.agent_invoker), tickets, parallel).await;
        if let Some(outcome) = state.cycle_outcomes.last_mut() {
            for result in &results {
                match result.outcome {
                    TicketOutcome::Completed => outcome.completed_tickets += 1,
                    TicketOutcome::Failed | TicketOutcome::ScopeViolation | TicketOutcome::SpindleAbort => {
                        outcome.failed_tickets += 1
                    }
                    TicketOutcome::NoChanges => {}
                }
            }
        }
    }

    let signal = post_cycle::run(state, cfg, &caps.filesystem, &caps.process, &caps.clock, checkpoint_path).await;
    caps.display.cycle_finished(
        state.cycle_count,
        state.cycle_outcomes.last().map(|o| o.completed_tickets).unwrap_or(0),
        state.cycle_outcomes.last().map(|o| o.failed_tickets).unwrap_or(0),
    );
    Ok(signal)
}

/// Drive the Wheel Loop to completion (one or more cycles, ending when
/// `should_continue` turns false), then run the Finalizer.
pub async fn run_session(
    state: &mut SessionState,
    cfg: &Config,
    caps: &Capabilities,
    budgets: &SessionBudgets,
    promptwheel_dir: &PathBuf,
    parallel: usize,
) -> Result<SessionSummary, crate::error::WheelError> {
    let checkpoint_path = promptwheel_dir.join("run-state.json");

    loop {
        let now = caps.clock.now_unix();
        if !should_continue(state, budgets, now) {
            break;
        }
        caps.display.cycle_started(state.cycle_count + 1);
        let elapsed_ratio = budgets.elapsed_ratio(now);

        match run_cycle(state, cfg, caps, elapsed_ratio, &checkpoint_path, parallel).await? {
            PostCycleSignal::Continue => {}
            PostCycleSignal::Break => break,
        }
    }

    if let Some(reason) = &state.shutdown_reason {
        caps.display.shutdown(reason);
    }

    Ok(finalizer::finalize(state, &caps.filesystem, promptwheel_dir).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::mock::{
        FixedClock, MockAgentInvoker, MockCodebaseIndex, MockProcess, MockSectorStore, MockSurveyor,
        MockTrajectoryGenerator, NullDisplay, RealFilesystem,
    };
    use crate::capabilities::{Complexity, ProcessOutput};
    use crate::domain::{DrillHistoryEntry, DrillOutcome, Step, Trajectory};

    fn proposal(id: &str, category: &str, confidence: u32, impact: u32, primary_file: &str) -> Proposal {
        Proposal {
            id: id.to_string(),
            category: category.to_string(),
            title: id.to_string(),
            description: String::new(),
            acceptance_criteria: vec![],
            verification_commands: vec![],
            allowed_paths: vec![],
            primary_files: vec![primary_file.to_string()],
            confidence,
            impact,
            rationale: String::new(),
            estimated_complexity: Complexity::Simple,
        }
    }

    fn two_step_trajectory() -> Trajectory {
        let mut step1 = Step::new("step-1", "first");
        step1.verification_commands = vec!["true".to_string()];
        let mut step2 = Step::new("step-2", "second");
        step2.verification_commands = vec!["true".to_string()];
        step2.depends_on = vec!["step-1".to_string()];
        Trajectory {
            name: "t".to_string(),
            description: "d".to_string(),
            steps: vec![step1, step2],
        }
    }

    fn test_caps(proposals: Vec<Proposal>, process_output: ProcessOutput, structural_change: bool) -> Capabilities {
        Capabilities {
            surveyor: Arc::new(MockSurveyor { proposals }),
            trajectory_generator: Arc::new(MockTrajectoryGenerator { trajectory: two_step_trajectory() }),
            agent_invoker: Arc::new(MockAgentInvoker { outcome: TicketOutcome::Completed }),
            codebase_index: Arc::new(MockCodebaseIndex { structural_change, ..Default::default() }),
            sector_store: Arc::new(MockSectorStore::default()),
            display: Arc::new(NullDisplay),
            clock: Arc::new(FixedClock::new(0)),
            filesystem: Arc::new(RealFilesystem),
            process: Arc::new(MockProcess { output: process_output }),
        }
    }

    #[tokio::test]
    async fn cooldown_gate_blocks_regeneration_before_enough_cycles_pass() {
        let cfg = Config::default();
        let mut state = SessionState::new();
        state.drill_mode = true;
        state.cycle_count = 3;
        state.drill_last_generated_at_cycle = Some(3);
        state.drill_history.append(
            DrillHistoryEntry::new("t", "d", 5, 0, 5, DrillOutcome::Stalled, vec!["fix".into()], vec![], 0),
            100,
        );

        let caps = test_caps(vec![proposal("p1", "fix", 80, 5, "src/a.rs")], ProcessOutput::default(), false);
        let result = maybe_generate_trajectory(&mut state, &cfg, &caps).await;
        assert_eq!(result, DrillPlanResult::Cooldown);
    }

    #[tokio::test]
    async fn freshness_filter_drops_modified_proposals_and_reports_stale() {
        let mut cfg = Config::default();
        cfg.drill.min_proposals = 2;
        let mut state = SessionState::new();
        state.drill_mode = true;

        let proposals = vec![
            proposal("p1", "fix", 80, 5, "p1.rs"),
            proposal("p2", "fix", 80, 5, "p2.rs"),
            proposal("p3", "fix", 80, 5, "p3.rs"),
            proposal("p4", "fix", 80, 5, "p4.rs"),
            proposal("p5", "fix", 80, 5, "p5.rs"),
        ];
        let modified_output = ProcessOutput {
            exit_code: 0,
            stdout: "p1.rs\np2.rs\np3.rs\np4.rs\n".to_string(),
            stderr: String::new(),
        };
        let caps = test_caps(proposals, modified_output, false);

        let result = maybe_generate_trajectory(&mut state, &cfg, &caps).await;
        assert_eq!(result, DrillPlanResult::Stale);
        assert_eq!(state.drill_last_freshness_drop_ratio, Some(0.8));
    }

    #[tokio::test]
    async fn low_average_confidence_is_gated_before_generation() {
        let cfg = Config::default();
        let mut state = SessionState::new();
        state.drill_mode = true;

        let proposals = vec![
            proposal("p1", "fix", 5, 1, "p1.rs"),
            proposal("p2", "fix", 5, 1, "p2.rs"),
            proposal("p3", "fix", 5, 1, "p3.rs"),
        ];
        let caps = test_caps(proposals, ProcessOutput::default(), false);

        let result = maybe_generate_trajectory(&mut state, &cfg, &caps).await;
        assert_eq!(result, DrillPlanResult::LowQuality);
    }

    #[tokio::test]
    async fn quality_critique_rejects_an_undersized_conservative_trajectory() {
        let cfg = Config::default();
        let mut state = SessionState::new();
        state.drill_mode = true;

        let proposals = vec![
            proposal("p1", "fix", 80, 5, "p1.rs"),
            proposal("p2", "fix", 80, 5, "p2.rs"),
            proposal("p3", "fix", 80, 5, "p3.rs"),
        ];
        let caps = Capabilities {
            trajectory_generator: Arc::new(MockTrajectoryGenerator {
                trajectory: {
                    let mut step = Step::new("only-step", "one step is below the conservative minimum of two");
                    step.verification_commands = vec!["true".to_string()];
                    Trajectory { name: "t".to_string(), description: "d".to_string(), steps: vec![step] }
                },
            }),
            ..test_caps(proposals, ProcessOutput::default(), false)
        };

        let result = maybe_generate_trajectory(&mut state, &cfg, &caps).await;
        assert_eq!(result, DrillPlanResult::LowQuality);
        assert!(state.active_trajectory.is_none());
    }

    #[test]
    fn repeated_insufficient_results_disable_drill_mode() {
        let cfg = Config::default();
        let mut state = SessionState::new();
        state.drill_mode = true;

        for _ in 0..cfg.drill.max_consecutive_insufficient {
            apply_drill_plan_result(&mut state, &cfg, DrillPlanResult::Insufficient);
        }
        assert!(!state.drill_mode);
    }

    #[test]
    fn stale_result_decrements_the_insufficient_counter() {
        let cfg = Config::default();
        let mut state = SessionState::new();
        state.drill_consecutive_insufficient = 2;
        apply_drill_plan_result(&mut state, &cfg, DrillPlanResult::Stale);
        assert_eq!(state.drill_consecutive_insufficient, 1);
    }
}
