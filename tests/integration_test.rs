//! End-to-end tests driving a full session through [`promptwheel::wheel`]
//! with mock capabilities, rather than unit-testing individual modules.

use std::sync::Arc;

use promptwheel::capabilities::mock::{
    FixedClock, MockAgentInvoker, MockCodebaseIndex, MockSectorStore, MockSurveyor, MockTrajectoryGenerator,
    NullDisplay, RealFilesystem,
};
use promptwheel::capabilities::{Capabilities, Proposal, TicketOutcome};
use promptwheel::config::Config;
use promptwheel::domain::{SessionState, Step, Trajectory};
use promptwheel::wheel::{run_session, SessionBudgets};
use tempfile::TempDir;

fn sample_proposal(id: &str) -> Proposal {
    Proposal {
        id: id.to_string(),
        category: "refactor".to_string(),
        title: format!("Improve {id}"),
        description: "description".to_string(),
        acceptance_criteria: vec!["works".to_string()],
        verification_commands: vec!["true".to_string()],
        allowed_paths: vec!["src/".to_string()],
        primary_files: vec!["src/lib.rs".to_string()],
        confidence: 80,
        impact: 5,
        rationale: "because".to_string(),
        estimated_complexity: promptwheel::capabilities::Complexity::Simple,
    }
}

fn two_step_trajectory() -> Trajectory {
    let mut step1 = Step::new("step-1", "Do the thing");
    step1.verification_commands = vec!["true".to_string()];
    let mut step2 = Step::new("step-2", "Do the next thing");
    step2.verification_commands = vec!["true".to_string()];
    step2.depends_on = vec!["step-1".to_string()];
    Trajectory {
        name: "sample".to_string(),
        description: "a two-step trajectory".to_string(),
        steps: vec![step1, step2],
    }
}

fn make_capabilities(proposals: Vec<Proposal>, trajectory: Trajectory, outcome: TicketOutcome) -> Capabilities {
    Capabilities {
        surveyor: Arc::new(MockSurveyor { proposals }),
        trajectory_generator: Arc::new(MockTrajectoryGenerator { trajectory }),
        agent_invoker: Arc::new(MockAgentInvoker { outcome }),
        codebase_index: Arc::new(MockCodebaseIndex::default()),
        sector_store: Arc::new(MockSectorStore::default()),
        display: Arc::new(NullDisplay),
        clock: Arc::new(FixedClock::new(1_000)),
        filesystem: Arc::new(RealFilesystem),
        process: Arc::new(promptwheel::capabilities::mock::MockProcess::default()),
    }
}

#[tokio::test]
async fn a_session_with_enough_proposals_drills_and_completes_a_trajectory() {
    let temp_dir = TempDir::new().expect("tempdir");
    let mut config = Config::default();
    config.drill.min_proposals = 1;

    let proposals = vec![sample_proposal("p1"), sample_proposal("p2"), sample_proposal("p3")];
    let caps = make_capabilities(proposals, two_step_trajectory(), TicketOutcome::Completed);

    let mut state = SessionState::new();
    state.drill_mode = true;
    let budgets = SessionBudgets {
        max_cycles: Some(3),
        max_reviews: None,
        started_at_unix: Some(1_000),
        expires_at_unix: None,
    };

    let summary = run_session(&mut state, &config, &caps, &budgets, &temp_dir.path().to_path_buf(), 1)
        .await
        .expect("session should not error");

    assert!(summary.total_cycles >= 1);
    assert_eq!(summary.trajectories_generated, 1);
}

#[tokio::test]
async fn a_session_with_no_proposals_never_drills_and_halts_on_idle_budget() {
    let temp_dir = TempDir::new().expect("tempdir");
    let mut config = Config::default();
    config.cycle.max_idle_cycles = 2;

    let caps = make_capabilities(Vec::new(), two_step_trajectory(), TicketOutcome::NoChanges);

    let mut state = SessionState::new();
    state.drill_mode = true;
    let budgets = SessionBudgets {
        max_cycles: Some(50),
        max_reviews: None,
        started_at_unix: Some(1_000),
        expires_at_unix: None,
    };

    let summary = run_session(&mut state, &config, &caps, &budgets, &temp_dir.path().to_path_buf(), 1)
        .await
        .expect("session should not error");

    assert_eq!(summary.trajectories_generated, 0);
    assert_eq!(summary.shutdown_reason.as_deref(), Some("idle"));
}

#[tokio::test]
async fn a_failing_ticket_is_recorded_and_session_still_finalizes() {
    let temp_dir = TempDir::new().expect("tempdir");
    let mut config = Config::default();
    config.drill.min_proposals = 1;
    config.cycle.max_idle_cycles = 100;

    let proposals = vec![sample_proposal("p1")];
    let caps = make_capabilities(proposals, two_step_trajectory(), TicketOutcome::Failed);

    let mut state = SessionState::new();
    state.drill_mode = true;
    let budgets = SessionBudgets {
        max_cycles: Some(2),
        max_reviews: None,
        started_at_unix: Some(1_000),
        expires_at_unix: None,
    };

    let summary = run_session(&mut state, &config, &caps, &budgets, &temp_dir.path().to_path_buf(), 1)
        .await
        .expect("session should not error");

    assert!(summary.failed_tickets >= 1 || summary.total_cycles >= 1);
}
