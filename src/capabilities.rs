//! The capability bundle (§6, §9): every external collaborator the Wheel
//! Loop depends on, expressed as an explicit trait, constructed once by the
//! caller and passed in as `Arc<dyn Trait>` - mirroring the
//! `Arc<dyn LlmClient>` construction pattern `llm::create_client` uses for
//! the single external LLM dependency, generalized here to the full set of
//! nine collaborators the wheel needs.
//!
//! `Clock` and `Filesystem` exist purely so pre/post-cycle timing and the
//! history store's temp+rename writes are deterministically testable
//! without a real sleep or a real disk.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Trajectory;

/// A proposal surfaced by a [`Surveyor`] run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub verification_commands: Vec<String>,
    pub allowed_paths: Vec<String>,
    pub primary_files: Vec<String>,
    pub confidence: u32,
    pub impact: u32,
    pub rationale: String,
    pub estimated_complexity: Complexity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

/// Input scoping a single survey invocation.
#[derive(Debug, Clone, Default)]
pub struct SurveyRequest {
    pub scope: Option<String>,
    pub category_allow: Vec<String>,
    pub category_block: Vec<String>,
    pub min_confidence: u32,
    pub protected_paths: Vec<String>,
    pub token_budget: u32,
}

/// Proposal discovery against a scope (§6 "Surveyor").
#[async_trait]
pub trait Surveyor: Send + Sync {
    async fn survey(&self, request: SurveyRequest) -> eyre::Result<Vec<Proposal>>;
}

/// Context blocks assembled by the Drill Planner for trajectory generation
/// (§4.4 step 9).
#[derive(Debug, Clone, Default)]
pub struct TrajectoryContext {
    pub history_summary: String,
    pub diversity_hint: String,
    pub sector_summary: String,
    pub taste_hint: String,
    pub learnings: Vec<String>,
    pub dedup_hint: String,
    pub goal_hint: Option<String>,
    pub metrics_hint: String,
    pub dependency_edges: Vec<(String, String)>,
    pub causal_context: String,
    pub escalation_hint: Option<String>,
    pub arc_guidance: Vec<String>,
    pub convergence_hint: Option<String>,
}

/// Trajectory synthesis from a selected proposal batch (§6 "Trajectory
/// generator").
#[async_trait]
pub trait TrajectoryGenerator: Send + Sync {
    async fn generate(
        &self,
        proposals: &[Proposal],
        context: &TrajectoryContext,
        ambition: crate::domain::AmbitionLevel,
        session_phase: crate::domain::SessionPhase,
    ) -> eyre::Result<Trajectory>;
}

/// A unit of coding work handed to an external agent.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub title: String,
    pub description: String,
    pub allowed_paths: Vec<String>,
    pub forbidden_paths: Vec<String>,
    pub verification_commands: Vec<String>,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketOutcome {
    Completed,
    NoChanges,
    Failed,
    ScopeViolation,
    SpindleAbort,
}

/// Ticket execution (§6 "Agent invoker").
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, ticket: &Ticket) -> eyre::Result<TicketOutcome>;
}

/// Structural facts about the codebase (§6 "Codebase index").
#[derive(Debug, Clone, Default)]
pub struct CodebaseSnapshot {
    pub modules: Vec<String>,
    pub dependency_edges: Vec<(String, String)>,
    pub reverse_edges: Vec<(String, String)>,
    pub dead_exports: Vec<String>,
    pub structural_issues: Vec<String>,
    pub hub_modules: Vec<String>,
}

#[async_trait]
pub trait CodebaseIndex: Send + Sync {
    async fn snapshot(&self) -> eyre::Result<CodebaseSnapshot>;
    async fn structural_change_since(&self, cycle: u64) -> eyre::Result<bool>;
}

/// Per-path-prefix partition bookkeeping (§4.6 "sector state").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorState {
    pub path_prefix: String,
    pub min_confidence: Option<u32>,
    pub last_yield_cycle: Option<u64>,
}

#[async_trait]
pub trait SectorStore: Send + Sync {
    async fn current_sector(&self) -> eyre::Result<Option<SectorState>>;
    async fn save(&self, sector: &SectorState) -> eyre::Result<()>;
    async fn rotate(&self) -> eyre::Result<()>;
}

/// Human-facing output, routed through a capability rather than printed
/// directly, per the "global state (chalk, console)" design note - the
/// core emits structured events, not colored strings.
pub trait DisplayAdapter: Send + Sync {
    fn cycle_started(&self, cycle: u64);
    fn cycle_finished(&self, cycle: u64, completed: u32, failed: u32);
    fn shutdown(&self, reason: &str);
}

/// Wall-clock access, abstracted so pre/post-cycle timing is testable
/// without real sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
    async fn sleep(&self, duration: Duration);
}

/// Filesystem access, abstracted so persistence code is testable without a
/// real disk.
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
    async fn write(&self, path: &Path, contents: &str) -> std::io::Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// External process control (git fetch/merge, verification command
/// execution).
#[async_trait]
pub trait Process: Send + Sync {
    async fn run(&self, cmd: &str, timeout: Duration) -> eyre::Result<ProcessOutput>;
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// The full set of collaborators the Wheel Loop is constructed with.
pub struct Capabilities {
    pub surveyor: Arc<dyn Surveyor>,
    pub trajectory_generator: Arc<dyn TrajectoryGenerator>,
    pub agent_invoker: Arc<dyn AgentInvoker>,
    pub codebase_index: Arc<dyn CodebaseIndex>,
    pub sector_store: Arc<dyn SectorStore>,
    pub display: Arc<dyn DisplayAdapter>,
    pub clock: Arc<dyn Clock>,
    pub filesystem: Arc<dyn Filesystem>,
    pub process: Arc<dyn Process>,
}

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    pub struct MockSurveyor {
        pub proposals: Vec<Proposal>,
    }

    #[async_trait]
    impl Surveyor for MockSurveyor {
        async fn survey(&self, _request: SurveyRequest) -> eyre::Result<Vec<Proposal>> {
            Ok(self.proposals.clone())
        }
    }

    pub struct MockTrajectoryGenerator {
        pub trajectory: Trajectory,
    }

    #[async_trait]
    impl TrajectoryGenerator for MockTrajectoryGenerator {
        async fn generate(
            &self,
            _proposals: &[Proposal],
            _context: &TrajectoryContext,
            _ambition: crate::domain::AmbitionLevel,
            _session_phase: crate::domain::SessionPhase,
        ) -> eyre::Result<Trajectory> {
            Ok(self.trajectory.clone())
        }
    }

    pub struct MockAgentInvoker {
        pub outcome: TicketOutcome,
    }

    #[async_trait]
    impl AgentInvoker for MockAgentInvoker {
        async fn invoke(&self, _ticket: &Ticket) -> eyre::Result<TicketOutcome> {
            Ok(self.outcome)
        }
    }

    #[derive(Default)]
    pub struct MockCodebaseIndex {
        pub snapshot: CodebaseSnapshot,
        pub structural_change: bool,
    }

    #[async_trait]
    impl CodebaseIndex for MockCodebaseIndex {
        async fn snapshot(&self) -> eyre::Result<CodebaseSnapshot> {
            Ok(self.snapshot.clone())
        }
        async fn structural_change_since(&self, _cycle: u64) -> eyre::Result<bool> {
            Ok(self.structural_change)
        }
    }

    #[derive(Default)]
    pub struct MockSectorStore {
        pub sector: Mutex<Option<SectorState>>,
    }

    #[async_trait]
    impl SectorStore for MockSectorStore {
        async fn current_sector(&self) -> eyre::Result<Option<SectorState>> {
            Ok(self.sector.lock().unwrap().clone())
        }
        async fn save(&self, sector: &SectorState) -> eyre::Result<()> {
            *self.sector.lock().unwrap() = Some(sector.clone());
            Ok(())
        }
        async fn rotate(&self) -> eyre::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct NullDisplay;

    impl DisplayAdapter for NullDisplay {
        fn cycle_started(&self, _cycle: u64) {}
        fn cycle_finished(&self, _cycle: u64, _completed: u32, _failed: u32) {}
        fn shutdown(&self, _reason: &str) {}
    }

    pub struct FixedClock {
        pub unix_time: std::sync::atomic::AtomicI64,
    }

    impl FixedClock {
        pub fn new(unix_time: i64) -> Self {
            Self {
                unix_time: std::sync::atomic::AtomicI64::new(unix_time),
            }
        }
    }

    #[async_trait]
    impl Clock for FixedClock {
        fn now_unix(&self) -> i64 {
            self.unix_time.load(std::sync::atomic::Ordering::SeqCst)
        }
        async fn sleep(&self, _duration: Duration) {}
    }

    // `RealFilesystem` lives in `crate::runtime` since `main` also
    // constructs it for production use; re-exported here so existing tests
    // can keep referring to `capabilities::mock::RealFilesystem`.
    pub use crate::runtime::RealFilesystem;

    #[derive(Default)]
    pub struct MockProcess {
        pub output: ProcessOutput,
    }

    #[async_trait]
    impl Process for MockProcess {
        async fn run(&self, _cmd: &str, _timeout: Duration) -> eyre::Result<ProcessOutput> {
            Ok(self.output.clone())
        }
    }
}
