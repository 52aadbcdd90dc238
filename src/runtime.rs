//! Production capability implementations (ambient expansion of §6/§9): the
//! concrete collaborators `main` wires into a [`crate::capabilities::Capabilities`]
//! bundle. Test code uses [`crate::capabilities::mock`] instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::capabilities::{
    AgentInvoker, Clock, CodebaseIndex, CodebaseSnapshot, DisplayAdapter, Filesystem, Process, ProcessOutput,
    Proposal, SectorState, SectorStore, Surveyor, SurveyRequest, Ticket, TicketOutcome, TrajectoryContext,
    TrajectoryGenerator,
};
use crate::domain::{AmbitionLevel, SessionPhase, Trajectory};
use crate::llm::{CompletionRequest, LlmClient, Message};

/// Wall clock + real `tokio::time::sleep`.
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    fn now_unix(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Shells out via `tokio::process::Command`, same "spawn + capture
/// stdout/stderr" shape as the tool executor, generalized with a timeout.
pub struct RealProcess;

#[async_trait]
impl Process for RealProcess {
    async fn run(&self, cmd: &str, timeout: Duration) -> eyre::Result<ProcessOutput> {
        let fut = tokio::process::Command::new("sh").arg("-c").arg(cmd).output();

        let output = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(%cmd, ?timeout, "process timed out");
                return Ok(ProcessOutput {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("timed out after {timeout:?}"),
                });
            }
        };

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Delegates straight to `tokio::fs`.
pub struct RealFilesystem;

#[async_trait]
impl Filesystem for RealFilesystem {
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
    async fn write(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        tokio::fs::write(path, contents).await
    }
    async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        tokio::fs::rename(from, to).await
    }
    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// Routes cycle events through `tracing` rather than printing directly.
#[derive(Default)]
pub struct TracingDisplay;

impl DisplayAdapter for TracingDisplay {
    fn cycle_started(&self, cycle: u64) {
        info!(cycle, "cycle started");
    }

    fn cycle_finished(&self, cycle: u64, completed: u32, failed: u32) {
        info!(cycle, completed, failed, "cycle finished");
    }

    fn shutdown(&self, reason: &str) {
        info!(reason, "session shutting down");
    }
}

/// Single-sector bookkeeping persisted as JSON via temp+rename, the same
/// crash-safe write the Drill History Store uses.
pub struct JsonSectorStore {
    filesystem: Arc<dyn Filesystem>,
    path: PathBuf,
}

impl JsonSectorStore {
    pub fn new(filesystem: Arc<dyn Filesystem>, path: PathBuf) -> Self {
        Self { filesystem, path }
    }
}

#[async_trait]
impl SectorStore for JsonSectorStore {
    async fn current_sector(&self) -> eyre::Result<Option<SectorState>> {
        match self.filesystem.read_to_string(&self.path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, sector: &SectorState) -> eyre::Result<()> {
        let json = serde_json::to_string_pretty(sector)?;
        let tmp = self.path.with_extension("tmp");
        self.filesystem.write(&tmp, &json).await?;
        self.filesystem.rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn rotate(&self) -> eyre::Result<()> {
        debug!("sector rotation delegated to external sector policy, keeping current sector");
        Ok(())
    }
}

/// A minimal real `CodebaseIndex`: counts source files under `root` as a
/// structural proxy. Full dependency-graph extraction is an external
/// tool's job per the capability bundle's framing.
pub struct FileCountCodebaseIndex {
    root: PathBuf,
}

impl FileCountCodebaseIndex {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn walk(dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().and_then(|n| n.to_str()) == Some("target") {
                    continue;
                }
                Self::walk(&path, out);
            } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                out.push(path.to_string_lossy().into_owned());
            }
        }
    }
}

#[async_trait]
impl CodebaseIndex for FileCountCodebaseIndex {
    async fn snapshot(&self) -> eyre::Result<CodebaseSnapshot> {
        let mut modules = Vec::new();
        Self::walk(&self.root, &mut modules);
        Ok(CodebaseSnapshot {
            modules,
            ..Default::default()
        })
    }

    async fn structural_change_since(&self, _cycle: u64) -> eyre::Result<bool> {
        Ok(false)
    }
}

fn extract_json_array(text: &str) -> &str {
    let start = text.find('[').unwrap_or(0);
    let end = text.rfind(']').map(|i| i + 1).unwrap_or(text.len());
    &text[start..end]
}

/// Survey prompts the configured LLM for a JSON array of proposals.
pub struct LlmSurveyor {
    llm: Arc<dyn LlmClient>,
}

impl LlmSurveyor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Surveyor for LlmSurveyor {
    async fn survey(&self, request: SurveyRequest) -> eyre::Result<Vec<Proposal>> {
        let system_prompt = "Survey the codebase for improvement proposals. \
            Reply with ONLY a JSON array of objects with fields: id, category, title, \
            description, acceptance_criteria (string array), verification_commands (string array), \
            allowed_paths (string array), primary_files (string array), confidence (0-100), \
            impact (0-100), rationale, estimated_complexity (one of trivial/simple/moderate/complex).";

        let prompt = format!(
            "scope={:?} min_confidence={} token_budget={}",
            request.scope, request.min_confidence, request.token_budget
        );

        let response = self
            .llm
            .complete(CompletionRequest {
                system_prompt: system_prompt.to_string(),
                messages: vec![Message::user(prompt)],
                tools: vec![],
                max_tokens: 4096,
            })
            .await
            .map_err(|e| eyre::eyre!(e))?;

        let Some(content) = response.content else {
            return Ok(Vec::new());
        };
        let proposals: Vec<Proposal> = serde_json::from_str(extract_json_array(&content))
            .map_err(|err| eyre::eyre!("survey response was not a valid proposal array: {err}"))?;
        Ok(proposals)
    }
}

/// Trajectory generation prompts the configured LLM for the hand-rolled
/// trajectory YAML dialect and parses it with the trajectory engine.
pub struct LlmTrajectoryGenerator {
    llm: Arc<dyn LlmClient>,
}

impl LlmTrajectoryGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TrajectoryGenerator for LlmTrajectoryGenerator {
    async fn generate(
        &self,
        proposals: &[Proposal],
        context: &TrajectoryContext,
        ambition: AmbitionLevel,
        session_phase: SessionPhase,
    ) -> eyre::Result<Trajectory> {
        let system_prompt = "Assemble the given proposals into a trajectory using the YAML dialect: \
            name, description, steps: each with id, title, description, scope, acceptance_criteria, \
            verification_commands, depends_on. Reply with ONLY the YAML document.";

        let prompt = format!(
            "ambition={:?} phase={:?} arc_guidance={:?} proposals={}",
            ambition,
            session_phase,
            context.arc_guidance,
            serde_json::to_string(proposals)?
        );

        let response = self
            .llm
            .complete(CompletionRequest {
                system_prompt: system_prompt.to_string(),
                messages: vec![Message::user(prompt)],
                tools: vec![],
                max_tokens: 4096,
            })
            .await
            .map_err(|e| eyre::eyre!(e))?;

        let content = response.content.unwrap_or_default();
        Ok(crate::engine::parse_trajectory_yaml(&content))
    }
}

/// Invokes an external coding agent by shelling out to a configured
/// command, passing the ticket as a prompt on stdin via a temp file.
pub struct ShellAgentInvoker {
    process: Arc<dyn Process>,
    command: String,
}

impl ShellAgentInvoker {
    pub fn new(process: Arc<dyn Process>, command: String) -> Self {
        Self { process, command }
    }
}

#[async_trait]
impl AgentInvoker for ShellAgentInvoker {
    async fn invoke(&self, ticket: &Ticket) -> eyre::Result<TicketOutcome> {
        let prompt_path = std::env::temp_dir().join(format!("promptwheel-ticket-{}.txt", std::process::id()));
        tokio::fs::write(&prompt_path, format!("{}\n\n{}", ticket.title, ticket.description)).await?;

        let cmd = format!("{} < {}", self.command, prompt_path.display());
        let output = self.process.run(&cmd, Duration::from_secs(600)).await?;
        let _ = tokio::fs::remove_file(&prompt_path).await;

        if output.exit_code == 0 {
            Ok(TicketOutcome::Completed)
        } else {
            warn!(ticket = %ticket.title, exit_code = output.exit_code, "agent invocation failed");
            Ok(TicketOutcome::Failed)
        }
    }
}
