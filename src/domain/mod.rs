//! Core data model for the wheel: trajectories, drill history, and session
//! state (§3 of the design). Behavior over these value types lives in
//! [`crate::engine`] and [`crate::drill`], not here.

mod drill_history;
mod id;
mod session;
mod trajectory;

pub use drill_history::{
    clamp_history_cap, AmbitionLevel, DrillHistoryEntry, DrillHistoryFile, DrillOutcome, DrillTelemetry, StepOutcome,
    MAX_COVERED_SCOPES,
};
pub use id::{generate_id, slugify, DomainId, IdResolver};
pub use session::{CycleOutcome, EscalationCandidate, LensRotation, SessionPhase, SessionState};
pub use trajectory::{
    bound_chars, bound_command_output, CommandOutcome, Direction, Measurement, Step, StepState, StepStatus,
    Trajectory, TrajectoryRunStatus, TrajectoryState,
};
