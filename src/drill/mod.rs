//! The Drill subsystem (§4.2-§4.5): history persistence, metrics derived
//! from it, the cooldown/ambition/trajectory-generation planner, and the
//! trajectory critic.

pub mod critic;
pub mod history_store;
pub mod metrics;
pub mod planner;

pub use critic::{critique_trajectory, Critique, ProposalConflict, ProposalRef};
pub use planner::{compute_ambition_level, compute_arc_guidance, get_adaptive_proposal_thresholds, get_drill_cooldown, ArcGuidance, ProposalThresholds};
