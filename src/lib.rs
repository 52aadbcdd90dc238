//! promptwheel - an autonomous code-improvement cycle runner.
//!
//! Each cycle surveys the codebase for improvement proposals, optionally
//! assembles them into a multi-step trajectory, executes tickets against an
//! external coding agent, and verifies the result - repeating with fresh
//! context every time rather than accumulating one long conversation.
//!
//! # Modules
//!
//! - [`capabilities`] - external interface traits (survey, generate, invoke, ...)
//! - [`domain`] - trajectories, drill history, and session state
//! - [`engine`] - pure functions over the step DAG
//! - [`drill`] - metrics, ambition/cooldown planning, and trajectory critique
//! - [`scheduler`] - pre/post-cycle accounting and the ticket worker pool
//! - [`finalizer`] - end-of-session aggregation and cleanup
//! - [`wheel`] - the top-level driver tying the above into one loop
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

#![allow(dead_code)]

pub mod capabilities;
pub mod cli;
pub mod config;
pub mod domain;
pub mod drill;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod llm;
pub mod runtime;
pub mod scheduler;
pub mod wheel;

pub use capabilities::Capabilities;
pub use config::Config;
pub use domain::SessionState;
pub use error::WheelError;
pub use finalizer::SessionSummary;
pub use wheel::{run_cycle, run_session, SessionBudgets};
