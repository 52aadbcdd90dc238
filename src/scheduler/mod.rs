//! The Pre/Post-Cycle Scheduler (§4.6) and the bounded ticket worker pool
//! (§5 ambient expansion).

pub mod post_cycle;
pub mod pre_cycle;
pub mod worker_pool;

pub use post_cycle::{ConvergenceAction, PostCycleSignal};
pub use pre_cycle::PreCycleOutcome;
pub use worker_pool::{execute_tickets, TicketResult};
