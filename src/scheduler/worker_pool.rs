//! Bounded parallel ticket execution (§5 ambient expansion): a
//! `tokio::sync::Semaphore`-gated set of `tokio::spawn`ed tasks, one per
//! in-flight ticket - the same acquire/await-permit shape the concurrent-
//! limit logic elsewhere in this codebase uses, generalized from "cap
//! concurrent loop iterations" to "cap concurrent ticket executions".
//!
//! Each task owns a cloned, immutable [`Ticket`] and returns an owned
//! outcome; nothing here ever holds `&mut SessionState` across the spawn
//! boundary, matching the "immutable snapshots in, immutable outcomes out"
//! rule for parallel workers.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::capabilities::{AgentInvoker, Ticket, TicketOutcome};

/// One ticket's execution result, returned by value so the caller can fold
/// it into `SessionState` serially.
#[derive(Debug, Clone)]
pub struct TicketResult {
    pub title: String,
    pub outcome: TicketOutcome,
}

/// Run `tickets` through `invoker`, at most `max_concurrent` in flight at
/// once, and return all results once every task has finished.
pub async fn execute_tickets(invoker: Arc<dyn AgentInvoker>, tickets: Vec<Ticket>, max_concurrent: usize) -> Vec<TicketResult> {
    let max_concurrent = max_concurrent.max(1);
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut handles = Vec::with_capacity(tickets.len());

    for ticket in tickets {
        let semaphore = Arc::clone(&semaphore);
        let invoker = Arc::clone(&invoker);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            debug!(ticket = %ticket.title, "worker_pool: executing ticket");
            let outcome = match invoker.invoke(&ticket).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(ticket = %ticket.title, %err, "worker_pool: agent invocation failed");
                    TicketOutcome::Failed
                }
            };
            TicketResult { title: ticket.title, outcome }
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(err) => warn!(%err, "worker_pool: ticket task panicked"),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::mock::MockAgentInvoker;

    fn ticket(title: &str) -> Ticket {
        Ticket {
            title: title.to_string(),
            description: String::new(),
            allowed_paths: vec![],
            forbidden_paths: vec![],
            verification_commands: vec![],
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn runs_all_tickets_and_preserves_no_particular_order_but_all_results() {
        let invoker: Arc<dyn AgentInvoker> = Arc::new(MockAgentInvoker { outcome: TicketOutcome::Completed });
        let tickets = vec![ticket("a"), ticket("b"), ticket("c")];
        let results = execute_tickets(invoker, tickets, 2).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.outcome == TicketOutcome::Completed));
    }

    #[tokio::test]
    async fn zero_concurrency_is_floored_to_one() {
        let invoker: Arc<dyn AgentInvoker> = Arc::new(MockAgentInvoker { outcome: TicketOutcome::NoChanges });
        let results = execute_tickets(invoker, vec![ticket("solo")], 0).await;
        assert_eq!(results.len(), 1);
    }
}
