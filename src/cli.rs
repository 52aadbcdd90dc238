//! CLI surface (§6): a single `run` command with the flags the Wheel Loop
//! needs to size and scope a session.

use std::path::PathBuf;

use clap::Parser;

/// Autonomous code-improvement cycle runner.
#[derive(Parser, Debug)]
#[command(
    name = "promptwheel",
    about = "Autonomous code-improvement cycle runner",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/promptwheel/logs/promptwheel.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Open external code reviews for completed trajectories
    #[arg(long, help = "Open a code review once a trajectory completes")]
    pub pr: bool,

    /// Maximum concurrent ticket executions
    #[arg(long, default_value_t = 1, help = "Maximum concurrent ticket executions")]
    pub parallel: usize,

    /// Plan without making changes
    #[arg(long, help = "Plan a cycle without invoking the agent")]
    pub dry_run: bool,

    /// Restrict scouting to proposals matching this label
    #[arg(long, help = "Restrict scouting to proposals matching this label")]
    pub issues: Option<String>,

    /// Run as a long-lived daemon instead of exiting after one session
    #[arg(long, help = "Run as a long-lived daemon")]
    pub daemon: bool,

    /// Output format: text or json
    #[arg(short, long, default_value = "text", help = "Output format: text or json")]
    pub output: OutputFormat,

    /// Session time budget in hours
    #[arg(long, help = "Session time budget, in hours")]
    pub hours: Option<f64>,

    /// Include test files as drill targets
    #[arg(long, help = "Include test files as drill targets")]
    pub tests: bool,

    /// Use a cheaper model where the capability bundle supports it
    #[arg(long, help = "Prefer a cheaper model where supported")]
    pub eco: bool,

    /// Include CLAUDE.md-style guideline files in survey context
    #[arg(long, help = "Include CLAUDE.md-style guideline files in survey context")]
    pub include_claude_md: bool,
}

/// Output format for the final session summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {s}. Use: text or json")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Process exit codes (§6): 0 success, 1 failure with zero reviews created,
/// 2 initialization failure (returned directly from `main` before a
/// `Cli` is even parsed into a session, so it has no representation here).
pub fn exit_code_for(summary: &crate::finalizer::SessionSummary, reviews_created: u32) -> i32 {
    if reviews_created >= 1 || summary.failed_tickets == 0 {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = Cli::parse_from(["promptwheel"]);
        assert_eq!(cli.parallel, 1);
        assert!(!cli.dry_run);
        assert_eq!(cli.output, OutputFormat::Text);
        assert!(cli.hours.is_none());
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from([
            "promptwheel",
            "--verbose",
            "--pr",
            "--parallel",
            "4",
            "--hours",
            "2.5",
            "--output",
            "json",
            "--issues",
            "refactor",
        ]);
        assert!(cli.verbose);
        assert!(cli.pr);
        assert_eq!(cli.parallel, 4);
        assert_eq!(cli.hours, Some(2.5));
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.issues.as_deref(), Some("refactor"));
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("bogus".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn exit_code_reflects_review_creation() {
        let summary = crate::finalizer::SessionSummary {
            total_cycles: 1,
            completed_tickets: 0,
            failed_tickets: 3,
            trajectories_generated: 0,
            trajectories_completed: 0,
            trajectories_stalled: 0,
            final_effective_min_confidence: 0,
            shutdown_reason: None,
        };
        assert_eq!(exit_code_for(&summary, 1), 0);
        assert_eq!(exit_code_for(&summary, 0), 1);
    }

    #[test]
    fn exit_code_success_with_no_failures_even_without_reviews() {
        let summary = crate::finalizer::SessionSummary {
            total_cycles: 1,
            completed_tickets: 2,
            failed_tickets: 0,
            trajectories_generated: 0,
            trajectories_completed: 0,
            trajectories_stalled: 0,
            final_effective_min_confidence: 0,
            shutdown_reason: None,
        };
        assert_eq!(exit_code_for(&summary, 0), 0);
    }
}
