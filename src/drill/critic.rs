//! The Trajectory Critic (§4.5): post-generation validation of a freshly
//! generated trajectory against the proposals and ambition level it was
//! built from.

use crate::config::DrillConfig;
use crate::domain::{AmbitionLevel, Trajectory};

/// A single source proposal, reduced to the fields the critic needs.
#[derive(Debug, Clone)]
pub struct ProposalRef {
    pub primary_files: Vec<String>,
}

/// A reported conflict between two proposals that a single step combined.
#[derive(Debug, Clone)]
pub struct ProposalConflict {
    pub step_id: String,
}

/// Result of critiquing a trajectory: pass/fail plus a human-readable,
/// XML-tagged critique block (empty string when `passed`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Critique {
    pub passed: bool,
    pub issues: Vec<String>,
    pub critique: String,
}

fn step_count_range(ambition: AmbitionLevel) -> (usize, usize) {
    match ambition {
        AmbitionLevel::Conservative => (2, 3),
        AmbitionLevel::Moderate => (3, 5),
        AmbitionLevel::Ambitious => (5, 8),
    }
}

/// Longest common path-prefix (directory-boundary-aware) of a set of file
/// paths, used as the "proposals' common scope" for the step-1 breadth
/// check.
fn common_scope_prefix(paths: &[String]) -> String {
    if paths.is_empty() {
        return String::new();
    }
    let mut components: Vec<Vec<&str>> = paths.iter().map(|p| p.split('/').collect()).collect();
    let min_len = components.iter().map(Vec::len).min().unwrap_or(0);
    let first = components.remove(0);
    let mut prefix = Vec::new();
    for i in 0..min_len {
        if components.iter().all(|c| c[i] == first[i]) {
            prefix.push(first[i]);
        } else {
            break;
        }
    }
    prefix.join("/")
}

fn scope_within(scope: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    scope.starts_with(prefix)
}

pub fn critique_trajectory(
    trajectory: &Trajectory,
    proposals: &[ProposalRef],
    ambition: AmbitionLevel,
    conflicts: &[ProposalConflict],
    cfg: &DrillConfig,
) -> Critique {
    let mut issues = Vec::new();

    if ambition == AmbitionLevel::Conservative {
        if let Some(first) = trajectory.steps.first() {
            if let Some(scope) = &first.scope {
                let all_files: Vec<String> = proposals.iter().flat_map(|p| p.primary_files.clone()).collect();
                let prefix = common_scope_prefix(&all_files);
                if !scope_within(scope, &prefix) {
                    issues.push(format!(
                        "Step 1 scope '{scope}' is broader than the proposals' common scope '{prefix}' for a conservative trajectory"
                    ));
                }
            }
        }
    }

    for step in &trajectory.steps {
        if step.verification_commands.is_empty() {
            issues.push(format!("Step '{}' has no verification commands", step.id));
        }
    }

    let (min_steps, max_steps) = step_count_range(ambition);
    let slack = cfg.step_count_slack as usize;
    let count = trajectory.steps.len();
    if count < min_steps || count > max_steps + slack {
        issues.push(format!(
            "Step count {count} is outside the {min_steps}-{max_steps} range (+{slack} slack) for {ambition:?} ambition"
        ));
    }

    for conflict in conflicts {
        if let Some(step) = trajectory.steps.iter().find(|s| s.id == conflict.step_id) {
            if step.categories.len() > 3 {
                issues.push(format!(
                    "Step '{}' combines conflicting proposals but carries {} categories (max 3)",
                    step.id,
                    step.categories.len()
                ));
            }
        }
    }

    let passed = issues.is_empty();
    let critique = if passed {
        String::new()
    } else {
        let mut block = String::from("<trajectory-critique>\nQuality Gate Failed\n");
        for issue in &issues {
            block.push_str(&format!("- {issue}\n"));
        }
        block.push_str("</trajectory-critique>");
        block
    };

    Critique { passed, issues, critique }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Step, Trajectory};

    fn step(id: &str, scope: &str, categories: Vec<&str>, verify: Vec<&str>) -> Step {
        let mut s = Step::new(id, id);
        s.scope = Some(scope.to_string());
        s.categories = categories.into_iter().map(String::from).collect();
        s.verification_commands = verify.into_iter().map(String::from).collect();
        s
    }

    fn trajectory(steps: Vec<Step>) -> Trajectory {
        let mut t = Trajectory::new("t", "d");
        t.steps = steps;
        t
    }

    #[test]
    fn empty_verification_commands_is_gating() {
        let t = trajectory(vec![step("s1", "src/", vec!["fix"], vec![])]);
        let critique = critique_trajectory(&t, &[], AmbitionLevel::Moderate, &[], &DrillConfig::default());
        assert!(!critique.passed);
        assert!(critique.critique.contains("Quality Gate Failed"));
    }

    #[test]
    fn step_count_within_range_passes() {
        let t = trajectory(vec![
            step("s1", "src/", vec!["fix"], vec!["cargo test"]),
            step("s2", "src/", vec!["fix"], vec!["cargo test"]),
            step("s3", "src/", vec!["fix"], vec!["cargo test"]),
        ]);
        let critique = critique_trajectory(&t, &[], AmbitionLevel::Moderate, &[], &DrillConfig::default());
        assert!(critique.passed);
        assert!(critique.critique.is_empty());
    }

    #[test]
    fn conservative_step1_scope_broader_than_proposals_fails() {
        let t = trajectory(vec![step("s1", "src/", vec!["fix"], vec!["cargo test"]), step("s2", "src/a/", vec!["fix"], vec!["cargo test"])]);
        let proposals = vec![ProposalRef { primary_files: vec!["src/a/mod.rs".into(), "src/a/b.rs".into()] }];
        let critique = critique_trajectory(&t, &proposals, AmbitionLevel::Conservative, &[], &DrillConfig::default());
        assert!(!critique.passed);
    }
}
