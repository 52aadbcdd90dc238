//! The Drill Planner (§4.4): cooldown, adaptive proposal thresholds,
//! ambition level, and arc guidance. `maybeGenerateTrajectory`'s decision
//! cascade (steps 3-12, which depend on the external Surveyor and
//! TrajectoryGenerator capabilities) lives in [`crate::wheel`] alongside the
//! rest of the capability-driven Wheel Loop; this module owns the pure
//! decisions that precede and gate it.

use crate::config::DrillConfig;
use crate::domain::{AmbitionLevel, SessionState};
use crate::drill::metrics;

/// Result of [`get_drill_cooldown`]'s component adjustments, exposed for
/// the caller to log without recomputing them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProposalThresholds {
    pub min: u32,
    pub max: u32,
}

/// First-generation (no history at all) always returns zero cooldown.
pub fn get_drill_cooldown(state: &SessionState, cfg: &DrillConfig, jitter: i32) -> u32 {
    let history = &state.drill_history;
    if history.entries.is_empty() {
        return 0;
    }

    let t = &cfg.ambition_thresholds;
    let has_enough = history.entries.len() >= 3;

    if has_enough && metrics::step1_failure_rate(history) > t.step1_critical {
        return 0;
    }

    let last = history.entries.last().expect("checked non-empty above");
    let base = cfg.cooldown_completed + (cfg.cooldown_stalled - cfg.cooldown_completed) * (1.0 - last.completion_pct);

    let mut adjusted = base;
    if has_enough {
        let rate = metrics::weighted_completion_rate(history);
        let sigmoid = 4.0 - 8.0 / (1.0 + (-cfg.sigmoid_k * (rate - cfg.sigmoid_center)).exp());
        adjusted += sigmoid.round();
    }

    if let Some(drop_ratio) = state.drill_last_freshness_drop_ratio {
        if drop_ratio > 0.5 {
            adjusted -= 2.0;
        } else if drop_ratio < 0.1 {
            adjusted += 1.0;
        }
    }

    adjusted += f64::from(jitter.clamp(-1, 1));

    adjusted.max(0.0).round() as u32
}

/// Widen or narrow the proposal batch size based on recent recall.
pub fn get_adaptive_proposal_thresholds(state: &SessionState, cfg: &DrillConfig) -> ProposalThresholds {
    let mut min = cfg.min_proposals;
    let mut max = cfg.max_proposals;
    let history = &state.drill_history;
    if history.entries.len() < 3 {
        return ProposalThresholds { min, max };
    }

    let rate = metrics::weighted_completion_rate(history);
    if rate > 0.7 {
        min = min.saturating_sub(1).max(2);
        max += 2;
    } else if rate < 0.3 {
        min += 1;
        max = max.saturating_sub(2).max(min + 1);
    }
    ProposalThresholds { min, max }
}

/// The planner's risk appetite for the next generated trajectory.
pub fn compute_ambition_level(state: &SessionState, cfg: &DrillConfig) -> AmbitionLevel {
    use crate::domain::SessionPhase;

    let history = &state.drill_history;
    let t = &cfg.ambition_thresholds;

    if history.entries.len() < 3 || state.session_phase == SessionPhase::Cooldown {
        return AmbitionLevel::Conservative;
    }

    let step1_rate = metrics::step1_failure_rate(history);
    if step1_rate > t.step1_critical {
        return AmbitionLevel::Conservative;
    }

    let consecutive_wins = history
        .entries
        .iter()
        .rev()
        .take(2)
        .all(|e| e.outcome == crate::domain::DrillOutcome::Completed)
        && history.entries.len() >= 2;

    let weighted_rate = metrics::weighted_completion_rate(history);

    if step1_rate > t.step1_fail || weighted_rate < t.conservative {
        return if consecutive_wins {
            AmbitionLevel::Moderate
        } else {
            AmbitionLevel::Conservative
        };
    }

    let ambitious_guard_ok = |weighted_rate: f64| -> bool {
        let per_ambition = metrics::compute_per_ambition_success_rates(history);
        match per_ambition.get(&AmbitionLevel::Ambitious) {
            Some(Some(rate)) if *rate < 0.4 => false,
            _ => weighted_rate >= 0.0,
        }
    };

    if weighted_rate > t.ambitious && step1_rate < t.step1_ambitious_max && history.entries.len() >= 5 {
        return if ambitious_guard_ok(weighted_rate) {
            AmbitionLevel::Ambitious
        } else {
            AmbitionLevel::Moderate
        };
    }

    if consecutive_wins && step1_rate < t.step1_ambitious_max && history.entries.len() >= 4 {
        return if ambitious_guard_ok(weighted_rate) {
            AmbitionLevel::Ambitious
        } else {
            AmbitionLevel::Moderate
        };
    }

    AmbitionLevel::Moderate
}

const FOUNDATION_CATEGORIES: [&str; 3] = ["types", "refactor", "fix"];
const POLISH_CATEGORIES: [&str; 3] = ["test", "docs", "cleanup"];

/// Arc guidance: up to two prose hints steering the next survey's
/// category/scope mix, derived from the last `causal_window` entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArcGuidance {
    pub signals: Vec<String>,
}

/// Signal-priority arc guidance over the last 5 drill-history entries, per
/// the mutual-exclusion rules in the design (stall-pivot and momentum never
/// both fire; chain is suppressed by momentum; goal guidance softens
/// instead of competing for the cap).
pub fn compute_arc_guidance(state: &SessionState, goal_category: Option<&str>, cfg: &DrillConfig) -> ArcGuidance {
    let _ = cfg;
    let window: Vec<_> = state.drill_history.entries.iter().rev().take(5).collect();
    if window.is_empty() {
        return ArcGuidance::default();
    }

    let mut stalled_cats: Vec<String> = Vec::new();
    let mut completed_cats: Vec<String> = Vec::new();
    for entry in &window {
        for cat in &entry.categories {
            match entry.outcome {
                crate::domain::DrillOutcome::Stalled => stalled_cats.push(cat.clone()),
                crate::domain::DrillOutcome::Completed => completed_cats.push(cat.clone()),
            }
        }
    }

    let multiple_stalls = window.iter().filter(|e| e.outcome == crate::domain::DrillOutcome::Stalled).count() >= 2;
    let strong_momentum = window
        .iter()
        .take(3)
        .all(|e| e.outcome == crate::domain::DrillOutcome::Completed)
        && window.len() >= 3;

    let mut signals = Vec::new();

    let momentum_fires = strong_momentum && !(multiple_stalls && strong_momentum);
    if multiple_stalls && strong_momentum {
        let mut unexplored: Vec<&str> = FOUNDATION_CATEGORIES
            .iter()
            .chain(POLISH_CATEGORIES.iter())
            .filter(|c| !completed_cats.iter().any(|cc| cc == *c) && !stalled_cats.iter().any(|sc| sc == *c))
            .copied()
            .collect();
        unexplored.truncate(3);
        signals.push(format!(
            "Selective momentum: avoid {} (stalled), double down on {} (completed){}",
            dedup_join(&stalled_cats),
            dedup_join(&completed_cats),
            if unexplored.is_empty() {
                String::new()
            } else {
                format!("; unexplored: {}", unexplored.join(", "))
            }
        ));
    } else if multiple_stalls {
        signals.push(format!("Pivot away from stalling categories: {}", dedup_join(&stalled_cats)));
    } else if strong_momentum {
        signals.push(format!("Strong completion momentum in: {}", dedup_join(&completed_cats)));
    }

    let foundation_count = window
        .iter()
        .filter(|e| e.categories.first().map(|c| FOUNDATION_CATEGORIES.contains(&c.as_str())).unwrap_or(false))
        .count();
    let polish_count = window
        .iter()
        .filter(|e| e.categories.first().map(|c| POLISH_CATEGORIES.contains(&c.as_str())).unwrap_or(false))
        .count();

    if signals.len() < 2 {
        if foundation_count >= 3 && polish_count < 2 {
            signals.push("Phase rotation: foundation work is well-covered, shift toward polish".to_string());
        } else if polish_count >= 3 {
            signals.push("Phase rotation: polish is well-covered, return to core work".to_string());
        }
    }

    if signals.len() < 2 && !momentum_fires {
        if let Some(last_completed) = window.iter().find(|e| e.outcome == crate::domain::DrillOutcome::Completed) {
            if let Some(cat) = last_completed.categories.first() {
                signals.push(format!("Build on last completed work in {cat}"));
            }
        }
    }

    if let Some(goal_cat) = goal_category {
        if signals.len() < 2 {
            let already_aligned = signals.iter().any(|s| s.contains(goal_cat));
            if !already_aligned {
                signals.push(format!("Favor progress toward goal category {goal_cat}"));
            }
        }
    }

    signals.truncate(2);
    ArcGuidance { signals }
}

fn dedup_join(items: &[String]) -> String {
    let mut seen = std::collections::HashSet::new();
    let unique: Vec<&str> = items.iter().filter(|i| seen.insert(i.as_str())).map(String::as_str).collect();
    unique.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DrillHistoryEntry, DrillOutcome};

    fn state_with(entries: Vec<DrillHistoryEntry>) -> SessionState {
        let mut state = SessionState::new();
        for e in entries {
            state.drill_history.append(e, 100);
        }
        state
    }

    fn entry(outcome: DrillOutcome, total: u32, completed: u32, categories: Vec<&str>) -> DrillHistoryEntry {
        DrillHistoryEntry::new(
            "t",
            "d",
            total,
            completed,
            total - completed,
            outcome,
            categories.into_iter().map(String::from).collect(),
            vec![],
            0,
        )
    }

    #[test]
    fn first_generation_has_zero_cooldown() {
        let state = SessionState::new();
        assert_eq!(get_drill_cooldown(&state, &DrillConfig::default(), 0), 0);
    }

    #[test]
    fn critical_step1_failure_forces_zero_cooldown_and_conservative_ambition() {
        let cfg = DrillConfig::default();
        let mut state = state_with(vec![
            entry(DrillOutcome::Stalled, 5, 0, vec!["refactor"]),
            entry(DrillOutcome::Stalled, 5, 0, vec!["refactor"]),
            entry(DrillOutcome::Stalled, 5, 0, vec!["refactor"]),
            entry(DrillOutcome::Completed, 5, 5, vec!["test"]),
            entry(DrillOutcome::Completed, 5, 5, vec!["test"]),
        ]);
        state.session_phase = crate::domain::SessionPhase::Mid;

        assert_eq!(get_drill_cooldown(&state, &cfg, 0), 0);
        assert_eq!(compute_ambition_level(&state, &cfg), AmbitionLevel::Conservative);
    }

    #[test]
    fn arc_guidance_caps_at_two_signals() {
        let state = state_with(vec![
            entry(DrillOutcome::Stalled, 5, 0, vec!["security"]),
            entry(DrillOutcome::Stalled, 5, 0, vec!["security"]),
            entry(DrillOutcome::Completed, 5, 5, vec!["refactor"]),
            entry(DrillOutcome::Completed, 5, 5, vec!["test"]),
            entry(DrillOutcome::Completed, 5, 5, vec!["fix"]),
        ]);
        let guidance = compute_arc_guidance(&state, None, &DrillConfig::default());
        assert!(guidance.signals.len() <= 2);
        assert!(guidance.signals[0].starts_with("Selective momentum"));
    }

    #[test]
    fn adaptive_thresholds_widen_on_high_recall() {
        let state = state_with(vec![
            entry(DrillOutcome::Completed, 5, 5, vec!["fix"]),
            entry(DrillOutcome::Completed, 5, 5, vec!["fix"]),
            entry(DrillOutcome::Completed, 5, 5, vec!["fix"]),
        ]);
        let cfg = DrillConfig::default();
        let thresholds = get_adaptive_proposal_thresholds(&state, &cfg);
        assert_eq!(thresholds.min, 2);
        assert_eq!(thresholds.max, 12);
    }
}
