//! Drill Metrics (§4.3): pure reductions over drill history.
//!
//! The decay constant λ = ln(2)/5 gives completion metrics a half-life of 5
//! entries (newest-first weighting); a second constant ln(2)/10 is used for
//! category/scope coverage decay. For empty history every numeric output is
//! 0 and every array is empty - never NaN.

use std::collections::HashMap;

use crate::domain::{AmbitionLevel, DrillHistoryFile, DrillOutcome};

/// Half-life-5 decay constant for completion-rate style metrics.
pub fn completion_decay_lambda() -> f64 {
    std::f64::consts::LN_2 / 5.0
}

/// Half-life-10 decay constant for coverage metrics.
pub fn coverage_decay_lambda() -> f64 {
    std::f64::consts::LN_2 / 10.0
}

/// Exponential decay weight for an entry `age` positions back from the
/// newest (age 0 = most recent).
fn weight_for_age(age: usize, lambda: f64) -> f64 {
    (-lambda * age as f64).exp()
}

/// Fraction of entries with outcome = completed.
pub fn completion_rate(history: &DrillHistoryFile) -> f64 {
    if history.entries.is_empty() {
        return 0.0;
    }
    let completed = history.entries.iter().filter(|e| e.outcome == DrillOutcome::Completed).count();
    completed as f64 / history.entries.len() as f64
}

/// Σ(weight × completed?1:0) / Σweight, age counted from the newest entry.
pub fn weighted_completion_rate(history: &DrillHistoryFile) -> f64 {
    if history.entries.is_empty() {
        return 0.0;
    }
    let lambda = completion_decay_lambda();
    let n = history.entries.len();
    let mut numer = 0.0;
    let mut denom = 0.0;
    for (idx, entry) in history.entries.iter().enumerate() {
        let age = n - 1 - idx;
        let w = weight_for_age(age, lambda);
        denom += w;
        if entry.outcome == DrillOutcome::Completed {
            numer += w;
        }
    }
    if denom == 0.0 {
        0.0
    } else {
        numer / denom
    }
}

/// Σ(weight × completionPct) / Σweight, falling back to
/// stepsCompleted/stepsTotal when completionPct is absent (it never is in
/// this model - `completionPct` is always populated at construction - but
/// the fallback is kept for documents loaded from an older format).
pub fn weighted_step_completion_rate(history: &DrillHistoryFile) -> f64 {
    if history.entries.is_empty() {
        return 0.0;
    }
    let lambda = completion_decay_lambda();
    let n = history.entries.len();
    let mut numer = 0.0;
    let mut denom = 0.0;
    for (idx, entry) in history.entries.iter().enumerate() {
        let age = n - 1 - idx;
        let w = weight_for_age(age, lambda);
        let pct = if entry.steps_total > 0 {
            entry.completion_pct
        } else {
            0.0
        };
        numer += w * pct;
        denom += w;
    }
    if denom == 0.0 {
        0.0
    } else {
        numer / denom
    }
}

pub fn avg_step_completion_rate(history: &DrillHistoryFile) -> f64 {
    if history.entries.is_empty() {
        return 0.0;
    }
    history.entries.iter().map(|e| e.completion_pct).sum::<f64>() / history.entries.len() as f64
}

pub fn avg_steps_per_trajectory(history: &DrillHistoryFile) -> f64 {
    if history.entries.is_empty() {
        return 0.0;
    }
    history.entries.iter().map(|e| f64::from(e.steps_total)).sum::<f64>() / history.entries.len() as f64
}

/// Per-category {completed, total, rate}, where `rate` is the weighted
/// completion rate restricted to entries carrying that category.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CategorySuccess {
    pub completed: u32,
    pub total: u32,
    pub rate: f64,
}

pub fn category_success_rates(history: &DrillHistoryFile) -> HashMap<String, CategorySuccess> {
    let mut out: HashMap<String, CategorySuccess> = HashMap::new();
    let n = history.entries.len();
    let lambda = completion_decay_lambda();
    let mut weighted_num: HashMap<String, f64> = HashMap::new();
    let mut weighted_den: HashMap<String, f64> = HashMap::new();

    for (idx, entry) in history.entries.iter().enumerate() {
        let age = n - 1 - idx;
        let w = weight_for_age(age, lambda);
        for cat in &entry.categories {
            let stat = out.entry(cat.clone()).or_default();
            stat.total += 1;
            if entry.outcome == DrillOutcome::Completed {
                stat.completed += 1;
            }
            *weighted_num.entry(cat.clone()).or_insert(0.0) += if entry.outcome == DrillOutcome::Completed { w } else { 0.0 };
            *weighted_den.entry(cat.clone()).or_insert(0.0) += w;
        }
    }

    for (cat, stat) in out.iter_mut() {
        let den = weighted_den.get(cat).copied().unwrap_or(0.0);
        let num = weighted_num.get(cat).copied().unwrap_or(0.0);
        stat.rate = if den == 0.0 { 0.0 } else { num / den };
    }
    out
}

pub fn top_categories(history: &DrillHistoryFile) -> Vec<String> {
    let mut cats: Vec<(String, CategorySuccess)> = category_success_rates(history).into_iter().collect();
    cats.sort_by(|a, b| a.0.cmp(&b.0));
    cats.into_iter().filter(|(_, s)| s.rate >= 0.5).map(|(c, _)| c).collect()
}

pub fn stalled_categories(history: &DrillHistoryFile) -> Vec<String> {
    let mut cats: Vec<(String, CategorySuccess)> = category_success_rates(history).into_iter().collect();
    cats.sort_by(|a, b| a.0.cmp(&b.0));
    cats.into_iter()
        .filter(|(_, s)| s.rate < 0.3 && s.total >= 2)
        .map(|(c, _)| c)
        .collect()
}

/// (entries with outcome=stalled AND stepsCompleted=0) / total.
pub fn step1_failure_rate(history: &DrillHistoryFile) -> f64 {
    if history.entries.is_empty() {
        return 0.0;
    }
    let failures = history
        .entries
        .iter()
        .filter(|e| e.outcome == DrillOutcome::Stalled && e.steps_completed == 0)
        .count();
    failures as f64 / history.entries.len() as f64
}

/// For each step position `p` seen across entries with recorded step
/// outcomes, failed/total - restricted to positions with total >= 2.
pub fn step_position_failure_rates(history: &DrillHistoryFile) -> HashMap<usize, f64> {
    let mut failed: HashMap<usize, u32> = HashMap::new();
    let mut total: HashMap<usize, u32> = HashMap::new();

    for entry in &history.entries {
        let Some(telemetry) = &entry.telemetry else { continue };
        for outcome in &telemetry.step_outcomes {
            *total.entry(outcome.position).or_insert(0) += 1;
            if outcome.failed {
                *failed.entry(outcome.position).or_insert(0) += 1;
            }
        }
    }

    total
        .into_iter()
        .filter(|(_, t)| *t >= 2)
        .map(|(pos, t)| {
            let f = failed.get(&pos).copied().unwrap_or(0);
            (pos, f64::from(f) / f64::from(t))
        })
        .collect()
}

/// Decayed coverage counts for categories and scopes, using the
/// coverage-specific (half-life-10) decay constant applied to cumulative
/// counts in `coveredCategories`/`coveredScopes`.
pub fn compute_decayed_coverage(history: &DrillHistoryFile, cycles_since_update: u64) -> (HashMap<String, f64>, HashMap<String, f64>) {
    let lambda = coverage_decay_lambda();
    let decay = weight_for_age(cycles_since_update as usize, lambda);
    let categories = history
        .covered_categories
        .iter()
        .map(|(k, v)| (k.clone(), *v as f64 * decay))
        .collect();
    let scopes = history
        .covered_scopes
        .iter()
        .map(|(k, v)| (k.clone(), *v as f64 * decay))
        .collect();
    (categories, scopes)
}

/// Per-ambition-level completed/total; `None` when total < 2 (too little
/// data to trust).
pub fn compute_per_ambition_success_rates(history: &DrillHistoryFile) -> HashMap<AmbitionLevel, Option<f64>> {
    let mut completed: HashMap<u8, u32> = HashMap::new();
    let mut total: HashMap<u8, u32> = HashMap::new();
    let key = |level: AmbitionLevel| -> u8 {
        match level {
            AmbitionLevel::Conservative => 0,
            AmbitionLevel::Moderate => 1,
            AmbitionLevel::Ambitious => 2,
        }
    };
    for entry in &history.entries {
        let Some(level) = entry.ambition_level else { continue };
        let k = key(level);
        *total.entry(k).or_insert(0) += 1;
        if entry.outcome == DrillOutcome::Completed {
            *completed.entry(k).or_insert(0) += 1;
        }
    }
    [AmbitionLevel::Conservative, AmbitionLevel::Moderate, AmbitionLevel::Ambitious]
        .into_iter()
        .map(|level| {
            let k = key(level);
            let t = total.get(&k).copied().unwrap_or(0);
            let rate = if t < 2 {
                None
            } else {
                Some(f64::from(completed.get(&k).copied().unwrap_or(0)) / f64::from(t))
            };
            (level, rate)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DrillHistoryEntry;

    fn entry(outcome: DrillOutcome, total: u32, completed: u32) -> DrillHistoryEntry {
        DrillHistoryEntry::new("t", "d", total, completed, total - completed, outcome, vec![], vec![], 0)
    }

    #[test]
    fn empty_history_all_zero_never_nan() {
        let history = DrillHistoryFile::default();
        assert_eq!(completion_rate(&history), 0.0);
        assert_eq!(weighted_completion_rate(&history), 0.0);
        assert_eq!(step1_failure_rate(&history), 0.0);
        assert!(top_categories(&history).is_empty());
    }

    #[test]
    fn uniformly_completed_weighted_rate_is_one() {
        let mut history = DrillHistoryFile::default();
        for _ in 0..6 {
            history.entries.push(entry(DrillOutcome::Completed, 3, 3));
        }
        assert!((weighted_completion_rate(&history) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn recency_bias_stalls_then_completes_beats_plain_rate() {
        let mut history = DrillHistoryFile::default();
        for _ in 0..3 {
            history.entries.push(entry(DrillOutcome::Stalled, 3, 0));
        }
        for _ in 0..3 {
            history.entries.push(entry(DrillOutcome::Completed, 3, 3));
        }
        assert!(weighted_completion_rate(&history) > completion_rate(&history));

        let mut reversed = DrillHistoryFile::default();
        for _ in 0..3 {
            reversed.entries.push(entry(DrillOutcome::Completed, 3, 3));
        }
        for _ in 0..3 {
            reversed.entries.push(entry(DrillOutcome::Stalled, 3, 0));
        }
        assert!(weighted_completion_rate(&reversed) < completion_rate(&reversed));
    }

    #[test]
    fn step1_failure_rate_counts_only_stalled_with_zero_completed() {
        let mut history = DrillHistoryFile::default();
        history.entries.push(entry(DrillOutcome::Stalled, 3, 0));
        history.entries.push(entry(DrillOutcome::Stalled, 3, 1));
        history.entries.push(entry(DrillOutcome::Completed, 3, 3));
        assert!((step1_failure_rate(&history) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn per_ambition_success_none_below_two_samples() {
        let mut history = DrillHistoryFile::default();
        let mut e = entry(DrillOutcome::Completed, 3, 3);
        e.ambition_level = Some(AmbitionLevel::Ambitious);
        history.entries.push(e);
        let rates = compute_per_ambition_success_rates(&history);
        assert_eq!(rates[&AmbitionLevel::Ambitious], None);
    }
}
