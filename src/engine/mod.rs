//! The Trajectory Engine (§4.1): pure functions over the step DAG.
//!
//! Every function here is total and side-effect free, per the documented
//! failure semantics - "pure functions do not fail." Logging is limited to
//! `debug!` breadcrumbs; nothing here returns `Result`.

mod yaml;

pub use yaml::{parse_trajectory_yaml, serialize_trajectory_yaml};

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::domain::{Step, StepState, StepStatus, Trajectory};

const DEFAULT_MAX_RETRIES: u32 = 3;

/// True iff every dependency of `step` resolves to a step whose status is
/// completed, skipped, or (deliberately) failed. Missing identifiers count
/// as unresolved. An empty dependency list is always ready.
pub fn step_ready(step: &Step, step_states: &HashMap<String, StepState>) -> bool {
    step.depends_on.iter().all(|dep_id| {
        step_states
            .get(dep_id)
            .map(|s| s.status.is_resolved())
            .unwrap_or(false)
    })
}

/// Every step that is pending or active AND ready, sorted by (priority
/// descending, declaration index ascending).
pub fn get_ready_steps<'t>(trajectory: &'t Trajectory, step_states: &HashMap<String, StepState>) -> Vec<&'t Step> {
    let mut ready: Vec<(usize, &Step)> = trajectory
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| {
            let status = step_states.get(&step.id).map(|s| s.status).unwrap_or(StepStatus::Pending);
            matches!(status, StepStatus::Pending | StepStatus::Active) && step_ready(step, step_states)
        })
        .collect();

    ready.sort_by(|(ia, a), (ib, b)| {
        let pa = a.priority.unwrap_or(0);
        let pb = b.priority.unwrap_or(0);
        pb.cmp(&pa).then(ia.cmp(ib))
    });

    ready.into_iter().map(|(_, step)| step).collect()
}

/// The head of [`get_ready_steps`], or `None`.
pub fn get_next_step<'t>(trajectory: &'t Trajectory, step_states: &HashMap<String, StepState>) -> Option<&'t Step> {
    get_ready_steps(trajectory, step_states).into_iter().next()
}

/// True iff every step is in a terminal state. An empty trajectory is
/// vacuously complete.
pub fn trajectory_complete(trajectory: &Trajectory, step_states: &HashMap<String, StepState>) -> bool {
    trajectory.steps.iter().all(|step| {
        step_states
            .get(&step.id)
            .map(|s| s.status.is_terminal())
            .unwrap_or(false)
    })
}

/// Stronger than [`trajectory_complete`]: every step is completed or
/// skipped - none failed.
pub fn trajectory_fully_succeeded(trajectory: &Trajectory, step_states: &HashMap<String, StepState>) -> bool {
    trajectory.steps.iter().all(|step| {
        matches!(
            step_states.get(&step.id).map(|s| s.status),
            Some(StepStatus::Completed) | Some(StepStatus::Skipped)
        )
    })
}

/// Scan active steps for the first one whose retry budget (or flakiness
/// threshold) has been exceeded. Returns the step id, or `None`.
pub fn trajectory_stuck(
    step_states: &HashMap<String, StepState>,
    default_max_retries: u32,
    steps: Option<&[Step]>,
) -> Option<String> {
    let limit_for = |id: &str| -> u32 {
        steps
            .and_then(|steps| steps.iter().find(|s| s.id == id))
            .and_then(|s| s.max_retries)
            .unwrap_or(default_max_retries)
    };

    let mut ids: Vec<&String> = step_states.keys().collect();
    ids.sort();
    for id in ids {
        let state = &step_states[id];
        if state.status != StepStatus::Active {
            continue;
        }
        let limit = limit_for(id);
        if state.cycles_attempted >= limit {
            debug!(step_id = %id, "trajectory_stuck: retry budget exceeded");
            return Some(id.clone());
        }
        if state.total_failures >= 2 * limit && state.consecutive_failures < limit {
            debug!(step_id = %id, "trajectory_stuck: flakiness detected");
            return Some(id.clone());
        }
    }
    None
}

/// Iterative DFS over the `depends_on` relation using a three-color
/// (white/gray/black) scheme, per the mandated "avoid unbounded recursion"
/// design note. Returns a node list witnessing a cycle (in traversal
/// order), or `None` if the graph is a DAG. Self-dependencies are detected.
pub fn detect_cycle(steps: &[Step]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: HashMap<&str, Color> = steps.iter().map(|s| (s.id.as_str(), Color::White)).collect();
    let by_id: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), s)).collect();

    for start in steps.iter().map(|s| s.id.as_str()) {
        if color.get(start) != Some(&Color::White) {
            continue;
        }
        // Explicit stack of (node, next dependency index to visit).
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        color.insert(start, Color::Gray);

        while let Some(&(node, idx)) = stack.last() {
            let deps = by_id.get(node).map(|s| s.depends_on.as_slice()).unwrap_or(&[]);
            if idx < deps.len() {
                let dep = deps[idx].as_str();
                stack.last_mut().unwrap().1 += 1;
                match color.get(dep).copied() {
                    Some(Color::White) => {
                        color.insert(dep, Color::Gray);
                        stack.push((dep, 0));
                    }
                    Some(Color::Gray) => {
                        // Back edge found: witness the cycle from dep's
                        // position on the stack to the top.
                        let mut witness: Vec<String> = Vec::new();
                        let mut started = false;
                        for (n, _) in stack.iter() {
                            if *n == dep {
                                started = true;
                            }
                            if started {
                                witness.push(n.to_string());
                            }
                        }
                        witness.push(dep.to_string());
                        debug!(?witness, "detect_cycle: cycle found");
                        return Some(witness);
                    }
                    _ => {}
                }
            } else {
                color.insert(node, Color::Black);
                stack.pop();
            }
        }
    }
    None
}

/// Given `module_edges[m] = modules m imports`, for each pair of steps
/// whose scopes map to distinct module sets, add a `depends_on` edge from
/// the importer's step to the importee's step only if doing so would not
/// close a cycle. Returns a new trajectory; never mutates the input.
pub fn enforce_graph_ordering(trajectory: &Trajectory, module_edges: &HashMap<String, HashSet<String>>) -> Trajectory {
    let mut out = trajectory.clone();

    // Map each step to the module(s) its scope glob touches, by simple
    // prefix containment against the module_edges keys.
    let step_modules: Vec<Vec<String>> = out
        .steps
        .iter()
        .map(|step| match &step.scope {
            Some(scope) => module_edges
                .keys()
                .filter(|m| scope.contains(m.as_str()) || m.contains(scope.as_str()))
                .cloned()
                .collect(),
            None => Vec::new(),
        })
        .collect();

    for i in 0..out.steps.len() {
        for j in 0..out.steps.len() {
            if i == j {
                continue;
            }
            let importer_imports_importee = step_modules[i]
                .iter()
                .any(|mi| step_modules[j].iter().any(|mj| module_edges.get(mi).map(|e| e.contains(mj)).unwrap_or(false)));
            if !importer_imports_importee {
                continue;
            }
            let importer_id = out.steps[i].id.clone();
            let importee_id = out.steps[j].id.clone();
            if out.steps[i].depends_on.contains(&importee_id) {
                continue;
            }
            let mut candidate = out.clone();
            candidate.steps[i].depends_on.push(importee_id.clone());
            if detect_cycle(&candidate.steps).is_none() {
                out = candidate;
            } else {
                debug!(%importer_id, %importee_id, "enforce_graph_ordering: rejected, would cycle");
            }
        }
    }
    out
}

/// Every step maps to a fresh, pending [`StepState`].
pub fn create_initial_step_states(trajectory: &Trajectory) -> HashMap<String, StepState> {
    trajectory
        .steps
        .iter()
        .map(|s| (s.id.clone(), StepState::initial()))
        .collect()
}

/// A structured prompt context block: Completed Steps / Current Step /
/// Upcoming Steps, matching the engine's documented three-section layout.
pub fn format_trajectory_for_prompt(
    trajectory: &Trajectory,
    step_states: &HashMap<String, StepState>,
    current_step: Option<&Step>,
) -> String {
    let mut out = String::new();

    out.push_str("## Completed Steps\n");
    let mut any_completed = false;
    for step in &trajectory.steps {
        if step_states.get(&step.id).map(|s| s.status) == Some(StepStatus::Completed) {
            any_completed = true;
            out.push_str(&format!("- [{}] {}\n", step.id, step.title));
        }
    }
    if !any_completed {
        out.push_str("(none yet)\n");
    }

    out.push_str("\n## Current Step\n");
    if let Some(step) = current_step {
        out.push_str(&format!("[{}] {}\n{}\n", step.id, step.title, step.description));
        if !step.depends_on.is_empty() {
            out.push_str(&format!("Depends on: {}\n", step.depends_on.join(", ")));
        }
        if let Some(m) = &step.measurement {
            out.push_str(&format!("Measure: `{}` {}\n", m.cmd, m.describe_target()));
        }
        if let Some(state) = step_states.get(&step.id) {
            if let Some(last) = &state.last_verification_output {
                out.push_str(&format!("Last verification output:\n{}\n", last));
            }
            if state.consecutive_failures >= 2 {
                out.push_str(&format!(
                    "(tried {} consecutive times, try a different approach)\n",
                    state.consecutive_failures
                ));
            }
        }
    } else {
        out.push_str("(none)\n");
    }

    out.push_str("\n## Upcoming Steps\n");
    let mut any_upcoming = false;
    for step in &trajectory.steps {
        let status = step_states.get(&step.id).map(|s| s.status).unwrap_or(StepStatus::Pending);
        let is_current = current_step.map(|c| c.id == step.id).unwrap_or(false);
        if status == StepStatus::Pending && !is_current {
            any_upcoming = true;
            let deps = if step.depends_on.is_empty() {
                String::new()
            } else {
                format!(" (depends on: {})", step.depends_on.join(", "))
            };
            out.push_str(&format!("- [{}] {}{}\n", step.id, step.title, deps));
        }
    }
    if !any_upcoming {
        out.push_str("(none)\n");
    }

    out
}
