//! A minimal, deterministic, hand-rolled YAML dialect for trajectories.
//!
//! This is deliberately not a generic `serde_yaml` mapping: the engine's
//! documented parse-leniency rules (drop empty-id steps, tolerate
//! comma-separated inline lists, require all three measurement fields
//! together) and serialize-quoting rules (quote on `:`, `#`, leading `-`,
//! or leading whitespace) are bespoke enough that a general YAML library
//! would fight them rather than express them directly.

use tracing::warn;

use crate::domain::{Direction, Measurement, Step, Trajectory};

/// Quote `s` if it contains `:`, `#`, starts with `-`, or starts with
/// whitespace; otherwise return it unquoted. Quoting escapes embedded
/// double quotes and backslashes.
fn quote_if_needed(s: &str) -> String {
    let needs_quote = s.is_empty()
        || s.contains(':')
        || s.contains('#')
        || s.starts_with('-')
        || s.starts_with(' ')
        || s.starts_with('\t');
    if !needs_quote {
        return s.to_string();
    }
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Parse a single scalar token: strips a surrounding quote pair (unescaping
/// `\"` and `\\`) or returns the trimmed raw text.
fn parse_scalar(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        out
    } else {
        raw.to_string()
    }
}

/// Split a comma-separated inline list (optionally bracketed) into scalars.
/// `[]` and empty strings produce an empty vec.
fn parse_inline_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let inner = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')).unwrap_or(raw);
    let inner = inner.trim();
    if inner.is_empty() {
        return Vec::new();
    }
    inner.split(',').map(|part| parse_scalar(part.trim())).collect()
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ').count()
}

fn is_blank_or_comment(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

/// key/value split on the first top-level colon (":" followed by a space,
/// or end of line - good enough for this bespoke dialect since quoted
/// values are never split across this boundary in the documents we emit).
fn split_key_value(content: &str) -> (String, String) {
    match content.find(':') {
        Some(idx) => {
            let key = content[..idx].trim().to_string();
            let value = content[idx + 1..].trim().to_string();
            (key, value)
        }
        None => (content.trim().to_string(), String::new()),
    }
}

struct Line<'a> {
    indent: usize,
    content: &'a str,
}

fn collect_lines(input: &str) -> Vec<Line<'_>> {
    input
        .lines()
        .filter(|l| !is_blank_or_comment(l))
        .map(|l| Line {
            indent: indent_of(l),
            content: l.trim(),
        })
        .collect()
}

/// Parse an integer that must be non-negative; any other value (negative,
/// non-numeric) is treated as invalid and dropped by the caller.
fn parse_non_negative(raw: &str) -> Option<u32> {
    raw.parse::<i64>().ok().filter(|v| *v >= 0).map(|v| v as u32)
}

/// Parse trajectory YAML per the engine's documented leniency rules.
/// Never fails: a malformed document degrades toward an empty trajectory
/// rather than returning an error, matching the pure-function contract.
pub fn parse_trajectory_yaml(input: &str) -> Trajectory {
    let lines = collect_lines(input);
    let mut name = String::new();
    let mut description = String::new();
    let mut steps: Vec<Step> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if line.indent != 0 {
            i += 1;
            continue;
        }
        let (key, value) = split_key_value(line.content);
        match key.as_str() {
            "name" => {
                name = parse_scalar(&value);
                i += 1;
            }
            "description" => {
                description = parse_scalar(&value);
                i += 1;
            }
            "steps" => {
                i += 1;
                // Each top-level list item is introduced by a "- " line at
                // indent >= 2; its fields are key/value lines at a deeper
                // indent until the next "- " at the same indent or a
                // shallower line.
                let mut item_indent: Option<usize> = None;
                while i < lines.len() && lines[i].indent > 0 {
                    let l = &lines[i];
                    if !l.content.starts_with("- ") && l.content != "-" {
                        // Not a new list item and not nested under one we
                        // already started capturing; stop.
                        if item_indent.is_none() {
                            break;
                        }
                    }
                    if l.content.starts_with('-') {
                        if item_indent.is_none() {
                            item_indent = Some(l.indent);
                        } else if l.indent != item_indent.unwrap() {
                            // Shallower than the steps list: done.
                            if l.indent < item_indent.unwrap() {
                                break;
                            }
                        }
                        let first_field = l.content.trim_start_matches('-').trim();
                        let field_indent = l.indent + 2;
                        let step = parse_step_item(first_field, field_indent, &lines, &mut i);
                        if step.id.trim().is_empty() {
                            warn!("parse_trajectory_yaml: dropping step with empty id");
                        } else {
                            steps.push(step);
                        }
                        continue;
                    }
                    break;
                }
            }
            _ => {
                i += 1;
            }
        }
    }

    Trajectory { name, description, steps }
}

/// Parse one `steps` list item. `first_field` is the `key: value` text that
/// followed the leading `-`; `field_indent` is the indent subsequent
/// key/value lines for this item are expected at. Advances `*i` past the
/// lines consumed (the caller's index still points at the `- ...` line on
/// entry).
fn parse_step_item(first_field: &str, field_indent: usize, lines: &[Line<'_>], i: &mut usize) -> Step {
    let mut step = Step::new(String::new(), String::new());
    let mut saw_measurement_cmd = None;
    let mut saw_measurement_target = None;
    let mut saw_measurement_direction = None;

    let mut consume_kv = |key: &str, value: &str, lines: &[Line<'_>], i: &mut usize, indent: usize| {
        match key {
            "id" => step.id = parse_scalar(value),
            "title" => step.title = parse_scalar(value),
            "description" => step.description = parse_scalar(value),
            "scope" => {
                let v = parse_scalar(value);
                step.scope = if v.is_empty() { None } else { Some(v) };
            }
            "categories" => step.categories = read_list(value, indent + 2, lines, i),
            "acceptance_criteria" => step.acceptance_criteria = read_list(value, indent + 2, lines, i),
            "verification_commands" => step.verification_commands = read_list(value, indent + 2, lines, i),
            "depends_on" => step.depends_on = read_list(value, indent + 2, lines, i),
            "max_retries" => step.max_retries = parse_non_negative(value.trim()),
            "priority" => step.priority = value.trim().parse::<i64>().ok(),
            "measurement" => {
                read_measurement(
                    indent + 2,
                    lines,
                    i,
                    &mut saw_measurement_cmd,
                    &mut saw_measurement_target,
                    &mut saw_measurement_direction,
                );
            }
            _ => {}
        }
    };

    let (k0, v0) = split_key_value(first_field);
    consume_kv(&k0, &v0, lines, i, field_indent);
    *i += 1;

    while *i < lines.len() && lines[*i].indent >= field_indent {
        let l = &lines[*i];
        if l.indent > field_indent {
            // Orphaned nested content already consumed by a list/mapping
            // reader; skip defensively.
            *i += 1;
            continue;
        }
        if l.content.starts_with('-') {
            // Back out: this is the next steps-list item.
            break;
        }
        let (k, v) = split_key_value(l.content);
        consume_kv(&k, &v, lines, i, field_indent);
        *i += 1;
    }

    if let (Some(cmd), Some(target), Some(direction)) =
        (saw_measurement_cmd, saw_measurement_target, saw_measurement_direction)
    {
        step.measurement = Some(Measurement { cmd, target, direction });
    }

    step
}

/// Read a list value: either inline (on `value`) or, if `value` is empty,
/// as a block of `- item` lines at `indent`.
fn read_list(value: &str, indent: usize, lines: &[Line<'_>], i: &mut usize) -> Vec<String> {
    if !value.trim().is_empty() {
        return parse_inline_list(value);
    }
    let mut out = Vec::new();
    while *i < lines.len() && lines[*i].indent >= indent && lines[*i].content.starts_with('-') {
        let item = lines[*i].content.trim_start_matches('-').trim();
        out.push(parse_scalar(item));
        *i += 1;
    }
    out
}

fn read_measurement(
    indent: usize,
    lines: &[Line<'_>],
    i: &mut usize,
    cmd: &mut Option<String>,
    target: &mut Option<f64>,
    direction: &mut Option<Direction>,
) {
    while *i < lines.len() && lines[*i].indent >= indent {
        let (k, v) = split_key_value(lines[*i].content);
        match k.as_str() {
            "cmd" => *cmd = Some(parse_scalar(&v)),
            "target" => *target = v.trim().parse::<f64>().ok(),
            "direction" => {
                *direction = match parse_scalar(&v).as_str() {
                    "up" => Some(Direction::Up),
                    "down" => Some(Direction::Down),
                    _ => None,
                }
            }
            _ => {}
        }
        *i += 1;
    }
}

/// Serialize a trajectory to the same bespoke dialect [`parse_trajectory_yaml`]
/// consumes. `serialize` then `parse` is the identity for any trajectory
/// whose strings do not contain newlines.
pub fn serialize_trajectory_yaml(trajectory: &Trajectory) -> String {
    let mut out = String::new();
    out.push_str(&format!("name: {}\n", quote_if_needed(&trajectory.name)));
    out.push_str(&format!("description: {}\n", quote_if_needed(&trajectory.description)));
    out.push_str("steps:\n");
    for step in &trajectory.steps {
        out.push_str(&format!("  - id: {}\n", quote_if_needed(&step.id)));
        out.push_str(&format!("    title: {}\n", quote_if_needed(&step.title)));
        out.push_str(&format!("    description: {}\n", quote_if_needed(&step.description)));
        if let Some(scope) = &step.scope {
            out.push_str(&format!("    scope: {}\n", quote_if_needed(scope)));
        }
        write_list(&mut out, "categories", &step.categories, 4);
        write_list(&mut out, "acceptance_criteria", &step.acceptance_criteria, 4);
        write_list(&mut out, "verification_commands", &step.verification_commands, 4);
        write_list(&mut out, "depends_on", &step.depends_on, 4);
        if let Some(mr) = step.max_retries {
            out.push_str(&format!("    max_retries: {mr}\n"));
        }
        if let Some(p) = step.priority {
            out.push_str(&format!("    priority: {p}\n"));
        }
        if let Some(m) = &step.measurement {
            out.push_str("    measurement:\n");
            out.push_str(&format!("      cmd: {}\n", quote_if_needed(&m.cmd)));
            out.push_str(&format!("      target: {}\n", m.target));
            let dir = match m.direction {
                Direction::Up => "up",
                Direction::Down => "down",
            };
            out.push_str(&format!("      direction: {dir}\n"));
        }
    }
    out
}

fn write_list(out: &mut String, key: &str, items: &[String], indent: usize) {
    let pad = " ".repeat(indent);
    if items.is_empty() {
        out.push_str(&format!("{pad}{key}: []\n"));
        return;
    }
    out.push_str(&format!("{pad}{key}:\n"));
    for item in items {
        out.push_str(&format!("{pad}  - {}\n", quote_if_needed(item)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple_trajectory() {
        let trajectory = Trajectory {
            name: "my-trajectory".into(),
            description: "a plain description".into(),
            steps: vec![Step {
                id: "step-1".into(),
                title: "Do the thing".into(),
                description: "details".into(),
                scope: Some("src/foo/**".into()),
                categories: vec!["refactor".into(), "cleanup".into()],
                acceptance_criteria: vec!["criterion one".into()],
                verification_commands: vec!["cargo test".into()],
                depends_on: vec![],
                max_retries: Some(3),
                priority: Some(5),
                measurement: Some(Measurement {
                    cmd: "wc -l src/foo.rs".into(),
                    target: 100.0,
                    direction: Direction::Down,
                }),
            }],
        };
        let yaml = serialize_trajectory_yaml(&trajectory);
        let parsed = parse_trajectory_yaml(&yaml);
        assert_eq!(parsed, trajectory);
    }

    #[test]
    fn round_trip_with_colon_in_description() {
        let trajectory = Trajectory::new("t", "cleanup: remove dead code");
        let yaml = serialize_trajectory_yaml(&trajectory);
        assert!(yaml.contains("description: \"cleanup: remove dead code\""));
        let parsed = parse_trajectory_yaml(&yaml);
        assert_eq!(parsed.description, trajectory.description);
    }

    #[test]
    fn drops_step_with_empty_id() {
        let yaml = "name: t\ndescription: d\nsteps:\n  - id: \"\"\n    title: ghost\n  - id: real\n    title: Real\n";
        let parsed = parse_trajectory_yaml(yaml);
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.steps[0].id, "real");
    }

    #[test]
    fn measurement_requires_all_three_fields() {
        let yaml = "name: t\ndescription: d\nsteps:\n  - id: s1\n    title: S1\n    measurement:\n      cmd: echo 1\n      target: 1\n";
        let parsed = parse_trajectory_yaml(yaml);
        assert!(parsed.steps[0].measurement.is_none());
    }

    #[test]
    fn inline_comma_separated_list() {
        let yaml = "name: t\ndescription: d\nsteps:\n  - id: s1\n    title: S1\n    categories: refactor, cleanup\n";
        let parsed = parse_trajectory_yaml(yaml);
        assert_eq!(parsed.steps[0].categories, vec!["refactor", "cleanup"]);
    }

    #[test]
    fn invalid_max_retries_is_dropped() {
        let yaml = "name: t\ndescription: d\nsteps:\n  - id: s1\n    title: S1\n    max_retries: -2\n";
        let parsed = parse_trajectory_yaml(yaml);
        assert_eq!(parsed.steps[0].max_retries, None);
    }

    #[test]
    fn empty_list_key_defaults_to_empty_array() {
        let yaml = "name: t\ndescription: d\nsteps:\n  - id: s1\n    title: S1\n    depends_on: []\n";
        let parsed = parse_trajectory_yaml(yaml);
        assert!(parsed.steps[0].depends_on.is_empty());
    }

    #[test]
    fn quote_if_needed_quotes_leading_dash_and_hash() {
        assert!(quote_if_needed("-leading").starts_with('"'));
        assert!(quote_if_needed("has # hash").starts_with('"'));
        assert_eq!(quote_if_needed("plain"), "plain");
    }
}
