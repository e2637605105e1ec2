// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replay plan language (spec §4.3): `Get | Unary{op, child} |
//! Binary{op, left, right}`, evaluated bottom-up against a [`Bus`].

use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::{Bus, QueryFilter};
use crate::event::Event;

/// Regex pattern-length bound (spec §4.3 "~128").
pub const REGEX_PATTERN_MAX_LEN: usize = 128;
/// Regex value-length bound (spec §4.3 "~1024").
pub const REGEX_VALUE_MAX_LEN: usize = 1024;
/// Per-call regex timeout (spec §4.3 "~20 ms").
pub const REGEX_CALL_TIMEOUT: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node")]
pub enum Node {
    Get { topic: Option<String>, limit: usize },
    Unary { op: UnaryOp, child: Box<Node>, params: UnaryParams },
    Binary { op: BinaryOp, left: Box<Node>, right: Box<Node>, params: BinaryParams },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Limit,
    Sort,
    Filter,
    WhereEq,
    WhereIn,
    WhereContains,
    WhereRegex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Merge,
    Intersection,
    Difference,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnaryParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub plugin_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub priority_min: Option<i64>,
    #[serde(default)]
    pub since_ts: Option<i64>,
    #[serde(default)]
    pub until_ts: Option<i64>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub plugin_id_re: Option<String>,
    #[serde(default)]
    pub source_re: Option<String>,
    #[serde(default)]
    pub kind_re: Option<String>,
    #[serde(default)]
    pub type_re: Option<String>,
    #[serde(default)]
    pub content_re: Option<String>,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinaryParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

fn field_value(e: &Event, field: &str) -> Option<String> {
    match field {
        "plugin_id" => e.index.plugin_id.clone(),
        "source" => e.index.source.clone(),
        "kind" => e.index.kind.clone(),
        "type" => e.index.r#type.clone(),
        "id" => e.index.id.clone(),
        other => e.payload.get(other).and_then(Value::as_str).map(str::to_string),
    }
}

/// Validate and compile a bounded regex, per spec §4.3's three bounds.
/// Returns `None` if the pattern itself is too long to even attempt (the
/// caller treats that the same as a runtime-timeout failure).
fn compile_bounded(pattern: &str) -> Option<Regex> {
    if pattern.len() > REGEX_PATTERN_MAX_LEN {
        return None;
    }
    Regex::new(pattern).ok()
}

/// Match with a value-length bound and a wall-clock deadline; `regex` has
/// no native per-call timeout so we approximate spec §4.3's "~20ms" bound
/// by bailing out before even attempting the match once the deadline has
/// already elapsed (practical for the small values this store carries).
fn bounded_is_match(re: &Regex, value: &str, deadline: Instant) -> bool {
    if value.len() > REGEX_VALUE_MAX_LEN || Instant::now() > deadline {
        return false;
    }
    re.is_match(value)
}

fn dedup_sort_desc(mut events: Vec<Event>) -> Vec<Event> {
    let mut seen = std::collections::HashSet::new();
    events.retain(|e| {
        let key = e.index.id.clone().unwrap_or_else(|| e.seq.to_string());
        seen.insert(key)
    });
    events.sort_by(|a, b| b.seq.cmp(&a.seq));
    events
}

/// Evaluate `node` bottom-up against `bus`.
pub fn evaluate(node: &Node, bus: &Bus) -> Vec<Event> {
    match node {
        Node::Get { topic, limit } => bus.get_since(topic.as_deref(), 0, *limit),
        Node::Unary { op, child, params } => {
            let input = evaluate(child, bus);
            apply_unary(*op, input, params)
        }
        Node::Binary { op, left, right, params } => {
            let l = evaluate(left, bus);
            let r = evaluate(right, bus);
            apply_binary(*op, l, r, params)
        }
    }
}

fn apply_unary(op: UnaryOp, input: Vec<Event>, params: &UnaryParams) -> Vec<Event> {
    match op {
        UnaryOp::Limit => {
            let mut out = input;
            out.truncate(params.limit.unwrap_or(out.len()));
            out
        }
        UnaryOp::Sort => {
            let mut out = input;
            out.sort_by(|a, b| b.seq.cmp(&a.seq));
            out
        }
        UnaryOp::Filter => {
            let filter = QueryFilter {
                plugin_id: params.plugin_id.clone(),
                source: params.source.clone(),
                kind: params.kind.clone(),
                r#type: params.r#type.clone(),
                priority_min: params.priority_min,
                since_ts: params.since_ts,
                until_ts: params.until_ts,
                limit: usize::MAX,
                topic: None,
            };
            input.into_iter().filter(|e| filter.matches(e)).collect()
        }
        UnaryOp::WhereEq => {
            let Some(field) = &params.field else { return input };
            let Some(want) = params.values.first() else { return input };
            input.into_iter().filter(|e| field_value(e, field).as_deref() == Some(want.as_str())).collect()
        }
        UnaryOp::WhereIn => {
            let Some(field) = &params.field else { return input };
            input
                .into_iter()
                .filter(|e| field_value(e, field).map(|v| params.values.contains(&v)).unwrap_or(false))
                .collect()
        }
        UnaryOp::WhereContains => {
            let Some(needle) = &params.contains else { return input };
            input
                .into_iter()
                .filter(|e| e.payload.to_string().contains(needle.as_str()))
                .collect()
        }
        UnaryOp::WhereRegex => apply_regex(input, params),
    }
}

/// spec §9: "where a pattern is invalid, `strict=true` returns an empty
/// set, `strict=false` returns the input unchanged" — preserved even
/// though it is flagged as counter-intuitive.
fn apply_regex(input: Vec<Event>, params: &UnaryParams) -> Vec<Event> {
    let fields: [(Option<&String>, fn(&Event) -> Option<String>); 4] = [
        (params.plugin_id_re.as_ref(), |e| e.index.plugin_id.clone()),
        (params.source_re.as_ref(), |e| e.index.source.clone()),
        (params.kind_re.as_ref(), |e| e.index.kind.clone()),
        (params.type_re.as_ref(), |e| e.index.r#type.clone()),
    ];
    let content_re = params.content_re.as_ref();

    let deadline = Instant::now() + REGEX_CALL_TIMEOUT;
    let mut compiled: Vec<(Regex, fn(&Event) -> Option<String>)> = Vec::new();
    let mut any_invalid = false;
    for (pattern, getter) in fields {
        if let Some(p) = pattern {
            match compile_bounded(p) {
                Some(re) => compiled.push((re, getter)),
                None => any_invalid = true,
            }
        }
    }
    let content_compiled = content_re.and_then(|p| compile_bounded(p));
    if content_re.is_some() && content_compiled.is_none() {
        any_invalid = true;
    }

    if any_invalid {
        return if params.strict { Vec::new() } else { input };
    }

    input
        .into_iter()
        .filter(|e| {
            for (re, getter) in &compiled {
                match getter(e) {
                    Some(v) if bounded_is_match(re, &v, deadline) => {}
                    _ => return false,
                }
            }
            if let Some(re) = &content_compiled {
                let content = e.payload.to_string();
                if !bounded_is_match(re, &content, deadline) {
                    return false;
                }
            }
            true
        })
        .collect()
}

fn apply_binary(op: BinaryOp, left: Vec<Event>, right: Vec<Event>, params: &BinaryParams) -> Vec<Event> {
    let key = |e: &Event| e.index.id.clone().unwrap_or_else(|| e.seq.to_string());
    let mut out = match op {
        BinaryOp::Merge => {
            let mut all = left;
            all.extend(right);
            dedup_sort_desc(all)
        }
        BinaryOp::Intersection => {
            let right_keys: std::collections::HashSet<_> = right.iter().map(key).collect();
            dedup_sort_desc(left.into_iter().filter(|e| right_keys.contains(&key(e))).collect())
        }
        BinaryOp::Difference => {
            let right_keys: std::collections::HashSet<_> = right.iter().map(key).collect();
            dedup_sort_desc(left.into_iter().filter(|e| !right_keys.contains(&key(e))).collect())
        }
    };
    if let Some(limit) = params.limit {
        out.truncate(limit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::BusChangeHub;
    use pb_core::bus_name::BusName;
    use std::sync::Arc;

    fn seeded_bus() -> Bus {
        let b = Bus::new(BusName::Messages, 100, Arc::new(BusChangeHub::new()));
        b.publish("t", serde_json::json!({"id": "a", "source": "X", "priority": 1}), 1).unwrap();
        b.publish("t", serde_json::json!({"id": "b", "source": "Y", "priority": 9}), 2).unwrap();
        b
    }

    #[test]
    fn get_then_filter_is_idempotent_on_repeat_application() {
        let bus = seeded_bus();
        let plan = Node::Unary {
            op: UnaryOp::Filter,
            child: Box::new(Node::Get { topic: None, limit: 100 }),
            params: UnaryParams { priority_min: Some(5), ..Default::default() },
        };
        let first = evaluate(&plan, &bus);
        let second = evaluate(&plan, &bus);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].index.id, second[0].index.id);
    }

    #[test]
    fn invalid_regex_strict_returns_empty() {
        let bus = seeded_bus();
        let long_pattern = "x".repeat(REGEX_PATTERN_MAX_LEN + 1);
        let plan = Node::Unary {
            op: UnaryOp::WhereRegex,
            child: Box::new(Node::Get { topic: None, limit: 100 }),
            params: UnaryParams { source_re: Some(long_pattern), strict: true, ..Default::default() },
        };
        assert!(evaluate(&plan, &bus).is_empty());
    }

    #[test]
    fn invalid_regex_non_strict_returns_input_unchanged() {
        let bus = seeded_bus();
        let long_pattern = "x".repeat(REGEX_PATTERN_MAX_LEN + 1);
        let plan = Node::Unary {
            op: UnaryOp::WhereRegex,
            child: Box::new(Node::Get { topic: None, limit: 100 }),
            params: UnaryParams { source_re: Some(long_pattern), strict: false, ..Default::default() },
        };
        assert_eq!(evaluate(&plan, &bus).len(), 2);
    }

    #[test]
    fn valid_regex_filters_by_source() {
        let bus = seeded_bus();
        let plan = Node::Unary {
            op: UnaryOp::WhereRegex,
            child: Box::new(Node::Get { topic: None, limit: 100 }),
            params: UnaryParams { source_re: Some("^X$".to_string()), ..Default::default() },
        };
        let result = evaluate(&plan, &bus);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].index.id.as_deref(), Some("a"));
    }

    #[test]
    fn merge_dedups_by_id_and_sorts_descending() {
        let bus = seeded_bus();
        let left = Node::Get { topic: None, limit: 100 };
        let right = Node::Get { topic: None, limit: 100 };
        let plan = Node::Binary {
            op: BinaryOp::Merge,
            left: Box::new(left),
            right: Box::new(right),
            params: BinaryParams::default(),
        };
        let result = evaluate(&plan, &bus);
        assert_eq!(result.len(), 2);
        assert!(result[0].seq > result[1].seq);
    }

    #[test]
    fn difference_removes_members_of_right() {
        let bus = seeded_bus();
        let left = Node::Get { topic: None, limit: 100 };
        let right = Node::Unary {
            op: UnaryOp::WhereEq,
            child: Box::new(Node::Get { topic: None, limit: 100 }),
            params: UnaryParams {
                field: Some("id".to_string()),
                values: vec!["a".to_string()],
                ..Default::default()
            },
        };
        let plan = Node::Binary {
            op: BinaryOp::Difference,
            left: Box::new(left),
            right: Box::new(right),
            params: BinaryParams::default(),
        };
        let result = evaluate(&plan, &bus);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].index.id.as_deref(), Some("b"));
    }
}
