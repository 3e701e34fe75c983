// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flattening of structured log lines into labels.
//!
//! A JSON document is walked depth first. Object keys and array indices are
//! joined with `.` into a path, and every scalar leaf becomes one label named
//! after the sanitized path:
//!
//! ```text
//! {"httpRequest": {"country": "FR", "args": [1, null]}}
//!
//! httpRequest__country = "FR"
//! httpRequest__args__0 = "1"
//! httpRequest__args__1 = ""
//! ```
//!
//! Header lists in the `[{"name": ..., "value": ...}]` shape are folded so
//! each header surfaces under its own name (`headers__Content_Type`) instead
//! of its position in the list.
//!
//! Leaves are dropped when the value or the path is too long, or when the
//! path is on the deny-list: rule-engine diagnostic trees, request ids, and
//! noisy or credential-bearing request headers. Anything that is not a JSON
//! object or array yields no labels.

use serde_json::{Map, Value};

use crate::constants::{MAX_LABEL_PATH_LEN, MAX_LABEL_VALUE_LEN};
use crate::labels::{LabelName, LabelSet, PATH_SEPARATOR};

const HEADERS_SEGMENT: &str = "headers";
const HEADER_NAME_KEY: &str = "name";
const HEADER_VALUE_KEY: &str = "value";

/// Headers never turned into labels, compared case-insensitively.
const DENIED_HEADERS: [&str; 6] = [
    "Accept",
    "Accept-Encoding",
    "Accept-Language",
    "Cache-Control",
    "Authorization",
    "If-Modified-Since",
];

/// Subtrees holding per-rule evaluation details of WAF and firewall logs.
const DENIED_SUBTREES: [&str; 5] = [
    "ruleGroupList",
    "rateBasedRuleList",
    "nonTerminatingMatchingRules",
    "terminatingRuleMatchDetails",
    "excludedRules",
];

const REQUEST_ID_SEGMENT: &str = "requestId";

/// Flattens `text` into labels. Malformed input yields an empty set.
#[must_use]
pub fn flatten(text: &str) -> LabelSet {
    match serde_json::from_str::<Value>(text) {
        Ok(document) => flatten_value(&document),
        Err(_) => LabelSet::new(),
    }
}

/// Flattens an already parsed document.
#[must_use]
pub fn flatten_value(document: &Value) -> LabelSet {
    let mut labels = LabelSet::new();
    if document.is_object() || document.is_array() {
        let mut path = Vec::new();
        walk(document, &mut path, &mut labels);
    }
    labels
}

/// Merges the flattened labels of `text` over `base`; flattened labels win.
#[must_use]
pub fn merge_flattened(base: &LabelSet, text: &str) -> LabelSet {
    base.merge(&flatten(text))
}

fn walk(value: &Value, path: &mut Vec<String>, labels: &mut LabelSet) {
    match value {
        Value::Object(map) => {
            if let Some(container_len) = header_record_container(path, map) {
                fold_header_record(map, path, container_len, labels);
                return;
            }
            for (key, child) in map {
                path.push(key.clone());
                walk(child, path, labels);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                walk(child, path, labels);
                path.pop();
            }
        }
        Value::String(s) => emit(path, s, labels),
        Value::Number(n) => emit(path, &n.to_string(), labels),
        Value::Bool(b) => emit(path, if *b { "true" } else { "false" }, labels),
        Value::Null => emit(path, "", labels),
    }
}

/// If `map` is a `{name, value}` record of a header collection, returns the
/// length of the path prefix naming that collection.
fn header_record_container(path: &[String], map: &Map<String, Value>) -> Option<usize> {
    if !matches!(map.get(HEADER_NAME_KEY), Some(Value::String(_)))
        || !map.contains_key(HEADER_VALUE_KEY)
    {
        return None;
    }
    match path {
        [.., last] if last == HEADERS_SEGMENT => Some(path.len()),
        [.., parent, index] if parent == HEADERS_SEGMENT && is_index(index) => {
            Some(path.len() - 1)
        }
        _ => None,
    }
}

fn fold_header_record(
    map: &Map<String, Value>,
    path: &mut Vec<String>,
    container_len: usize,
    labels: &mut LabelSet,
) {
    let Some(Value::String(header_name)) = map.get(HEADER_NAME_KEY) else {
        return;
    };

    for (key, child) in map {
        match key.as_str() {
            HEADER_NAME_KEY => {}
            HEADER_VALUE_KEY => {
                let mut header_path = path[..container_len].to_vec();
                header_path.push(header_name.clone());
                walk(child, &mut header_path, labels);
            }
            _ => {
                path.push(key.clone());
                walk(child, path, labels);
                path.pop();
            }
        }
    }
}

fn emit(path: &[String], value: &str, labels: &mut LabelSet) {
    if value.chars().count() > MAX_LABEL_VALUE_LEN {
        return;
    }
    let joined = path.join(PATH_SEPARATOR);
    if joined.chars().count() > MAX_LABEL_PATH_LEN || is_denied(path) {
        return;
    }
    if let Some(name) = LabelName::sanitize(&joined) {
        labels.insert(name, value);
    }
}

fn is_denied(path: &[String]) -> bool {
    if path
        .iter()
        .any(|segment| DENIED_SUBTREES.contains(&segment.as_str()))
    {
        return true;
    }
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    if last == REQUEST_ID_SEGMENT {
        return true;
    }
    parents.iter().any(|segment| segment == HEADERS_SEGMENT)
        && DENIED_HEADERS
            .iter()
            .any(|header| header.eq_ignore_ascii_case(last))
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
