// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Label names, label sets and stream identity.
//!
//! A [`LabelName`] can only be obtained through [`LabelName::sanitize`] (for
//! names derived from document paths) or [`LabelName::parse`] (for names
//! supplied by an operator or an adapter, which are validated rather than
//! rewritten). Either way the name only contains `[A-Za-z0-9_]` and never
//! starts with a digit.
//!
//! A [`LabelSet`] is stored unordered. Its identity on the wire and as a
//! grouping key is the [`StreamKey`], which sorts the labels by name:
//!
//! ```text
//! {__aws_log_type="s3_lb", env="prod"}
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Path separator used by the flattening engine.
pub const PATH_SEPARATOR: &str = ".";

/// Replacement for [`PATH_SEPARATOR`] in label names.
pub const SANITIZED_SEPARATOR: &str = "__";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("label name must not be empty")]
    EmptyName,
    #[error("invalid label name '{0}': only [A-Za-z0-9_] is allowed and it must not start with a digit")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelName(String);

impl LabelName {
    /// Turns a raw document path into a wire-safe label name.
    ///
    /// `-` becomes `_` and the path separator `.` becomes `__`. Any other
    /// character outside `[A-Za-z0-9_]` is replaced by `_`, and a leading
    /// digit is prefixed with `_`. Returns `None` for an empty path.
    #[must_use]
    pub fn sanitize(path: &str) -> Option<Self> {
        if path.is_empty() {
            return None;
        }
        let mut name = String::with_capacity(path.len() + 2);
        if path.starts_with(|c: char| c.is_ascii_digit()) {
            name.push('_');
        }
        for c in path.chars() {
            match c {
                '.' => name.push_str(SANITIZED_SEPARATOR),
                '-' => name.push('_'),
                c if is_label_char(c) => name.push(c),
                _ => name.push('_'),
            }
        }
        Some(LabelName(name))
    }

    /// Validates a name without rewriting it.
    pub fn parse(name: &str) -> Result<Self, LabelError> {
        if name.is_empty() {
            return Err(LabelError::EmptyName);
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) || !name.chars().all(is_label_char) {
            return Err(LabelError::InvalidName(name.to_string()));
        }
        Ok(LabelName(name.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for LabelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LabelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Unordered mapping of label names to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: HashMap<LabelName, String>,
}

impl LabelSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from operator or adapter supplied pairs, validating every name.
    pub fn try_from_pairs<N, V, I>(pairs: I) -> Result<Self, LabelError>
    where
        N: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (N, V)>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.insert(LabelName::parse(name.as_ref())?, value);
        }
        Ok(set)
    }

    /// Inserts a label, replacing any previous value for the same name.
    pub fn insert(&mut self, name: LabelName, value: impl Into<String>) {
        self.labels.insert(name, value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LabelName, &str)> {
        self.labels.iter().map(|(n, v)| (n, v.as_str()))
    }

    /// Right-biased union: on a name collision `other` wins.
    #[must_use]
    pub fn merge(&self, other: &LabelSet) -> LabelSet {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// In-place variant of [`LabelSet::merge`].
    pub fn merge_from(&mut self, other: &LabelSet) {
        for (name, value) in &other.labels {
            self.labels.insert(name.clone(), value.clone());
        }
    }

    /// Labels sorted by name.
    #[must_use]
    pub fn sorted(&self) -> Vec<(&LabelName, &str)> {
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
        pairs
    }

    /// Canonical identity of this set, independent of insertion order.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        let rendered = self
            .sorted()
            .into_iter()
            .map(|(name, value)| format!("{name}={}", quote(value)))
            .collect::<Vec<_>>()
            .join(", ");
        StreamKey(format!("{{{rendered}}}"))
    }
}

impl FromIterator<(LabelName, String)> for LabelSet {
    fn from_iter<T: IntoIterator<Item = (LabelName, String)>>(iter: T) -> Self {
        LabelSet {
            labels: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stream_key().as_str())
    }
}

/// Sorted `{name="value", ...}` rendering of a [`LabelSet`].
///
/// Also the `labels` string of a stream on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey(String);

impl StreamKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Double-quoted string literal as understood by LogQL label matchers.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if c.is_control() => quoted.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
