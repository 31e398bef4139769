use crate::value::{Value, parse_literal};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Why a case is in the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaseKind {
    #[default]
    Normal,
    Edge,
    Exception,
    /// Added by the mutation loop to kill a surviving mutant.
    MutationKiller,
}

/// One input/expected pair. Both sides are either text or structured JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default = "empty_input")]
    pub input: JsonValue,
    #[serde(alias = "output")]
    pub expected: JsonValue,
    #[serde(default)]
    pub kind: CaseKind,
}

fn empty_input() -> JsonValue {
    JsonValue::String(String::new())
}

impl TestCase {
    pub fn new(input: impl Into<JsonValue>, expected: impl Into<JsonValue>) -> Self {
        Self {
            input: input.into(),
            expected: expected.into(),
            kind: CaseKind::Normal,
        }
    }

    pub fn with_kind(mut self, kind: CaseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Renders the input as standard input for a whole-text run.
    ///
    /// Text gets a trailing newline. A flat array becomes one element per
    /// line and an array of arrays one space-separated row per line.
    pub fn stdin_text(&self) -> String {
        let mut text = match &self.input {
            JsonValue::String(s) => s.clone(),
            JsonValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    JsonValue::Array(row) => row.iter().map(scalar_text).collect::<Vec<_>>().join(" "),
                    other => scalar_text(other),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            other => scalar_text(other),
        };
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text
    }

    /// Expected answer as text, for whole-text comparison.
    pub fn expected_text(&self) -> String {
        match &self.expected {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Expected answer as a value, for entry-point comparison.
    pub fn expected_value(&self) -> Value {
        match &self.expected {
            JsonValue::String(s) => parse_literal(&normalize_text(s)),
            other => Value::from_json(other),
        }
    }

    pub fn input_text(&self) -> String {
        match &self.input {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Unifies line endings, trims every line and drops trailing blank lines.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.split('\n').map(str::trim).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
