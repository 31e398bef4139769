use crate::config::OracleSettings;
use crate::evolution::Candidate;
use crate::executor::{SandboxError, SandboxExecutor};
use crate::mutation::Mutant;
use crate::testcase::TestCase;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle is not configured")]
    NotConfigured,
    #[error("Oracle command failed: {0}")]
    Command(String),
    #[error("Oracle timed out after {0:?}")]
    Timeout(Duration),
    #[error("Oracle request could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Oracle sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// A question put to a candidate-generation oracle.
///
/// Requests serialize to JSON objects tagged by `kind`, which is what
/// [`CommandOracle`] writes to the external generator's stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleRequest<'a> {
    /// `size` fresh candidate inputs with expected outputs for `code`.
    InitialPopulation { code: &'a str, size: usize },
    /// One child combining traits of two parents.
    Crossover {
        code: &'a str,
        first: &'a Candidate,
        second: &'a Candidate,
    },
    /// One variant of `parent` aimed at executing `uncovered_lines`.
    FeedbackMutation {
        code: &'a str,
        parent: &'a Candidate,
        uncovered_lines: Vec<usize>,
    },
    /// `count` plausible faulty variants of the reference solution.
    Mutants { code: &'a str, count: usize },
    /// One case on which `mutant` and the reference `code` disagree.
    DiscriminatingCase {
        code: &'a str,
        mutant: &'a Mutant,
        tests: &'a [TestCase],
    },
}

impl OracleRequest<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            OracleRequest::InitialPopulation { .. } => "initial_population",
            OracleRequest::Crossover { .. } => "crossover",
            OracleRequest::FeedbackMutation { .. } => "feedback_mutation",
            OracleRequest::Mutants { .. } => "mutants",
            OracleRequest::DiscriminatingCase { .. } => "discriminating_case",
        }
    }
}

/// Produces free-text answers to [`OracleRequest`]s.
///
/// Answers are untrusted. Callers run them through the `parse_*` functions in
/// this module, which treat anything malformed as an empty result.
pub trait CandidateOracle {
    fn name(&self) -> &'static str;

    /// Returns the oracle's raw answer to `request`.
    fn generate(&mut self, request: &OracleRequest<'_>) -> Result<String, OracleError>;
}

/// Oracle backed by an external command. Each request is written to the
/// command's stdin as one JSON object; its stdout is the answer.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    command: Vec<String>,
    timeout: Duration,
    executor: SandboxExecutor,
}

impl CommandOracle {
    pub fn new(settings: &OracleSettings, executor: SandboxExecutor) -> Self {
        Self {
            command: settings.command.clone(),
            timeout: settings.timeout(),
            executor,
        }
    }
}

impl CandidateOracle for CommandOracle {
    fn name(&self) -> &'static str {
        "CommandOracle"
    }

    fn generate(&mut self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        if self.command.is_empty() {
            return Err(OracleError::NotConfigured);
        }
        let payload = serde_json::to_vec(request)?;
        debug!(kind = request.kind(), bytes = payload.len(), "querying oracle command");
        let result = self
            .executor
            .run_command(&self.command, None, &payload, self.timeout, None)?;
        if result.timed_out {
            return Err(OracleError::Timeout(self.timeout));
        }
        if !result.success() {
            let detail = result.error_line().unwrap_or("no diagnostic output").to_string();
            return Err(OracleError::Command(detail));
        }
        Ok(result.stdout)
    }
}

/// Extracts a JSON value from free text.
///
/// Tries, in order: a fenced ```json block, the whole text, then the outermost
/// `[...]` or `{...}` span.
pub fn extract_json(text: &str) -> Option<JsonValue> {
    if let Some(block) = fenced_block(text, "json") {
        if let Ok(value) = serde_json::from_str(block.trim()) {
            return Some(value);
        }
    }
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Unwraps a ```python (or bare ```) fenced block; returns the text unchanged
/// when there is no fence.
pub fn extract_code_block(text: &str) -> String {
    fenced_block(text, "python")
        .or_else(|| fenced_block(text, "py"))
        .or_else(|| fenced_block(text, ""))
        .unwrap_or(text)
        .trim_matches('\n')
        .to_string()
}

fn fenced_block<'t>(text: &'t str, language: &str) -> Option<&'t str> {
    let opener = format!("```{language}");
    let start = text.find(&opener)? + opener.len();
    let rest = &text[start..];
    let body_start = rest.find('\n')? + 1;
    let body = &rest[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn text_of(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn candidate_from_json(value: &JsonValue) -> Option<Candidate> {
    match value {
        JsonValue::Array(pair) if pair.len() == 2 => Some(Candidate::new(text_of(&pair[0]), text_of(&pair[1]))),
        JsonValue::Object(map) => {
            let input = map.get("input")?;
            let output = map.get("output").or_else(|| map.get("expected"))?;
            Some(Candidate::new(text_of(input), text_of(output)))
        }
        _ => None,
    }
}

/// Parses a list of candidates. Malformed entries are skipped.
pub fn parse_population(text: &str) -> Vec<Candidate> {
    match extract_json(text) {
        Some(JsonValue::Array(items)) => {
            let parsed: Vec<Candidate> = items.iter().filter_map(candidate_from_json).collect();
            if parsed.is_empty() {
                candidate_from_json(&JsonValue::Array(items)).into_iter().collect()
            } else {
                parsed
            }
        }
        Some(JsonValue::Object(map)) => match map.get("candidates").or_else(|| map.get("tests")) {
            Some(JsonValue::Array(items)) => items.iter().filter_map(candidate_from_json).collect(),
            _ => candidate_from_json(&JsonValue::Object(map)).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

/// Parses a single candidate; a list answer yields its first valid entry.
pub fn parse_candidate(text: &str) -> Option<Candidate> {
    match extract_json(text)? {
        JsonValue::Array(items) => {
            if items.iter().any(|item| item.is_object() || item.is_array()) {
                items.iter().find_map(candidate_from_json)
            } else {
                candidate_from_json(&JsonValue::Array(items))
            }
        }
        other => candidate_from_json(&other),
    }
}

/// Parses mutants. Each entry is either a mutant or the reason it was rejected.
pub fn parse_mutants(text: &str) -> Vec<Result<Mutant, String>> {
    let items = match extract_json(text) {
        Some(JsonValue::Array(items)) => items,
        Some(JsonValue::Object(mut map)) => match map.remove("mutants") {
            Some(JsonValue::Array(items)) => items,
            _ => vec![JsonValue::Object(map)],
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let code = match item {
                JsonValue::String(code) => code.as_str(),
                JsonValue::Object(map) => map
                    .get("code")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| format!("entry {i} has no code"))?,
                _ => return Err(format!("entry {i} is not an object")),
            };
            let code = extract_code_block(code);
            if code.trim().is_empty() {
                return Err(format!("entry {i} has empty code"));
            }
            let description = item
                .get("description")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("mutant #{}", i + 1));
            Ok(Mutant { description, code })
        })
        .collect()
}
