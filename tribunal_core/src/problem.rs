use crate::judge::ForceMode;
use crate::testcase::TestCase;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read problem file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Problem file {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Problem has no coding_practice entries")]
    NoPractice,
    #[error("practice_idx {index} is out of range ({len} entries)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Problem has no examples")]
    NoExamples,
    #[error("Example {0} has no expected output")]
    MissingExpected(usize),
    #[error("Unknown force_mode '{0}'")]
    UnknownForceMode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Problem {
    pub title: String,
    pub description: String,
    pub tests: Vec<TestCase>,
    pub force_mode: Option<ForceMode>,
}

/// Loads practice `practice_idx` from a problem file.
pub fn load_problem(path: &Path, practice_idx: usize) -> Result<Problem, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let json: JsonValue = serde_json::from_str(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let problem = problem_from_json(&json, practice_idx)?;
    debug!(path = ?path, title = %problem.title, cases = problem.tests.len(), "loaded problem");
    Ok(problem)
}

/// Accepts `{coding_practice: [{title, description, examples}], force_mode}`
/// or a flat `{title, description, tests | examples, force_mode}`.
pub fn problem_from_json(json: &JsonValue, practice_idx: usize) -> Result<Problem, LoadError> {
    let force_mode = parse_force_mode(json.get("force_mode"))?;

    let entry = match json.get("coding_practice") {
        Some(JsonValue::Array(practices)) => {
            if practices.is_empty() {
                return Err(LoadError::NoPractice);
            }
            practices.get(practice_idx).ok_or(LoadError::IndexOutOfRange {
                index: practice_idx,
                len: practices.len(),
            })?
        }
        Some(_) => return Err(LoadError::NoPractice),
        None => json,
    };

    let examples = match entry.get("tests").or_else(|| entry.get("examples")) {
        Some(JsonValue::Array(items)) => items.clone(),
        Some(single @ JsonValue::Object(_)) => vec![single.clone()],
        _ => Vec::new(),
    };
    if examples.is_empty() {
        return Err(LoadError::NoExamples);
    }
    let tests = examples
        .iter()
        .enumerate()
        .map(|(i, example)| example_case(i, example))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Problem {
        title: text_field(entry, "title").unwrap_or_else(|| format!("Problem {}", practice_idx + 1)),
        description: text_field(entry, "description").unwrap_or_default(),
        tests,
        force_mode,
    })
}

fn example_case(index: usize, example: &JsonValue) -> Result<TestCase, LoadError> {
    let expected = example
        .get("output")
        .or_else(|| example.get("expected"))
        .filter(|value| match value {
            JsonValue::Null => false,
            JsonValue::String(s) => !s.trim().is_empty(),
            _ => true,
        })
        .ok_or(LoadError::MissingExpected(index))?;
    let input = example
        .get("input")
        .cloned()
        .unwrap_or_else(|| JsonValue::String(String::new()));
    Ok(TestCase::new(input, expected.clone()))
}

fn text_field(json: &JsonValue, key: &str) -> Option<String> {
    json.get(key).and_then(JsonValue::as_str).map(str::to_string)
}

fn parse_force_mode(value: Option<&JsonValue>) -> Result<Option<ForceMode>, LoadError> {
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(mode)) if mode.trim().is_empty() => Ok(None),
        Some(other) => serde_json::from_value(other.clone())
            .map(Some)
            .map_err(|_| LoadError::UnknownForceMode(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coding_practice_entries_are_indexed() {
        let json = json!({
            "force_mode": "stdin",
            "coding_practice": [
                {"title": "A", "examples": [{"input": "1 2", "output": "3"}]},
                {"title": "B", "description": "d", "examples": [
                    {"input": "nums = [1]", "output": "[0]"},
                    {"input": "nums = [2]", "expected": [1]}
                ]}
            ]
        });
        let problem = problem_from_json(&json, 1).unwrap();
        assert_eq!(problem.title, "B");
        assert_eq!(problem.description, "d");
        assert_eq!(problem.tests.len(), 2);
        assert_eq!(problem.tests[1].expected, json!([1]));
        assert_eq!(problem.force_mode, Some(ForceMode::WholeText));

        assert!(matches!(
            problem_from_json(&json, 2),
            Err(LoadError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn flat_problems_load() {
        let json = json!({"title": "Echo", "tests": [{"input": "hi", "output": "hi"}]});
        let problem = problem_from_json(&json, 0).unwrap();
        assert_eq!(problem.title, "Echo");
        assert_eq!(problem.force_mode, None);
    }

    #[test]
    fn missing_expected_output_fails() {
        let json = json!({"examples": [{"input": "1", "output": "1"}, {"input": "2", "output": "  "}]});
        assert!(matches!(problem_from_json(&json, 0), Err(LoadError::MissingExpected(1))));
        assert!(matches!(problem_from_json(&json!({"examples": []}), 0), Err(LoadError::NoExamples)));
        assert!(matches!(
            problem_from_json(&json!({"coding_practice": []}), 0),
            Err(LoadError::NoPractice)
        ));
    }

    #[test]
    fn unknown_force_mode_fails() {
        let json = json!({"force_mode": "telepathy", "tests": [{"input": "", "output": "1"}]});
        assert!(matches!(problem_from_json(&json, 0), Err(LoadError::UnknownForceMode(_))));
    }

    #[test]
    fn load_problem_reports_io_and_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(load_problem(&missing, 0), Err(LoadError::Read { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{not json").unwrap();
        assert!(matches!(load_problem(&broken, 0), Err(LoadError::Parse { .. })));

        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"tests": [{"input": "1", "output": "1"}]}"#).unwrap();
        assert_eq!(load_problem(&good, 0).unwrap().tests.len(), 1);
    }
}
