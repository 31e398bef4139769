//! Static inspection of submitted source: entry points and argument names.
//!
//! Nothing here executes the submission. Every failure degrades to `None` or an
//! empty list so the judge can fall back to whole-text mode.

use crate::testcase::TestCase;
use crate::value::{Value, parse_literal};
use rustpython_parser::{Parse, ast};
use serde_json::Value as JsonValue;

/// Method names tried first, in order, when the container has several.
pub const PREFERRED_ENTRY_POINTS: [&str; 4] = ["solve", "main", "run", "answer"];

/// Name given to a case input that is not `key=value` shaped.
pub const SINGLE_ARGUMENT_NAME: &str = "s";

/// Finds the method to call on `class_name`.
pub fn infer_entry_point(source: &str, class_name: &str) -> Option<String> {
    let suite = ast::Suite::parse(&dedent(source), "<submission>").ok()?;
    let body = suite.iter().find_map(|stmt| match stmt {
        ast::Stmt::ClassDef(class) if class.name.as_str() == class_name => Some(&class.body),
        _ => None,
    })?;

    let methods: Vec<&str> = body
        .iter()
        .filter_map(|stmt| match stmt {
            ast::Stmt::FunctionDef(def) => Some(def.name.as_str()),
            ast::Stmt::AsyncFunctionDef(def) => Some(def.name.as_str()),
            _ => None,
        })
        .filter(|name| !name.starts_with("__"))
        .collect();

    PREFERRED_ENTRY_POINTS
        .iter()
        .find(|preferred| methods.contains(*preferred))
        .or_else(|| methods.first())
        .map(|name| name.to_string())
}

/// Argument names shared by every case, in first-case order.
pub fn infer_arg_names(cases: &[TestCase]) -> Vec<String> {
    let per_case: Vec<Vec<String>> = cases.iter().map(|case| case_arg_names(&case.input)).collect();
    let Some((first, rest)) = per_case.split_first() else {
        return Vec::new();
    };
    first
        .iter()
        .filter(|name| rest.iter().all(|names| names.contains(name)))
        .cloned()
        .collect()
}

fn case_arg_names(input: &JsonValue) -> Vec<String> {
    match input {
        JsonValue::Object(map) => map.keys().cloned().collect(),
        JsonValue::String(text) => {
            let pairs = kv_pairs(text);
            if pairs.is_empty() {
                vec![SINGLE_ARGUMENT_NAME.to_string()]
            } else {
                pairs.into_iter().map(|(name, _)| name).collect()
            }
        }
        _ => vec![SINGLE_ARGUMENT_NAME.to_string()],
    }
}

/// Parses `a = [1, 2], b = "x, y"` into named values.
///
/// Commas split only outside brackets and quotes. A JSON object is taken as-is.
/// Segments that are not `identifier = value` are skipped.
pub fn kv_pairs(text: &str) -> Vec<(String, Value)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(JsonValue::Object(map)) = serde_json::from_str::<JsonValue>(trimmed) {
        return map
            .iter()
            .map(|(name, value)| (name.clone(), Value::from_json(value)))
            .collect();
    }

    split_top_level(trimmed)
        .into_iter()
        .filter_map(|segment| {
            let (name, raw) = segment.split_once('=')?;
            let name = name.trim();
            if !is_identifier(name) || raw.starts_with('=') {
                return None;
            }
            Some((name.to_string(), parse_literal(raw)))
        })
        .collect()
}

fn split_top_level(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth -= 1,
            ',' if depth == 0 => {
                segments.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&text[start..]);
    segments
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_alphabetic())
        && chars.all(|ch| ch == '_' || ch.is_alphanumeric())
}

/// Strips the indentation common to every non-blank line.
pub fn dedent(source: &str) -> String {
    let margin = source
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    if margin == 0 {
        return source.to_string();
    }
    source
        .lines()
        .map(|line| line.get(margin..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TWO_SUM: &str = r#"
class Solution:
    def __init__(self):
        self.calls = 0

    def helper(self, x):
        return x

    def twoSum(self, nums: List[int], target: int) -> List[int]:
        seen = {}
        for i, n in enumerate(nums):
            if target - n in seen:
                return [seen[target - n], i]
            seen[n] = i
"#;

    #[test]
    fn first_public_method_wins_without_preferred_names() {
        assert_eq!(infer_entry_point(TWO_SUM, "Solution").as_deref(), Some("helper"));
    }

    #[test]
    fn preferred_names_win() {
        let source = "class Solution:\n    def other(self): pass\n    def run(self): pass\n    def solve(self): pass\n";
        assert_eq!(infer_entry_point(source, "Solution").as_deref(), Some("solve"));
    }

    #[test]
    fn async_methods_count_and_dunders_do_not() {
        let source = "class Solution:\n    def __call__(self): pass\n    async def fetch(self): pass\n";
        assert_eq!(infer_entry_point(source, "Solution").as_deref(), Some("fetch"));
    }

    #[test]
    fn inference_failures_yield_none() {
        assert_eq!(infer_entry_point("def solve(): pass", "Solution"), None);
        assert_eq!(infer_entry_point("class Solution(:\n", "Solution"), None);
        assert_eq!(infer_entry_point("class Solution:\n    x = 1\n", "Solution"), None);
        assert_eq!(infer_entry_point(TWO_SUM, "Other"), None);
    }

    #[test]
    fn indented_sources_are_dedented() {
        let source = "    class Solution:\n        def answer(self):\n            return 1\n";
        assert_eq!(infer_entry_point(source, "Solution").as_deref(), Some("answer"));
    }

    #[test]
    fn kv_pairs_respect_nesting_and_quotes() {
        let pairs = kv_pairs(r#"nums = [2, 7, 11], s = "a, b", grid = [[1,2],[3,4]]"#);
        let names: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["nums", "s", "grid"]);
        assert_eq!(pairs[1].1, Value::Str("a, b".into()));
        assert_eq!(
            pairs[0].1,
            Value::List(vec![Value::Int(2), Value::Int(7), Value::Int(11)])
        );
    }

    #[test]
    fn kv_pairs_skip_non_assignments() {
        assert!(kv_pairs("[1, 2, 3]").is_empty());
        assert!(kv_pairs("1 + 1 = 2").is_empty());
        assert!(kv_pairs("   ").is_empty());
        let json = kv_pairs(r#"{"a": 1, "b": [2]}"#);
        assert_eq!(json.len(), 2);
    }

    #[test]
    fn arg_names_are_common_to_all_cases() {
        let cases = vec![
            TestCase::new("nums = [2,7,11,15], target = 9", "[0,1]"),
            TestCase::new("target = 6, nums = [3,3]", "[0,1]"),
        ];
        assert_eq!(infer_arg_names(&cases), ["nums", "target"]);

        let mixed = vec![
            TestCase::new("a = 1", "1"),
            TestCase::new("b = 2", "2"),
        ];
        assert!(infer_arg_names(&mixed).is_empty());

        let plain = vec![TestCase::new("babad", "bab"), TestCase::new(json!([1, 2]), "3")];
        assert_eq!(infer_arg_names(&plain), ["s"]);
        assert!(infer_arg_names(&[]).is_empty());
    }
}
