//! Generated Python programs that host a submission.
//!
//! A submission is never concatenated with driver code. It is written to its
//! own `unit_<uuid>.py` file and a fixed harness loads it, so line numbers
//! reported by tracebacks and the coverage tracer are the submission's own.
//! The only names placed in the submission's namespace are [`INJECTED_NAMES`].

use crate::executor::{SandboxError, Workspace};
use crate::marshal::BuildSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::{Path, PathBuf};

pub const HARNESS_FILE: &str = "harness.py";
pub const CASES_FILE: &str = "cases.json";
pub const RESULTS_FILE: &str = "results.jsonl";
pub const COVERAGE_FILE: &str = "coverage.json";
pub const EXECUTABLE_FILE: &str = "executable.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedOrigin {
    Typing,
    Harness,
}

/// Names made available to every submission without an import.
pub const INJECTED_NAMES: &[(&str, InjectedOrigin)] = &[
    ("Any", InjectedOrigin::Typing),
    ("Dict", InjectedOrigin::Typing),
    ("List", InjectedOrigin::Typing),
    ("Optional", InjectedOrigin::Typing),
    ("Set", InjectedOrigin::Typing),
    ("Tuple", InjectedOrigin::Typing),
    ("ListNode", InjectedOrigin::Harness),
    ("TreeNode", InjectedOrigin::Harness),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessKind {
    /// Run the unit as `__main__` with the process's stdin and stdout.
    Script,
    /// Load the unit once and call a method for each case in `cases.json`.
    EntryPoint,
    /// Run the unit as a script under a line tracer. The lines that carry
    /// bytecode are written before the run starts.
    Coverage,
}

/// Paths of a submission placed in a workspace.
#[derive(Debug, Clone)]
pub struct WrappedSubmission {
    pub module_name: String,
    pub unit_path: PathBuf,
    pub harness_path: PathBuf,
    root: PathBuf,
}

impl WrappedSubmission {
    /// Interpreter arguments: the harness, the unit, then `extra` workspace files.
    pub fn args(&self, extra: &[&str]) -> Vec<String> {
        let mut args = vec![path_arg(&self.harness_path), path_arg(&self.unit_path)];
        args.extend(extra.iter().map(|name| path_arg(&self.root.join(name))));
        args
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Writes `code` and the harness for `kind` into `workspace`.
pub fn wrap_submission(
    workspace: &Workspace,
    code: &str,
    kind: HarnessKind,
) -> Result<WrappedSubmission, SandboxError> {
    let module_name = workspace.module_name();
    let unit_path = workspace.write(&format!("{module_name}.py"), code)?;
    let harness_path = workspace.write(HARNESS_FILE, &render_harness(kind))?;
    Ok(WrappedSubmission {
        module_name,
        unit_path,
        harness_path,
        root: workspace.path().to_path_buf(),
    })
}

pub fn render_harness(kind: HarnessKind) -> String {
    let typing: Vec<&str> = INJECTED_NAMES
        .iter()
        .filter(|(_, origin)| *origin == InjectedOrigin::Typing)
        .map(|(name, _)| *name)
        .collect();
    let injected: Vec<String> = INJECTED_NAMES
        .iter()
        .map(|(name, _)| format!("    \"{name}\": {name},"))
        .collect();
    let dispatch = match kind {
        HarnessKind::Script => "_run_script(sys.argv[1])",
        HarnessKind::EntryPoint => "_run_entry_point(sys.argv[1], sys.argv[2], sys.argv[3])",
        HarnessKind::Coverage => "_run_coverage(sys.argv[1], sys.argv[2], sys.argv[3])",
    };

    let mut out = String::with_capacity(PRELUDE.len() + RUNNERS.len() + 512);
    out.push_str(IMPORTS);
    out.push_str(&format!("from typing import {}\n", typing.join(", ")));
    out.push_str(PRELUDE);
    out.push_str("\n_INJECTED = {\n");
    out.push_str(&injected.join("\n"));
    out.push_str("\n}\n");
    out.push_str(RUNNERS);
    out.push_str(&format!("\n\nif __name__ == \"__main__\":\n    {dispatch}\n"));
    out
}

/// Job description read by the entry-point harness.
#[derive(Debug, Serialize)]
pub struct EntryPointJob<'a> {
    pub module: &'a str,
    pub class_name: &'a str,
    pub method: &'a str,
    pub expect_kind: Option<BuildSpec>,
    /// Deadline for one call; zero disables it.
    pub case_timeout_ms: u64,
    /// Wire-encoded positional arguments, one list per case.
    pub cases: &'a [Vec<JsonValue>],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStage {
    Load,
    MissingClass,
    Constructor,
    MissingMethod,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            SetupStage::Load => "load",
            SetupStage::MissingClass => "class lookup",
            SetupStage::Constructor => "construction",
            SetupStage::MissingMethod => "method lookup",
        };
        f.write_str(stage)
    }
}

/// One line of `results.jsonl`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HarnessRecord {
    SetupError {
        stage: SetupStage,
        message: String,
    },
    Case {
        index: usize,
        ok: bool,
        #[serde(default)]
        value: JsonValue,
        #[serde(default)]
        error: Option<String>,
        /// The call overran its deadline and was interrupted.
        #[serde(default)]
        timed_out: bool,
    },
}

/// Parses result lines, skipping any the harness did not finish writing.
pub fn parse_records(text: &str) -> Vec<HarnessRecord> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CoverageReport {
    pub status: CoverageStatus,
    #[serde(default)]
    pub lines: Vec<usize>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    Ok,
    Error,
}

const IMPORTS: &str = "import contextlib
import dis
import io
import json
import math
import signal
import sys
import types
";

const PRELUDE: &str = r##"

class ListNode:
    def __init__(self, val=0, next=None):
        self.val = val
        self.next = next


class TreeNode:
    def __init__(self, val=0, left=None, right=None):
        self.val = val
        self.left = left
        self.right = right


_NODE_LIMIT = 1_000_000


def _freeze(value):
    if isinstance(value, list):
        return tuple(_freeze(item) for item in value)
    return value


def _build_linked_list(values):
    head = tail = None
    for value in values:
        node = ListNode(_decode(value))
        if head is None:
            head = tail = node
        else:
            tail.next = node
            tail = node
    return head


def _build_tree(values):
    if not values or values[0] is None:
        return None
    root = TreeNode(_decode(values[0]))
    queue = [root]
    head = 0
    index = 1
    while head < len(queue) and index < len(values):
        node = queue[head]
        head += 1
        if values[index] is not None:
            node.left = TreeNode(_decode(values[index]))
            queue.append(node.left)
        index += 1
        if index < len(values) and values[index] is not None:
            node.right = TreeNode(_decode(values[index]))
            queue.append(node.right)
        index += 1
    return root


def _flatten_linked_list(head):
    out = []
    while head is not None:
        if len(out) >= _NODE_LIMIT:
            raise ValueError("linked list is cyclic or too long")
        out.append(_encode(head.val))
        head = head.next
    return out


def _flatten_tree(root):
    out = []
    queue = [root]
    head = 0
    while head < len(queue):
        node = queue[head]
        head += 1
        if node is None:
            out.append(None)
            continue
        if len(out) >= _NODE_LIMIT:
            raise ValueError("tree is cyclic or too large")
        out.append(_encode(node.val))
        queue.append(node.left)
        queue.append(node.right)
    while out and out[-1] is None:
        out.pop()
    return out


def _decode(value):
    if isinstance(value, list):
        return [_decode(item) for item in value]
    if isinstance(value, dict):
        if len(value) == 1:
            tag, payload = next(iter(value.items()))
            if tag == "$linked_list":
                return _build_linked_list(payload)
            if tag == "$tree":
                return _build_tree(payload)
            if tag == "$set":
                return {_freeze(_decode(item)) for item in payload}
            if tag == "$map":
                return {_freeze(_decode(key)): _decode(item) for key, item in payload}
            if tag == "$float":
                return float(payload)
        return {key: _decode(item) for key, item in value.items()}
    return value


def _encode(value):
    if value is None or isinstance(value, (bool, int, str)):
        return value
    if isinstance(value, float):
        if math.isnan(value):
            return {"$float": "nan"}
        if math.isinf(value):
            return {"$float": "inf" if value > 0 else "-inf"}
        return value
    if isinstance(value, ListNode):
        return {"$linked_list": _flatten_linked_list(value)}
    if isinstance(value, TreeNode):
        return {"$tree": _flatten_tree(value)}
    if isinstance(value, (list, tuple)):
        return [_encode(item) for item in value]
    if isinstance(value, (set, frozenset)):
        return {"$set": [_encode(item) for item in value]}
    if isinstance(value, dict):
        if all(isinstance(key, str) for key in value):
            return {key: _encode(item) for key, item in value.items()}
        return {"$map": [[_encode(key), _encode(item)] for key, item in value.items()]}
    return {"$repr": repr(value)}


def _encode_result(value, expect_kind):
    if expect_kind == "linked-list":
        return {"$linked_list": _flatten_linked_list(value)}
    if expect_kind == "tree":
        return {"$tree": _flatten_tree(value)}
    return _encode(value)


def _describe(error):
    return f"{type(error).__name__}: {error}"


class _CaseTimeout(BaseException):
    pass


@contextlib.contextmanager
def _deadline(seconds):
    if seconds <= 0 or not hasattr(signal, "setitimer"):
        yield
        return

    def expire(signum, frame):
        raise _CaseTimeout(f"call exceeded {seconds:g}s")

    previous = signal.signal(signal.SIGALRM, expire)
    signal.setitimer(signal.ITIMER_REAL, seconds)
    try:
        yield
    finally:
        signal.setitimer(signal.ITIMER_REAL, 0)
        signal.signal(signal.SIGALRM, previous)


def _namespace(name, path):
    namespace = {"__name__": name, "__file__": path, "__builtins__": __builtins__}
    namespace.update(_INJECTED)
    return namespace
"##;

const RUNNERS: &str = r##"

def _read(path):
    with open(path, encoding="utf-8") as handle:
        return handle.read()


def _run_script(unit_path):
    source = _read(unit_path)
    sys.argv = [unit_path]
    exec(compile(source, unit_path, "exec"), _namespace("__main__", unit_path))


def _run_entry_point(unit_path, job_path, out_path):
    job = json.loads(_read(job_path))
    with open(out_path, "w", encoding="utf-8") as out:

        def emit(record):
            out.write(json.dumps(record) + "\n")
            out.flush()

        def setup_error(stage, message):
            emit({"event": "setup_error", "stage": stage, "message": message})

        module = types.ModuleType(job["module"])
        module.__dict__.update(_namespace(job["module"], unit_path))
        sys.modules[job["module"]] = module
        try:
            code = compile(_read(unit_path), unit_path, "exec")
            with contextlib.redirect_stdout(io.StringIO()):
                exec(code, module.__dict__)
        except BaseException as error:
            setup_error("load", _describe(error))
            return

        container = module.__dict__.get(job["class_name"])
        if not isinstance(container, type):
            setup_error("missing_class", f"class {job['class_name']} is not defined")
            return
        try:
            with contextlib.redirect_stdout(io.StringIO()):
                instance = container()
        except BaseException as error:
            setup_error("constructor", _describe(error))
            return
        method = getattr(instance, job["method"], None)
        if not callable(method):
            setup_error("missing_method", f"{job['class_name']}.{job['method']} is not callable")
            return

        expect_kind = job.get("expect_kind")
        limit = job.get("case_timeout_ms", 0) / 1000.0
        for index, args in enumerate(job["cases"]):
            try:
                built = [_decode(arg) for arg in args]
                with contextlib.redirect_stdout(io.StringIO()), _deadline(limit):
                    result = method(*built)
                emit({"event": "case", "index": index, "ok": True,
                      "value": _encode_result(result, expect_kind)})
            except _CaseTimeout as error:
                emit({"event": "case", "index": index, "ok": False,
                      "timed_out": True, "error": _describe(error)})
            except BaseException as error:
                emit({"event": "case", "index": index, "ok": False, "error": _describe(error)})


def _executable_lines(code):
    lines = set()
    pending = [code]
    while pending:
        current = pending.pop()
        lines.update(line for _, line in dis.findlinestarts(current) if line and line > 0)
        pending.extend(const for const in current.co_consts if isinstance(const, types.CodeType))
    return sorted(lines)


def _run_coverage(unit_path, out_path, lines_path):
    executed = set()

    def tracer(frame, event, arg):
        if frame.f_code.co_filename != unit_path:
            return None
        if event == "line":
            executed.add(frame.f_lineno)
        return tracer

    status, message = "ok", None
    sys.argv = [unit_path]
    try:
        code = compile(_read(unit_path), unit_path, "exec")
        with open(lines_path, "w", encoding="utf-8") as out:
            json.dump(_executable_lines(code), out)
        namespace = _namespace("__main__", unit_path)
        sys.settrace(tracer)
        try:
            with contextlib.redirect_stdout(io.StringIO()):
                exec(code, namespace)
        finally:
            sys.settrace(None)
    except SystemExit as error:
        if error.code not in (None, 0):
            status, message = "error", f"SystemExit: {error.code}"
    except BaseException as error:
        status, message = "error", _describe(error)

    with open(out_path, "w", encoding="utf-8") as out:
        json.dump({"status": status, "lines": sorted(executed), "error": message}, out)
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_injects_only_the_allow_list() {
        let text = render_harness(HarnessKind::EntryPoint);
        assert!(text.contains("from typing import Any, Dict, List, Optional, Set, Tuple\n"));
        for (name, _) in INJECTED_NAMES {
            assert!(text.contains(&format!("\"{name}\": {name},")));
        }
        assert!(text.ends_with("_run_entry_point(sys.argv[1], sys.argv[2], sys.argv[3])\n"));
    }

    #[test]
    fn unit_and_harness_are_separate_files() {
        let workspace = Workspace::create(None).unwrap();
        let wrapped = wrap_submission(&workspace, "print(1)\n", HarnessKind::Script).unwrap();
        assert_eq!(std::fs::read_to_string(&wrapped.unit_path).unwrap(), "print(1)\n");
        assert!(wrapped.unit_path.ends_with(format!("{}.py", workspace.module_name())));
        let args = wrapped.args(&[CASES_FILE]);
        assert_eq!(args.len(), 3);
        assert!(args[0].ends_with(HARNESS_FILE));
        assert!(args[2].ends_with(CASES_FILE));
    }

    #[test]
    fn records_parse_and_partial_lines_are_skipped() {
        let text = concat!(
            "{\"event\": \"case\", \"index\": 0, \"ok\": true, \"value\": [1, 2]}\n",
            "{\"event\": \"case\", \"index\": 1, \"ok\": false, \"error\": \"ValueError: x\"}\n",
            "{\"event\": \"case\", \"ind",
        );
        let records = parse_records(text);
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1],
            HarnessRecord::Case {
                index: 1,
                ok: false,
                value: JsonValue::Null,
                error: Some("ValueError: x".into()),
                timed_out: false,
            }
        );

        let overran = parse_records(
            "{\"event\": \"case\", \"index\": 3, \"ok\": false, \"timed_out\": true, \"error\": \"_CaseTimeout: call exceeded 0.3s\"}",
        );
        assert!(matches!(overran[..], [HarnessRecord::Case { index: 3, timed_out: true, .. }]));

        let setup = parse_records("{\"event\": \"setup_error\", \"stage\": \"missing_method\", \"message\": \"m\"}");
        assert_eq!(
            setup,
            [HarnessRecord::SetupError {
                stage: SetupStage::MissingMethod,
                message: "m".into()
            }]
        );
    }
}
