use crate::compare::{CompareOptions, compare};
use crate::config::JudgeSettings;
use crate::executor::{CancelToken, ExecutionError, ExecutionResult, SandboxError, SandboxExecutor, Workspace};
use crate::harness::{self, CASES_FILE, EntryPointJob, HarnessKind, HarnessRecord, RESULTS_FILE, SetupStage};
use crate::marshal::{BuildSpec, MarshalError};
use crate::signature::{dedent, infer_arg_names, infer_entry_point, kv_pairs};
use crate::testcase::{CaseKind, TestCase, normalize_text};
use crate::value::{Value, parse_literal};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JudgeError {
    /// The submission could not be prepared for calling. No case ran.
    #[error("setup failed during {stage}: {message}")]
    Setup { stage: SetupStage, message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgumentError {
    #[error("argument '{0}' is missing from the case input")]
    Missing(String),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
}

/// How a submission is invoked for each case.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeMode {
    /// Run as a program: case input on stdin, compare stdout text.
    WholeText,
    /// Call a method on an instance of a container class.
    EntryPoint(EntryPointPlan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryPointPlan {
    pub class_name: String,
    pub method: String,
    pub arg_names: Vec<String>,
    pub build_specs: Vec<BuildSpec>,
    /// Shape the result is normalized to before comparison.
    pub expect_kind: Option<BuildSpec>,
}

impl EntryPointPlan {
    pub fn new(method: impl Into<String>, arg_names: Vec<String>) -> Self {
        Self {
            class_name: crate::config::default_class_name(),
            method: method.into(),
            arg_names,
            build_specs: Vec::new(),
            expect_kind: None,
        }
    }

    /// Positional arguments for `case`, with build specs applied.
    ///
    /// `key=value` text and JSON objects are mapped through `arg_names`; a JSON
    /// array is positional; anything else is a single argument.
    pub fn call_args(&self, case: &TestCase) -> Result<Vec<Value>, ArgumentError> {
        let raw: Vec<Value> = match &case.input {
            JsonValue::Array(items) => items.iter().map(Value::from_json).collect(),
            JsonValue::Object(map) => self
                .arg_names
                .iter()
                .map(|name| {
                    map.get(name)
                        .map(Value::from_json)
                        .ok_or_else(|| ArgumentError::Missing(name.clone()))
                })
                .collect::<Result<_, _>>()?,
            JsonValue::String(text) => self.text_args(text)?,
            other => vec![Value::from_json(other)],
        };

        raw.into_iter()
            .enumerate()
            .map(|(i, value)| {
                BuildSpec::for_argument(&self.build_specs, i)
                    .apply(value)
                    .map_err(ArgumentError::from)
            })
            .collect()
    }

    fn text_args(&self, text: &str) -> Result<Vec<Value>, ArgumentError> {
        let mut pairs = kv_pairs(text);
        if pairs.is_empty() {
            return Ok(match serde_json::from_str::<JsonValue>(text.trim()) {
                Ok(JsonValue::Array(items)) => items.iter().map(Value::from_json).collect(),
                _ => vec![parse_literal(text)],
            });
        }
        if self.arg_names.is_empty() {
            return Ok(pairs.into_iter().map(|(_, value)| value).collect());
        }
        self.arg_names
            .iter()
            .map(|name| {
                pairs
                    .iter()
                    .position(|(key, _)| key == name)
                    .map(|at| pairs.swap_remove(at).1)
                    .ok_or_else(|| ArgumentError::Missing(name.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseOutcome {
    pub index: usize,
    pub kind: CaseKind,
    pub input: String,
    pub expected: String,
    pub actual: Option<String>,
    pub passed: bool,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ExecutionError>,
}

fn serialize_error<S: Serializer>(error: &Option<ExecutionError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

impl CaseOutcome {
    fn pending(index: usize, case: &TestCase, input: String, expected: String) -> Self {
        Self {
            index,
            kind: case.kind,
            input,
            expected,
            actual: None,
            passed: false,
            error: None,
        }
    }

    fn finished(mut self, passed: bool, actual: String) -> Self {
        self.passed = passed;
        self.actual = Some(actual);
        self
    }

    fn failed(mut self, error: ExecutionError) -> Self {
        self.passed = false;
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub outcomes: Vec<CaseOutcome>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl Verdict {
    fn new(outcomes: Vec<CaseOutcome>, elapsed: Duration) -> Self {
        Self {
            passed: outcomes.iter().all(|o| o.passed),
            outcomes,
            elapsed,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.passed_count()
    }

    /// Human-readable per-case report.
    pub fn render_log(&self) -> String {
        let mut log = String::new();
        for outcome in &self.outcomes {
            let status = if outcome.passed { "PASS" } else { "FAIL" };
            let _ = writeln!(log, "[case #{}] {status}", outcome.index + 1);
            let _ = writeln!(log, "  input:    {}", outcome.input);
            let _ = writeln!(log, "  expected: {}", outcome.expected);
            if let Some(actual) = &outcome.actual {
                let _ = writeln!(log, "  actual:   {actual}");
            }
            if let Some(error) = &outcome.error {
                let _ = writeln!(log, "  error:    {error}");
            }
        }
        let _ = write!(
            log,
            "=== {}/{} cases passed in {:.3}s ===",
            self.passed_count(),
            self.outcomes.len(),
            self.elapsed.as_secs_f64()
        );
        log
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForceMode {
    #[serde(alias = "stdin")]
    WholeText,
    #[serde(alias = "leetcode")]
    EntryPoint,
}

/// A judging request as received from the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JudgeRequest {
    #[serde(alias = "data_id")]
    pub problem_id: Option<String>,
    pub code: String,
    /// Output the learner produced by hand; judged as text when the problem has one case.
    pub user_output: Option<String>,
    pub tests: Vec<TestCase>,
    pub class_name: Option<String>,
    #[serde(alias = "method")]
    pub entry_point: Option<String>,
    pub arg_names: Option<Vec<String>>,
    #[serde(alias = "per_arg_build")]
    pub build_specs: Vec<BuildSpec>,
    pub expect_kind: Option<BuildSpec>,
    pub float_tol: Option<f64>,
    pub unordered: Option<bool>,
    pub force_mode: Option<ForceMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLabel {
    Correct,
    Wrong,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeResponse {
    pub ok: bool,
    pub verdict: VerdictLabel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<String>,
}

impl JudgeResponse {
    fn correct(log: String) -> Self {
        Self {
            ok: true,
            verdict: VerdictLabel::Correct,
            log: Some(log),
            suggestions: None,
        }
    }

    fn wrong(suggestions: String) -> Self {
        Self {
            ok: true,
            verdict: VerdictLabel::Wrong,
            log: None,
            suggestions: Some(suggestions),
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            ok: false,
            ..Self::wrong(reason.to_string())
        }
    }
}

/// Runs submissions against test cases.
#[derive(Debug, Clone)]
pub struct Judge {
    executor: SandboxExecutor,
    settings: JudgeSettings,
}

impl Judge {
    pub fn new(executor: SandboxExecutor, settings: JudgeSettings) -> Self {
        Self { executor, settings }
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    pub fn settings(&self) -> &JudgeSettings {
        &self.settings
    }

    pub fn compare_options(&self) -> CompareOptions {
        CompareOptions {
            float_tol: self.settings.float_tol,
            unordered: self.settings.unordered,
        }
    }

    fn request_options(&self, request: &JudgeRequest) -> CompareOptions {
        let defaults = self.compare_options();
        CompareOptions {
            float_tol: request.float_tol.unwrap_or(defaults.float_tol),
            unordered: request.unordered.unwrap_or(defaults.unordered),
        }
    }

    /// Picks the invocation mode for `code`.
    ///
    /// Whole-text mode is forced by the request or the problem override list;
    /// a request forcing entry-point mode is exempt from the list. Otherwise
    /// entry-point mode needs both a method and argument names, explicit or
    /// inferred.
    pub fn select_mode(&self, code: &str, request: &JudgeRequest) -> JudgeMode {
        let listed = request.force_mode != Some(ForceMode::EntryPoint)
            && request
                .problem_id
                .as_ref()
                .is_some_and(|id| self.settings.whole_text_problems.contains(id));
        if listed || request.force_mode == Some(ForceMode::WholeText) {
            debug!(problem_id = ?request.problem_id, "whole-text mode forced");
            return JudgeMode::WholeText;
        }

        let class_name = request
            .class_name
            .clone()
            .unwrap_or_else(|| self.settings.class_name.clone());
        let method = request
            .entry_point
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| infer_entry_point(code, &class_name));
        let arg_names = request
            .arg_names
            .clone()
            .filter(|names| !names.is_empty())
            .unwrap_or_else(|| infer_arg_names(&request.tests));

        match method {
            Some(method) if !arg_names.is_empty() => {
                debug!(%class_name, %method, ?arg_names, "entry-point mode selected");
                JudgeMode::EntryPoint(EntryPointPlan {
                    class_name,
                    method,
                    arg_names,
                    build_specs: request.build_specs.clone(),
                    expect_kind: request.expect_kind,
                })
            }
            _ => JudgeMode::WholeText,
        }
    }

    /// Runs every case and reports each outcome.
    pub fn judge(
        &self,
        code: &str,
        cases: &[TestCase],
        mode: &JudgeMode,
        options: CompareOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<Verdict, JudgeError> {
        self.run(code, cases, mode, options, cancel, false)
    }

    /// Acceptance check that stops at the first failing case.
    pub fn validate_batch(
        &self,
        code: &str,
        cases: &[TestCase],
        mode: &JudgeMode,
        options: CompareOptions,
    ) -> Result<Verdict, JudgeError> {
        self.run(code, cases, mode, options, None, true)
    }

    fn run(
        &self,
        code: &str,
        cases: &[TestCase],
        mode: &JudgeMode,
        options: CompareOptions,
        cancel: Option<&CancelToken>,
        fail_fast: bool,
    ) -> Result<Verdict, JudgeError> {
        let started = Instant::now();
        let mut outcomes = match mode {
            JudgeMode::WholeText => self.run_whole_text(code, cases, cancel, fail_fast),
            JudgeMode::EntryPoint(plan) => self.run_entry_point(code, cases, plan, options, cancel)?,
        };
        if fail_fast {
            if let Some(first_failure) = outcomes.iter().position(|o| !o.passed) {
                outcomes.truncate(first_failure + 1);
            }
        }
        let verdict = Verdict::new(outcomes, started.elapsed());
        info!(
            passed = verdict.passed,
            cases = verdict.outcomes.len(),
            failed = verdict.failed_count(),
            elapsed_ms = verdict.elapsed.as_millis() as u64,
            "judged submission"
        );
        Ok(verdict)
    }

    fn run_whole_text(
        &self,
        code: &str,
        cases: &[TestCase],
        cancel: Option<&CancelToken>,
        fail_fast: bool,
    ) -> Vec<CaseOutcome> {
        let workers = self.settings.threads.min(cases.len());
        if fail_fast || workers <= 1 {
            let mut outcomes = Vec::with_capacity(cases.len());
            for (index, case) in cases.iter().enumerate() {
                let outcome = self.run_whole_text_case(index, code, case, cancel);
                let stop = fail_fast && !outcome.passed;
                outcomes.push(outcome);
                if stop {
                    break;
                }
            }
            return outcomes;
        }

        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<CaseOutcome>>> = cases.iter().map(|_| Mutex::new(None)).collect();
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(case) = cases.get(index) else {
                            break;
                        };
                        let outcome = self.run_whole_text_case(index, code, case, cancel);
                        if let Ok(mut slot) = slots[index].lock() {
                            *slot = Some(outcome);
                        }
                    }
                });
            }
        });

        slots
            .into_iter()
            .zip(cases)
            .enumerate()
            .map(|(index, (slot, case))| {
                slot.into_inner().ok().flatten().unwrap_or_else(|| {
                    CaseOutcome::pending(index, case, case.input_text(), case.expected_text())
                        .failed(ExecutionError::Crashed("worker thread panicked".to_string()))
                })
            })
            .collect()
    }

    fn run_whole_text_case(
        &self,
        index: usize,
        code: &str,
        case: &TestCase,
        cancel: Option<&CancelToken>,
    ) -> CaseOutcome {
        let expected = normalize_text(&case.expected_text());
        let outcome = CaseOutcome::pending(index, case, case.input_text(), expected.clone());
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return outcome.failed(ExecutionError::Cancelled);
        }

        let result = self
            .executor
            .run_cancellable(code, &case.stdin_text(), self.settings.case_timeout(), cancel)
            .map_err(ExecutionError::from)
            .and_then(ExecutionResult::into_outcome);
        match result {
            Ok(result) => {
                let actual = normalize_text(&result.stdout);
                let passed = actual == expected;
                outcome.finished(passed, actual)
            }
            Err(error) => {
                debug!(index, %error, "case did not complete");
                outcome.failed(error)
            }
        }
    }

    fn run_entry_point(
        &self,
        code: &str,
        cases: &[TestCase],
        plan: &EntryPointPlan,
        options: CompareOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<CaseOutcome>, JudgeError> {
        let prepared: Vec<Result<Vec<Value>, ArgumentError>> =
            cases.iter().map(|case| plan.call_args(case)).collect();
        let job_cases: Vec<Vec<JsonValue>> = prepared
            .iter()
            .filter_map(|args| args.as_ref().ok())
            .map(|args| args.iter().map(Value::to_wire).collect())
            .collect();

        let results = self.execute_job(code, plan, &job_cases, cancel)?;

        let expect_node = matches!(plan.expect_kind, Some(BuildSpec::LinkedList | BuildSpec::Tree));
        let mut results = results.into_iter();
        let outcomes = cases
            .iter()
            .zip(prepared)
            .enumerate()
            .map(|(index, (case, args))| {
                let expected = case.expected_value();
                let input = match &args {
                    Ok(args) => render_call(&plan.method, args),
                    Err(_) => case.input_text(),
                };
                let outcome = CaseOutcome::pending(index, case, input, expected.to_string());
                if let Err(e) = args {
                    return outcome.failed(ExecutionError::Raised(format!("invalid arguments: {e}")));
                }
                match results.next() {
                    Some(Ok(value)) => {
                        let (got, expected) = if expect_node {
                            (value.into_flat(), expected.into_flat())
                        } else {
                            (value, expected)
                        };
                        let passed = compare(&got, &expected, options);
                        outcome.finished(passed, got.to_string())
                    }
                    Some(Err(error)) => outcome.failed(error),
                    None => outcome.failed(ExecutionError::Crashed("no result recorded".to_string())),
                }
            })
            .collect();
        Ok(outcomes)
    }

    /// Runs the entry-point harness over every prepared case. The harness
    /// bounds each call by the case timeout. A case that takes the whole
    /// process down anyway gets the process failure, and a fresh harness
    /// resumes after it.
    fn execute_job(
        &self,
        code: &str,
        plan: &EntryPointPlan,
        job_cases: &[Vec<JsonValue>],
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<Result<Value, ExecutionError>>, JudgeError> {
        let count = job_cases.len();
        let mut values: Vec<Option<Result<Value, ExecutionError>>> = vec![None; count];
        let mut start = 0;
        while start < count {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                break;
            }
            let (workspace, args) = match self.prepare_job(code, plan, &job_cases[start..]) {
                Ok(prepared) => prepared,
                Err(e) => {
                    warn!(error = %e, "could not prepare entry-point job");
                    let error = ExecutionError::from(e);
                    for slot in &mut values[start..] {
                        *slot = Some(Err(error.clone()));
                    }
                    break;
                }
            };

            let process = self
                .executor
                .run_python(&workspace, &args, b"", self.settings.suite_timeout(), cancel);
            let records = match workspace.read_optional(RESULTS_FILE) {
                Ok(Some(text)) => harness::parse_records(&text),
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!(error = %e, "could not read harness results");
                    Vec::new()
                }
            };

            for record in records {
                match record {
                    HarnessRecord::SetupError { stage, message } => {
                        info!(%stage, %message, "submission setup failed");
                        return Err(JudgeError::Setup { stage, message });
                    }
                    HarnessRecord::Case { index, ok, value, error, timed_out } if start + index < count => {
                        values[start + index] = Some(if ok {
                            Ok(Value::from_wire(&value))
                        } else if timed_out {
                            Err(ExecutionError::TimedOut(self.settings.case_timeout()))
                        } else {
                            Err(ExecutionError::Raised(
                                error.unwrap_or_else(|| "unknown error".to_string()),
                            ))
                        });
                    }
                    HarnessRecord::Case { index, .. } => debug!(index, "ignoring out-of-range record"),
                }
            }

            let Some(gap) = (start..count).find(|&index| values[index].is_none()) else {
                break;
            };
            // The first case without a record is the one that stopped the process.
            let failure = match process {
                Ok(result) => match result.into_outcome() {
                    Ok(_) => ExecutionError::Crashed("harness produced no result".to_string()),
                    Err(error) => error,
                },
                Err(e) => ExecutionError::from(e),
            };
            debug!(index = gap, error = %failure, "harness stopped early, resuming after the failed case");
            values[gap] = Some(Err(failure));
            start = gap + 1;
        }

        Ok(values
            .into_iter()
            .map(|value| value.unwrap_or(Err(ExecutionError::Cancelled)))
            .collect())
    }

    fn prepare_job(
        &self,
        code: &str,
        plan: &EntryPointPlan,
        job_cases: &[Vec<JsonValue>],
    ) -> Result<(Workspace, Vec<String>), SandboxError> {
        let workspace = self.executor.workspace()?;
        let wrapped = harness::wrap_submission(&workspace, code, HarnessKind::EntryPoint)?;
        let job = EntryPointJob {
            module: &wrapped.module_name,
            class_name: &plan.class_name,
            method: &plan.method,
            expect_kind: plan.expect_kind,
            case_timeout_ms: self.settings.case_timeout_ms,
            cases: job_cases,
        };
        let encoded = serde_json::to_string(&job).map_err(|e| SandboxError::Io(e.into()))?;
        workspace.write(CASES_FILE, &encoded)?;
        let args = wrapped.args(&[CASES_FILE, RESULTS_FILE]);
        Ok((workspace, args))
    }

    /// Judges a request end to end. Never fails: problems become a `wrong`
    /// verdict with an explanation.
    pub fn evaluate(&self, request: &JudgeRequest) -> JudgeResponse {
        if let (Some(output), [case]) = (&request.user_output, request.tests.as_slice()) {
            let expected = normalize_text(&case.expected_text());
            let actual = normalize_text(output);
            info!(passed = actual == expected, "judged direct output");
            return if actual == expected {
                JudgeResponse::correct("Output matches the expected answer.".to_string())
            } else {
                JudgeResponse::wrong(format!("expected:\n{expected}\n\nactual:\n{actual}"))
            };
        }

        if request.tests.is_empty() {
            return JudgeResponse::rejected("no test cases to judge against");
        }
        let code = dedent(&request.code);
        if code.trim().is_empty() {
            return JudgeResponse::rejected("no code submitted");
        }

        let mode = self.select_mode(&code, request);
        let options = self.request_options(request);
        match self.judge(&code, &request.tests, &mode, options, None) {
            Ok(verdict) if verdict.passed => JudgeResponse::correct(verdict.render_log()),
            Ok(verdict) => JudgeResponse::wrong(format!(
                "{} of {} cases failed.\n\n{}",
                verdict.failed_count(),
                verdict.outcomes.len(),
                verdict.render_log()
            )),
            Err(e) => JudgeResponse::wrong(format!("[setup error] {e}")),
        }
    }
}

fn render_call(method: &str, args: &[Value]) -> String {
    let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
    format!("{method}({})", rendered.join(", "))
}
