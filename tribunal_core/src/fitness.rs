use crate::executor::{ExecutionError, ExecutionResult, SandboxExecutor, Workspace};
use crate::harness::{self, COVERAGE_FILE, CoverageReport, CoverageStatus, EXECUTABLE_FILE, HarnessKind};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Line coverage achieved by one candidate input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitnessScore {
    /// Number of executable lines run, in `0..=total_lines`.
    pub score: usize,
    pub uncovered: BTreeSet<usize>,
    pub total_lines: usize,
}

impl FitnessScore {
    /// Score of a candidate that did not run to completion.
    pub fn worst(source_lines: &BTreeSet<usize>) -> Self {
        Self {
            score: 0,
            uncovered: source_lines.clone(),
            total_lines: source_lines.len(),
        }
    }

    pub fn from_executed(source_lines: &BTreeSet<usize>, executed: &BTreeSet<usize>) -> Self {
        Self {
            score: source_lines.intersection(executed).count(),
            uncovered: source_lines.difference(executed).copied().collect(),
            total_lines: source_lines.len(),
        }
    }
}

pub trait Fitness: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scores `candidate_input` fed as stdin to `code`. Never fails: any
    /// execution problem yields the worst score.
    fn evaluate(&self, code: &str, candidate_input: &str) -> FitnessScore;
}

/// One-based line numbers of non-blank, non-comment lines. Stands in for
/// the executable lines when the submission does not compile.
pub fn source_lines(code: &str) -> BTreeSet<usize> {
    code.lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(i, _)| i + 1)
        .collect()
}

/// Traces the submission under the coverage harness.
#[derive(Debug, Clone)]
pub struct CoverageFitness {
    executor: SandboxExecutor,
    timeout: Duration,
}

impl CoverageFitness {
    pub fn new(executor: SandboxExecutor, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    fn trace(&self, code: &str, candidate_input: &str) -> Result<Trace, ExecutionError> {
        let workspace = self.executor.workspace()?;
        let wrapped = harness::wrap_submission(&workspace, code, HarnessKind::Coverage)?;
        let process = self.executor.run_python(
            &workspace,
            &wrapped.args(&[COVERAGE_FILE, EXECUTABLE_FILE]),
            candidate_input.as_bytes(),
            self.timeout,
            None,
        );

        let executable = match workspace.read_optional(EXECUTABLE_FILE) {
            Ok(Some(text)) => serde_json::from_str::<Vec<usize>>(&text)
                .ok()
                .map(|lines| lines.into_iter().collect()),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "could not read executable lines");
                None
            }
        };
        let executed = process
            .map_err(ExecutionError::from)
            .and_then(ExecutionResult::into_outcome)
            .and_then(|_| read_report(&workspace));
        Ok(Trace { executable, executed })
    }
}

/// Outcome of one traced run.
struct Trace {
    /// Lines that carry bytecode; absent when the unit did not compile.
    executable: Option<BTreeSet<usize>>,
    executed: Result<BTreeSet<usize>, ExecutionError>,
}

fn read_report(workspace: &Workspace) -> Result<BTreeSet<usize>, ExecutionError> {
    let text = workspace
        .read_optional(COVERAGE_FILE)?
        .ok_or_else(|| ExecutionError::Crashed("coverage report missing".to_string()))?;
    let report: CoverageReport = serde_json::from_str(&text)
        .map_err(|e| ExecutionError::Crashed(format!("malformed coverage report: {e}")))?;
    match report.status {
        CoverageStatus::Ok => Ok(report.lines.into_iter().collect()),
        CoverageStatus::Error => Err(ExecutionError::Raised(
            report.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
    }
}

impl Fitness for CoverageFitness {
    fn name(&self) -> &'static str {
        "CoverageFitness"
    }

    fn evaluate(&self, code: &str, candidate_input: &str) -> FitnessScore {
        let (executable, executed) = match self.trace(code, candidate_input) {
            Ok(Trace { executable, executed }) => (executable, executed),
            Err(reason) => (None, Err(reason)),
        };
        let lines = executable.unwrap_or_else(|| source_lines(code));
        match executed {
            Ok(executed) => FitnessScore::from_executed(&lines, &executed),
            Err(reason) => {
                debug!(%reason, "candidate input scored as worst case");
                FitnessScore::worst(&lines)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxSettings;
    use crate::test_support::{python_available, target};

    fn fitness() -> CoverageFitness {
        CoverageFitness::new(SandboxExecutor::new(SandboxSettings::default()), Duration::from_secs(5))
    }

    #[test]
    fn source_lines_skip_blanks_and_comments() {
        let code = "# header\nx = 1\n\n   # note\nif x:\n    print(x)\n";
        assert_eq!(source_lines(code), BTreeSet::from([2, 5, 6]));
    }

    #[test]
    fn score_counts_executed_source_lines_only() {
        let lines = BTreeSet::from([1, 2, 4]);
        let executed = BTreeSet::from([1, 3, 4]);
        let score = FitnessScore::from_executed(&lines, &executed);
        assert_eq!(score.score, 2);
        assert_eq!(score.uncovered, BTreeSet::from([2]));
        assert_eq!(score.total_lines, 3);
        assert_eq!(FitnessScore::worst(&lines).score, 0);
    }

    #[test]
    fn branches_change_the_score() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let code = target("classify.py");
        let negative = fitness().evaluate(&code, "-4\n");
        let positive = fitness().evaluate(&code, "4\n");
        assert!(negative.score > 0);
        assert!(positive.score > 0);
        assert_ne!(negative.uncovered, positive.uncovered);
        assert!(negative.score <= negative.total_lines);
    }

    #[test]
    fn failing_candidate_scores_zero() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let code = target("classify.py");
        let score = fitness().evaluate(&code, "not a number\n");
        assert_eq!(score.score, 0);
        assert_eq!(score.uncovered.len(), score.total_lines);
        assert!(score.total_lines > 0);
    }

    #[test]
    fn lines_without_bytecode_are_not_counted() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let code = target("classify.py");
        let runs: Vec<FitnessScore> = ["-1\n", "0\n", "5\n"]
            .iter()
            .map(|input| fitness().evaluate(&code, input))
            .collect();
        // Line 6 is a bare `else:`.
        assert!(runs.iter().all(|run| !run.uncovered.contains(&6)));
        let never_run = runs
            .iter()
            .map(|run| run.uncovered.clone())
            .reduce(|left, right| left.intersection(&right).copied().collect());
        assert_eq!(never_run, Some(BTreeSet::new()));
    }

    #[test]
    fn straight_line_program_is_fully_covered() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let code = "def double(n):\n    \"\"\"Return twice n.\"\"\"\n    return n * 2\n\nprint(double(int(input())))\n";
        let score = fitness().evaluate(code, "4\n");
        assert!(score.uncovered.is_empty(), "{score:?}");
        assert_eq!(score.score, score.total_lines);
        assert_eq!(score.total_lines, 3);
    }

    #[test]
    fn syntax_error_falls_back_to_source_lines() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let code = "x = (\nprint(x)\n";
        let score = fitness().evaluate(code, "");
        assert_eq!(score.score, 0);
        assert_eq!(score.uncovered, source_lines(code));
    }

    #[test]
    fn timeout_scores_zero() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let fitness = CoverageFitness::new(
            SandboxExecutor::new(SandboxSettings::default()),
            Duration::from_millis(300),
        );
        assert_eq!(fitness.evaluate(&target("spin.py"), "").score, 0);
    }
}
