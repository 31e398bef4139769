use crate::compare::CompareOptions;
use crate::config::MutationSettings;
use crate::judge::{Judge, JudgeMode};
use crate::oracle::{self, CandidateOracle, OracleRequest};
use crate::testcase::{CaseKind, TestCase};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A deliberately faulty variant of the reference solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutant {
    pub description: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutantOutcome {
    pub description: String,
    pub killed: bool,
    /// Why the mutant was killed: the first failing case, or the setup error.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationReport {
    /// Mutants judged; discarded ones are not counted.
    pub total: usize,
    pub killed: usize,
    pub score: f64,
    pub outcomes: Vec<MutantOutcome>,
    /// Cases appended to the suite to kill survivors.
    pub new_cases: Vec<TestCase>,
    /// Mutants dropped before judging, with the reason.
    pub discarded: Vec<String>,
}

/// `killed / total`, defined as 0 when no mutant was judged.
pub fn mutation_score(killed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        killed as f64 / total as f64
    }
}

/// Measures how well a suite tells the reference apart from faulty variants,
/// and strengthens it where it cannot.
pub struct MutationTester<'a, O: CandidateOracle + ?Sized> {
    judge: &'a Judge,
    oracle: &'a mut O,
    settings: MutationSettings,
    options: CompareOptions,
}

impl<'a, O: CandidateOracle + ?Sized> MutationTester<'a, O> {
    pub fn new(judge: &'a Judge, oracle: &'a mut O, settings: MutationSettings) -> Self {
        Self {
            options: judge.compare_options(),
            judge,
            oracle,
            settings,
        }
    }

    /// Generates mutants of `reference`, judges each against `cases`, and
    /// appends one killer case per surviving mutant to `cases`.
    pub fn run(&mut self, reference: &str, cases: &mut Vec<TestCase>, mode: &JudgeMode) -> MutationReport {
        let mut report = MutationReport::default();
        let mutants = self.request_mutants(reference, &mut report.discarded);

        let mut survivors = Vec::new();
        for mutant in mutants {
            let outcome = self.judge_mutant(&mutant, cases, mode);
            debug!(description = %outcome.description, killed = outcome.killed, "judged mutant");
            if outcome.killed {
                report.killed += 1;
            } else {
                survivors.push(mutant);
            }
            report.outcomes.push(outcome);
        }
        report.total = report.outcomes.len();
        report.score = mutation_score(report.killed, report.total);

        for survivor in &survivors {
            match self.discriminating_case(reference, survivor, cases) {
                Some(case) => {
                    cases.push(case.clone());
                    report.new_cases.push(case);
                }
                None => warn!(description = %survivor.description, "no killer case for surviving mutant"),
            }
        }

        info!(
            total = report.total,
            killed = report.killed,
            score = report.score,
            new_cases = report.new_cases.len(),
            discarded = report.discarded.len(),
            "mutation testing finished"
        );
        report
    }

    fn request_mutants(&mut self, reference: &str, discarded: &mut Vec<String>) -> Vec<Mutant> {
        let request = OracleRequest::Mutants {
            code: reference,
            count: self.settings.mutant_count,
        };
        let answer = match self.oracle.generate(&request) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(oracle = self.oracle.name(), error = %e, "mutant request failed");
                return Vec::new();
            }
        };

        let mut seen: HashSet<[u8; 16]> = HashSet::new();
        seen.insert(code_digest(reference));
        let mut mutants = Vec::new();
        for parsed in oracle::parse_mutants(&answer) {
            match parsed {
                Ok(mutant) if seen.insert(code_digest(&mutant.code)) => mutants.push(mutant),
                Ok(mutant) => {
                    debug!(description = %mutant.description, "dropping duplicate mutant");
                    discarded.push(format!("{}: identical to the reference or an earlier mutant", mutant.description));
                }
                Err(reason) => {
                    debug!(%reason, "dropping malformed mutant");
                    discarded.push(reason);
                }
            }
        }
        mutants
    }

    fn judge_mutant(&self, mutant: &Mutant, cases: &[TestCase], mode: &JudgeMode) -> MutantOutcome {
        let (killed, reason) = match self.judge.judge(&mutant.code, cases, mode, self.options, None) {
            Ok(verdict) => {
                let reason = verdict.outcomes.iter().find(|o| !o.passed).map(|o| {
                    match &o.error {
                        Some(error) => format!("case #{} failed: {error}", o.index + 1),
                        None => format!("case #{} produced a different answer", o.index + 1),
                    }
                });
                (!verdict.passed, reason)
            }
            Err(e) => (true, Some(e.to_string())),
        };
        MutantOutcome {
            description: mutant.description.clone(),
            killed,
            reason,
        }
    }

    fn discriminating_case(&mut self, reference: &str, mutant: &Mutant, cases: &[TestCase]) -> Option<TestCase> {
        let request = OracleRequest::DiscriminatingCase {
            code: reference,
            mutant,
            tests: cases,
        };
        match self.oracle.generate(&request) {
            Ok(answer) => oracle::parse_candidate(&answer).map(|c| c.to_test_case(CaseKind::MutationKiller)),
            Err(e) => {
                warn!(oracle = self.oracle.name(), error = %e, "discriminating case request failed");
                None
            }
        }
    }
}

/// Digest of code with trailing whitespace and blank lines ignored.
fn code_digest(code: &str) -> [u8; 16] {
    let normalized: Vec<&str> = code
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    md5::compute(normalized.join("\n")).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JudgeSettings, SandboxSettings};
    use crate::executor::SandboxExecutor;
    use crate::oracle::OracleError;
    use crate::test_support::{python_available, target};

    /// Returns a canned answer per request kind and records what it was asked.
    struct ScriptedOracle {
        mutants: String,
        killer: String,
        asked: Vec<&'static str>,
    }

    impl CandidateOracle for ScriptedOracle {
        fn name(&self) -> &'static str {
            "ScriptedOracle"
        }

        fn generate(&mut self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
            self.asked.push(request.kind());
            match request {
                OracleRequest::Mutants { .. } => Ok(self.mutants.clone()),
                OracleRequest::DiscriminatingCase { .. } => Ok(self.killer.clone()),
                _ => Err(OracleError::NotConfigured),
            }
        }
    }

    fn judge() -> Judge {
        Judge::new(SandboxExecutor::new(SandboxSettings::default()), JudgeSettings::default())
    }

    #[test]
    fn zero_mutants_score_zero() {
        assert_eq!(mutation_score(0, 0), 0.0);
        assert_eq!(mutation_score(1, 4), 0.25);

        let judge = judge();
        let mut oracle = ScriptedOracle {
            mutants: "nothing useful".into(),
            killer: String::new(),
            asked: Vec::new(),
        };
        let mut cases = vec![TestCase::new("1 2", "3")];
        let report = MutationTester::new(&judge, &mut oracle, MutationSettings::default()).run(
            "print(3)",
            &mut cases,
            &JudgeMode::WholeText,
        );
        assert_eq!(report.total, 0);
        assert_eq!(report.score, 0.0);
        assert_eq!(cases.len(), 1);
        assert_eq!(oracle.asked, ["mutants"]);
    }

    #[test]
    fn duplicates_and_malformed_mutants_are_discarded() {
        let judge = judge();
        let reference = "print(3)\n";
        let mutants = serde_json::json!([
            {"description": "same as reference", "code": "print(3)"},
            {"description": "missing code"},
            {"description": "first", "code": "print(4)"},
            {"description": "repeat of first", "code": "print(4)\n\n"},
        ])
        .to_string();
        let mut oracle = ScriptedOracle {
            mutants,
            killer: String::new(),
            asked: Vec::new(),
        };
        let mut tester = MutationTester::new(&judge, &mut oracle, MutationSettings::default());
        let mut discarded = Vec::new();
        let kept = tester.request_mutants(reference, &mut discarded);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].description, "first");
        assert_eq!(discarded.len(), 3);
    }

    #[test]
    fn survivors_get_killer_cases() {
        if !python_available() {
            eprintln!("skipping: python3 not found");
            return;
        }
        let judge = judge();
        let reference = target("sum_lines.py");
        let mutants = serde_json::json!([
            {"description": "subtracts", "code": "import sys\nnums = [int(t) for t in sys.stdin.read().split()]\nprint(nums[0] - nums[1])\n"},
            {"description": "ignores sign", "code": "import sys\nprint(sum(abs(int(t)) for t in sys.stdin.read().split()))\n"},
        ])
        .to_string();
        let mut oracle = ScriptedOracle {
            mutants,
            killer: r#"{"input": "-2 5", "output": "3"}"#.into(),
            asked: Vec::new(),
        };
        let mut cases = vec![TestCase::new("1 2", "3"), TestCase::new("4 4", "8")];
        let report = MutationTester::new(&judge, &mut oracle, MutationSettings::default()).run(
            &reference,
            &mut cases,
            &JudgeMode::WholeText,
        );

        assert_eq!(report.total, 2);
        assert_eq!(report.killed, 1);
        assert_eq!(report.score, 0.5);
        assert!(report.outcomes[0].killed);
        assert!(!report.outcomes[1].killed);
        assert_eq!(report.new_cases.len(), 1);
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[2].kind, CaseKind::MutationKiller);
        assert_eq!(oracle.asked, ["mutants", "discriminating_case"]);

        let rejudged = judge
            .judge(&reference, &cases, &JudgeMode::WholeText, CompareOptions::default(), None)
            .unwrap();
        assert!(rejudged.passed, "{}", rejudged.render_log());
    }
}
