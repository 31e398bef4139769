pub mod compare;
pub mod config;
pub mod evolution;
pub mod executor;
pub mod fitness;
pub mod harness;
pub mod judge;
pub mod marshal;
pub mod mutation;
pub mod oracle;
pub mod problem;
pub mod signature;
pub mod testcase;
pub mod value;

pub use compare::{CompareOptions, compare};
pub use config::TribunalConfig;
pub use evolution::{Candidate, EvolutionReport, Individual, TestEvolver};
pub use executor::{CancelToken, ExecutionError, ExecutionResult, SandboxError, SandboxExecutor};
pub use fitness::{CoverageFitness, Fitness, FitnessScore};
pub use judge::{
    CaseOutcome, EntryPointPlan, Judge, JudgeError, JudgeMode, JudgeRequest, JudgeResponse, Verdict,
};
pub use marshal::{BuildSpec, ListNode, MarshalError, TreeNode};
pub use mutation::{Mutant, MutationReport, MutationTester};
pub use oracle::{CandidateOracle, CommandOracle, OracleError, OracleRequest};
pub use problem::{LoadError, Problem, load_problem};
pub use signature::{infer_arg_names, infer_entry_point};
pub use testcase::{CaseKind, TestCase};
pub use value::{Value, parse_literal};
