use tribunal_core::config::TribunalConfig;
use tribunal_core::evolution::TestEvolver;
use tribunal_core::executor::SandboxExecutor;
use tribunal_core::fitness::CoverageFitness;
use tribunal_core::judge::{ForceMode, Judge, JudgeMode, JudgeRequest};
use tribunal_core::marshal::BuildSpec;
use tribunal_core::mutation::MutationTester;
use tribunal_core::oracle::CommandOracle;
use tribunal_core::problem::load_problem;
use tribunal_core::signature::{infer_arg_names, infer_entry_point};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration; defaults to ./tribunal.toml when present.
    #[clap(short, long = "config", value_parser, global = true)]
    config_file: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Judge a submission and print the verdict as JSON.
    Judge(JudgeArgs),
    /// Print the entry point, argument names and mode inferred for a submission.
    Infer(ProblemArgs),
    /// Evolve test inputs for a program by line coverage.
    Evolve(EvolveArgs),
    /// Score a suite against oracle-generated mutants and add killer cases.
    Mutate(ProblemArgs),
}

#[derive(Args, Debug)]
struct ProblemArgs {
    /// Submission source file.
    #[clap(long)]
    code: PathBuf,
    /// Problem JSON file supplying the test cases.
    #[clap(long)]
    problem: PathBuf,
    #[clap(long, default_value_t = 0)]
    practice_idx: usize,
}

#[derive(Args, Debug)]
struct JudgeArgs {
    /// Full judging request as JSON. Replaces every other option.
    #[clap(long, conflicts_with_all = ["code", "problem"])]
    request: Option<PathBuf>,
    #[clap(long, requires = "problem")]
    code: Option<PathBuf>,
    #[clap(long, requires = "code")]
    problem: Option<PathBuf>,
    #[clap(long, default_value_t = 0)]
    practice_idx: usize,
    #[clap(long)]
    method: Option<String>,
    /// Comma-separated argument names.
    #[clap(long, value_delimiter = ',')]
    arg_names: Option<Vec<String>>,
    /// Comma-separated build specs (raw, linked-list, tree), one per argument.
    #[clap(long, value_delimiter = ',')]
    build: Vec<BuildSpec>,
    #[clap(long)]
    expect_kind: Option<BuildSpec>,
    #[clap(long)]
    float_tol: Option<f64>,
    #[clap(long)]
    unordered: bool,
    /// Always judge on whole program output.
    #[clap(long)]
    whole_text: bool,
}

#[derive(Args, Debug)]
struct EvolveArgs {
    #[clap(long)]
    code: PathBuf,
    #[clap(short, long)]
    generations: Option<usize>,
    #[clap(long)]
    population_size: Option<usize>,
    #[clap(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config_file.as_deref())?;
    let executor = SandboxExecutor::new(config.sandbox.clone());

    let output = match cli.command {
        Commands::Judge(args) => {
            let request = build_request(&args)?;
            let judge = Judge::new(executor, config.judge.clone());
            serde_json::to_value(judge.evaluate(&request))?
        }
        Commands::Infer(args) => {
            let code = read_source(&args.code)?;
            let problem = load_problem(&args.problem, args.practice_idx)?;
            let judge = Judge::new(executor, config.judge.clone());
            let request = JudgeRequest {
                code: code.clone(),
                tests: problem.tests.clone(),
                force_mode: problem.force_mode,
                ..JudgeRequest::default()
            };
            let mode = match judge.select_mode(&code, &request) {
                JudgeMode::WholeText => "whole-text",
                JudgeMode::EntryPoint(_) => "entry-point",
            };
            json!({
                "entry_point": infer_entry_point(&code, &config.judge.class_name),
                "arg_names": infer_arg_names(&problem.tests),
                "mode": mode,
            })
        }
        Commands::Evolve(args) => {
            let code = read_source(&args.code)?;
            let mut settings = config.evolution.clone();
            if let Some(generations) = args.generations {
                settings.generations = generations;
            }
            if let Some(size) = args.population_size {
                settings.population_size = size;
            }
            let seed = args.seed.or(settings.seed).unwrap_or(0);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);

            let fitness = CoverageFitness::new(executor.clone(), settings.trace_timeout());
            let mut oracle = command_oracle(&config, executor)?;
            info!(seed, generations = settings.generations, "starting test evolution");
            let report = TestEvolver::new(&fitness, &mut oracle, settings).evolve(&code, &mut rng);

            let population: Vec<_> = report
                .population
                .iter()
                .map(|individual| {
                    json!({
                        "input": individual.candidate.input,
                        "output": individual.candidate.output,
                        "fitness": individual.fitness,
                        "uncovered_lines": individual.uncovered,
                    })
                })
                .collect();
            json!({
                "total_lines": report.total_lines,
                "best_fitness": report.best_fitness,
                "oracle_failures": report.oracle_failures,
                "population": population,
                "tests": report.test_cases(),
            })
        }
        Commands::Mutate(args) => {
            let code = read_source(&args.code)?;
            let problem = load_problem(&args.problem, args.practice_idx)?;
            let judge = Judge::new(executor.clone(), config.judge.clone());
            let request = JudgeRequest {
                code: code.clone(),
                tests: problem.tests.clone(),
                force_mode: problem.force_mode,
                ..JudgeRequest::default()
            };
            let mode = judge.select_mode(&code, &request);
            let mut oracle = command_oracle(&config, executor)?;
            let mut tests = problem.tests;
            let report = MutationTester::new(&judge, &mut oracle, config.mutation.clone()).run(
                &code,
                &mut tests,
                &mode,
            );
            json!({ "report": report, "tests": tests })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<TribunalConfig, anyhow::Error> {
    match path {
        Some(path) => {
            info!(?path, "loading configuration");
            TribunalConfig::load_from_file(path)
        }
        None => {
            let default_path = Path::new("tribunal.toml");
            if default_path.exists() {
                info!(path = ?default_path, "loading default configuration");
                TribunalConfig::load_from_file(default_path)
            } else {
                info!("no configuration file found, using built-in defaults");
                Ok(TribunalConfig::default())
            }
        }
    }
}

fn read_source(path: &Path) -> Result<String, anyhow::Error> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read source file {path:?}"))
}

fn command_oracle(config: &TribunalConfig, executor: SandboxExecutor) -> Result<CommandOracle, anyhow::Error> {
    if config.oracle.command.is_empty() {
        bail!("this command needs an oracle; set [oracle] command in the configuration");
    }
    Ok(CommandOracle::new(&config.oracle, executor))
}

fn build_request(args: &JudgeArgs) -> Result<JudgeRequest, anyhow::Error> {
    if let Some(path) = &args.request {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file {path:?}"))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse request JSON from {path:?}"));
    }

    let (Some(code_path), Some(problem_path)) = (&args.code, &args.problem) else {
        bail!("either --request or both --code and --problem are required");
    };
    let problem = load_problem(problem_path, args.practice_idx)?;
    let force_mode = if args.whole_text {
        Some(ForceMode::WholeText)
    } else {
        problem.force_mode
    };
    Ok(JudgeRequest {
        problem_id: None,
        code: read_source(code_path)?,
        user_output: None,
        tests: problem.tests,
        class_name: None,
        entry_point: args.method.clone(),
        arg_names: args.arg_names.clone(),
        build_specs: args.build.clone(),
        expect_kind: args.expect_kind,
        float_tol: args.float_tol,
        unordered: args.unordered.then_some(true),
        force_mode,
    })
}
