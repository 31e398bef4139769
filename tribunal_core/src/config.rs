use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SandboxSettings {
    /// Interpreter argv; the harness path and its arguments are appended.
    #[serde(default = "default_python")]
    pub python: Vec<String>,
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_python() -> Vec<String> {
    vec!["python3".to_string(), "-B".to_string()]
}

pub fn default_max_output_bytes() -> usize {
    50_000
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            python: default_python(),
            workspace_root: None,
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct JudgeSettings {
    #[serde(default = "default_class_name")]
    pub class_name: String,
    #[serde(default = "default_float_tol")]
    pub float_tol: f64,
    #[serde(default)]
    pub unordered: bool,
    #[serde(default = "default_case_timeout_ms")]
    pub case_timeout_ms: u64,
    #[serde(default = "default_suite_timeout_ms")]
    pub suite_timeout_ms: u64,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Problem ids that are always judged on whole program output.
    #[serde(default)]
    pub whole_text_problems: Vec<String>,
}

pub fn default_class_name() -> String {
    "Solution".to_string()
}

fn default_float_tol() -> f64 {
    crate::compare::DEFAULT_FLOAT_TOLERANCE
}

fn default_case_timeout_ms() -> u64 {
    5000
}

fn default_suite_timeout_ms() -> u64 {
    10_000
}

pub fn default_threads() -> usize {
    1
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            class_name: default_class_name(),
            float_tol: default_float_tol(),
            unordered: false,
            case_timeout_ms: default_case_timeout_ms(),
            suite_timeout_ms: default_suite_timeout_ms(),
            threads: default_threads(),
            whole_text_problems: Vec::new(),
        }
    }
}

impl JudgeSettings {
    pub fn case_timeout(&self) -> Duration {
        Duration::from_millis(self.case_timeout_ms)
    }

    pub fn suite_timeout(&self) -> Duration {
        Duration::from_millis(self.suite_timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EvolutionSettings {
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_crossover_probability")]
    pub crossover_probability: f64,
    #[serde(default = "default_trace_timeout_ms")]
    pub trace_timeout_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_generations() -> usize {
    5
}

fn default_population_size() -> usize {
    8
}

fn default_crossover_probability() -> f64 {
    0.6
}

fn default_trace_timeout_ms() -> u64 {
    5000
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        Self {
            generations: default_generations(),
            population_size: default_population_size(),
            crossover_probability: default_crossover_probability(),
            trace_timeout_ms: default_trace_timeout_ms(),
            seed: None,
        }
    }
}

impl EvolutionSettings {
    pub fn trace_timeout(&self) -> Duration {
        Duration::from_millis(self.trace_timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MutationSettings {
    #[serde(default = "default_mutant_count")]
    pub mutant_count: usize,
}

fn default_mutant_count() -> usize {
    5
}

impl Default for MutationSettings {
    fn default() -> Self {
        Self {
            mutant_count: default_mutant_count(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct OracleSettings {
    /// External generator; receives one JSON request on stdin.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_oracle_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_oracle_timeout_ms() -> u64 {
    60_000
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_ms: default_oracle_timeout_ms(),
        }
    }
}

impl OracleSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TribunalConfig {
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub judge: JudgeSettings,
    #[serde(default)]
    pub evolution: EvolutionSettings,
    #[serde(default)]
    pub mutation: MutationSettings,
    #[serde(default)]
    pub oracle: OracleSettings,
}

impl TribunalConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
