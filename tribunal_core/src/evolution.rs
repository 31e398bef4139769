//! Coverage-guided genetic search over candidate test inputs.
//!
//! Every generation is scored, sorted by fitness (stable, so ties keep their
//! order), and the top half survives as elites. The rest of the next
//! generation comes from the oracle: either a crossover of two elites or a
//! feedback mutation of one elite aimed at the lines it left uncovered. A slot
//! the oracle fails to fill gets an empty placeholder, so the population size
//! never changes.

use crate::config::EvolutionSettings;
use crate::fitness::{Fitness, FitnessScore};
use crate::oracle::{self, CandidateOracle, OracleRequest};
use crate::testcase::{CaseKind, TestCase};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// A candidate test: stdin text and the output the oracle expects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Candidate {
    pub input: String,
    pub output: String,
}

impl Candidate {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// Filler for a slot the oracle could not fill.
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    pub fn to_test_case(&self, kind: CaseKind) -> TestCase {
        TestCase::new(self.input.as_str(), self.output.as_str()).with_kind(kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    pub candidate: Candidate,
    pub fitness: usize,
    pub uncovered: BTreeSet<usize>,
}

#[derive(Debug, Clone)]
pub struct EvolutionReport {
    /// Final population, best first.
    pub population: Vec<Individual>,
    /// Best fitness of each scored generation, the final one included.
    pub best_fitness: Vec<usize>,
    pub total_lines: usize,
    pub oracle_failures: usize,
}

impl EvolutionReport {
    pub fn best(&self) -> Option<&Individual> {
        self.population.first()
    }

    /// Distinct non-placeholder candidates as test cases, best first.
    pub fn test_cases(&self) -> Vec<TestCase> {
        let mut seen = HashSet::new();
        self.population
            .iter()
            .filter(|individual| !individual.candidate.is_placeholder())
            .filter(|individual| seen.insert(individual.candidate.input.clone()))
            .map(|individual| individual.candidate.to_test_case(CaseKind::Normal))
            .collect()
    }
}

pub struct TestEvolver<'a, F: Fitness + ?Sized, O: CandidateOracle + ?Sized> {
    fitness: &'a F,
    oracle: &'a mut O,
    settings: EvolutionSettings,
    memo: HashMap<[u8; 16], FitnessScore>,
    oracle_failures: usize,
}

impl<'a, F: Fitness + ?Sized, O: CandidateOracle + ?Sized> TestEvolver<'a, F, O> {
    pub fn new(fitness: &'a F, oracle: &'a mut O, settings: EvolutionSettings) -> Self {
        Self {
            fitness,
            oracle,
            settings,
            memo: HashMap::new(),
            oracle_failures: 0,
        }
    }

    /// Asks the oracle for an initial population, then evolves it.
    pub fn evolve<R: Rng + ?Sized>(&mut self, code: &str, rng: &mut R) -> EvolutionReport {
        let size = self.population_size();
        let initial = self
            .ask(&OracleRequest::InitialPopulation { code, size })
            .map(|answer| oracle::parse_population(&answer))
            .unwrap_or_default();
        if initial.len() < size {
            self.oracle_failures += size - initial.len();
        }
        self.evolve_from(code, initial, rng)
    }

    /// Evolves `initial` (truncated or padded to the population size) for the
    /// configured number of generations.
    pub fn evolve_from<R: Rng + ?Sized>(
        &mut self,
        code: &str,
        initial: Vec<Candidate>,
        rng: &mut R,
    ) -> EvolutionReport {
        let size = self.population_size();
        let crossover_probability = self.settings.crossover_probability.clamp(0.0, 1.0);
        let mut population = fit_to_size(initial, size);
        let mut best_fitness = Vec::with_capacity(self.settings.generations + 1);

        for generation in 0..self.settings.generations {
            let scored = self.score(code, population);
            let best = scored.first().map_or(0, |i| i.fitness);
            best_fitness.push(best);
            info!(generation, best, size, "generation scored");

            let frontier = uncovered_frontier(&scored);
            let elites: Vec<Individual> = scored.into_iter().take(size.div_ceil(2)).collect();
            let mut next: Vec<Candidate> = elites.iter().map(|e| e.candidate.clone()).collect();

            while next.len() < size {
                let child = if elites.len() >= 2 && rng.random_bool(crossover_probability) {
                    let first = rng.random_range(0..elites.len());
                    let mut second = rng.random_range(0..elites.len() - 1);
                    if second >= first {
                        second += 1;
                    }
                    self.crossover(code, &elites[first].candidate, &elites[second].candidate)
                } else {
                    let parent = &elites[rng.random_range(0..elites.len())];
                    let target = if parent.uncovered.is_empty() {
                        &frontier
                    } else {
                        &parent.uncovered
                    };
                    self.feedback_mutation(code, &parent.candidate, target)
                };
                next.push(child.unwrap_or_else(|| {
                    self.oracle_failures += 1;
                    Candidate::placeholder()
                }));
            }
            population = next;
        }

        let final_population = self.score(code, population);
        best_fitness.push(final_population.first().map_or(0, |i| i.fitness));
        let total_lines = self.memo.values().next().map_or(0, |s| s.total_lines);
        info!(
            best = best_fitness.last().copied().unwrap_or(0),
            total_lines,
            oracle_failures = self.oracle_failures,
            "evolution finished"
        );
        EvolutionReport {
            population: final_population,
            best_fitness,
            total_lines,
            oracle_failures: self.oracle_failures,
        }
    }

    fn population_size(&self) -> usize {
        self.settings.population_size.max(1)
    }

    fn score(&mut self, code: &str, population: Vec<Candidate>) -> Vec<Individual> {
        let mut scored: Vec<Individual> = population
            .into_iter()
            .map(|candidate| {
                let key = md5::compute(candidate.input.as_bytes()).0;
                let score = match self.memo.get(&key) {
                    Some(score) => score.clone(),
                    None => {
                        let score = self.fitness.evaluate(code, &candidate.input);
                        debug!(fitness = score.score, total = score.total_lines, "scored candidate");
                        self.memo.insert(key, score.clone());
                        score
                    }
                };
                Individual {
                    candidate,
                    fitness: score.score,
                    uncovered: score.uncovered,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.fitness.cmp(&a.fitness));
        scored
    }

    fn crossover(&mut self, code: &str, first: &Candidate, second: &Candidate) -> Option<Candidate> {
        let answer = self.ask(&OracleRequest::Crossover { code, first, second })?;
        oracle::parse_candidate(&answer)
    }

    fn feedback_mutation(
        &mut self,
        code: &str,
        parent: &Candidate,
        uncovered: &BTreeSet<usize>,
    ) -> Option<Candidate> {
        let answer = self.ask(&OracleRequest::FeedbackMutation {
            code,
            parent,
            uncovered_lines: uncovered.iter().copied().collect(),
        })?;
        oracle::parse_candidate(&answer)
    }

    fn ask(&mut self, request: &OracleRequest<'_>) -> Option<String> {
        match self.oracle.generate(request) {
            Ok(answer) => Some(answer),
            Err(e) => {
                warn!(oracle = self.oracle.name(), kind = request.kind(), error = %e, "oracle request failed");
                None
            }
        }
    }
}

fn fit_to_size(mut candidates: Vec<Candidate>, size: usize) -> Vec<Candidate> {
    candidates.truncate(size);
    candidates.resize_with(size, Candidate::placeholder);
    candidates
}

/// Lines no individual in the generation has executed.
fn uncovered_frontier(scored: &[Individual]) -> BTreeSet<usize> {
    let Some((first, rest)) = scored.split_first() else {
        return BTreeSet::new();
    };
    first
        .uncovered
        .iter()
        .copied()
        .filter(|line| rest.iter().all(|other| other.uncovered.contains(line)))
        .collect()
}
