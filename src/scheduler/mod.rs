//! Per-agent genetic-algorithm scheduler (§4.8): turns a pool of candidate sub-activities into a
//! feasible, high-payoff subset, with built-in bias to keep already-confirmed activities stable.

pub mod chromosome;
pub mod operators;

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::SchedulerError;
use crate::resource::ResourceLedger;
use chromosome::Chromosome;
use operators::{crossover, mutate, roulette_select, select_environment, tournament_select, CrossoverType, EnvironSelType, ParentSelType};

/// One candidate sub-activity offered to the scheduler: its time span, its aggregated payoff, and
/// (if it overlaps an already-existing activity) the link to that previous solution.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub t0: f64,
    pub t1: f64,
    pub payoff: f64,
    /// Resource name -> consumption/production rate while this candidate is active.
    pub resource_rates: HashMap<String, f64>,
    /// Index of the previous-solution activity this candidate would re-enable, if any.
    pub prev_solution: Option<usize>,
    /// Whether that previous solution is already confirmed (protects the bit from flipping).
    pub prev_confirmed: bool,
}

/// GA tuning parameters, loaded from configuration (§12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaParams {
    pub population_size: usize,
    pub ga_generations: usize,
    pub ga_timeout: usize,
    pub ga_min_improvement_rate: f64,
    pub ga_mutation_rate: f64,
    pub crossover: CrossoverType,
    pub crossover_points: usize,
    pub parent_sel: ParentSelType,
    pub tournament_k: usize,
    pub environ_sel: EnvironSelType,
    /// Boost applied to a bit's payoff contribution when it re-enables a previous solution.
    pub lambda: f64,
}

impl Default for GaParams {
    fn default() -> Self {
        GaParams {
            population_size: 40,
            ga_generations: 100,
            ga_timeout: 20,
            ga_min_improvement_rate: 1e-4,
            ga_mutation_rate: 0.02,
            crossover: CrossoverType::Uniform,
            crossover_points: 2,
            parent_sel: ParentSelType::Tournament,
            tournament_k: 3,
            environ_sel: EnvironSelType::Elitist,
            lambda: 1.5,
        }
    }
}

const M_BIG_COEFF: f64 = 1e6;

/// Outcome of a completed run: new activities to create (as coalesced `(t0, t1)` spans) and the
/// indices of previous-solution activities whose bit ended up cleared (to be discarded).
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub new_spans: Vec<(f64, f64)>,
    pub discard: Vec<usize>,
    pub best_fitness: f64,
}

pub struct GAScheduler<'a> {
    candidates: &'a [Candidate],
    params: &'a GaParams,
    resources: &'a ResourceLedger,
}

impl<'a> GAScheduler<'a> {
    pub fn new(candidates: &'a [Candidate], params: &'a GaParams, resources: &'a ResourceLedger) -> Result<Self, SchedulerError> {
        if candidates.is_empty() {
            return Err(SchedulerError::EmptyCandidateSet);
        }
        Ok(GAScheduler {
            candidates,
            params,
            resources,
        })
    }

    fn protected_indices(&self) -> Vec<usize> {
        self.candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.prev_confirmed)
            .map(|(i, _)| i)
            .collect()
    }

    /// Sum-of-aggregated-payoffs over selected bits, with a `lambda` boost on bits that re-enable
    /// a previous-solution confirmed activity; a trial run over a cloned resource ledger checks
    /// feasibility and produces the consumption-normalisation term; infeasible chromosomes are
    /// divided by a large constant rather than rejected outright, to retain a gradient.
    fn evaluate(&self, chromosome: &mut Chromosome) {
        let mut payoff_sum = 0.0;
        let mut selected: Vec<usize> = Vec::new();
        for (i, c) in self.candidates.iter().enumerate() {
            if chromosome.get(i) {
                let boosted = if c.prev_solution.is_some() && c.prev_confirmed {
                    c.payoff * self.params.lambda
                } else {
                    c.payoff
                };
                payoff_sum += boosted;
                selected.push(i);
            }
        }
        selected.sort_by(|&a, &b| self.candidates[a].t0.partial_cmp(&self.candidates[b].t0).unwrap());

        let mut trial = self.resources.clone();
        let mut valid = true;
        for &i in &selected {
            let candidate = &self.candidates[i];
            let duration = candidate.t1 - candidate.t0;
            for (name, rate) in &candidate.resource_rates {
                if let Some(resource) = trial.get_mut(name) {
                    if resource.apply_for(*rate, duration).is_err() {
                        valid = false;
                    }
                }
            }
        }

        let consumption_ratios: Vec<f64> = trial
            .values()
            .map(|r| (r.max_capacity() - r.capacity()).abs() / r.max_capacity().max(1e-9))
            .collect();
        let avg_consumption = if consumption_ratios.is_empty() {
            1.0
        } else {
            consumption_ratios.iter().sum::<f64>() / consumption_ratios.len() as f64
        };

        let n = self.candidates.len() as f64;
        let richness = (selected.len() as f64 + 1.0) / (n + 1.0);
        let mut fitness = (payoff_sum / avg_consumption.max(1e-9)) * richness;
        if !valid {
            fitness /= M_BIG_COEFF;
        }

        chromosome.fitness = fitness;
        chromosome.valid = valid;
    }

    fn random_chromosome(&self, protected: &[usize], rng: &mut impl Rng) -> Chromosome {
        let len = self.candidates.len();
        let mut bits = vec![false; len];
        for b in bits.iter_mut() {
            *b = rng.random_bool(0.3);
        }
        let mut c = Chromosome::new(bits);
        c.enforce_protected(protected);
        c
    }

    /// Runs the full generational loop and returns the best individual found plus the coalesced
    /// output activities and discard list (§4.8 "Output").
    #[instrument(skip(self, rng), fields(n_candidates = self.candidates.len()))]
    pub fn run(&self, rng: &mut impl Rng) -> ScheduleOutcome {
        let protected = self.protected_indices();
        let pop_size = self.params.population_size.max(2);

        let mut population: Vec<Chromosome> = (0..pop_size).map(|_| self.random_chromosome(&protected, rng)).collect();
        for c in &mut population {
            self.evaluate(c);
        }

        let mut best_fitness = population.iter().map(|c| c.fitness).fold(f64::NEG_INFINITY, f64::max);
        let mut stall_count = 0usize;
        let mut improvement_history: Vec<f64> = Vec::new();
        let warmup = self.params.ga_generations / 2;

        for generation in 0..self.params.ga_generations {
            let mut children = Vec::with_capacity(pop_size);
            while children.len() < pop_size {
                let (a, b) = match self.params.parent_sel {
                    ParentSelType::Tournament => (
                        tournament_select(&population, self.params.tournament_k, rng),
                        tournament_select(&population, self.params.tournament_k, rng),
                    ),
                    ParentSelType::Roulette => (roulette_select(&population, rng), roulette_select(&population, rng)),
                };
                let mut child = crossover(a, b, self.params.crossover, self.params.crossover_points, rng);
                mutate(&mut child, self.params.ga_mutation_rate, &protected, rng);
                self.evaluate(&mut child);
                children.push(child);
            }

            population = select_environment(population, children, self.params.environ_sel, pop_size);

            let generation_best = population.iter().map(|c| c.fitness).fold(f64::NEG_INFINITY, f64::max);
            let improvement = generation_best - best_fitness;
            if improvement > 0.0 {
                best_fitness = generation_best;
                stall_count = 0;
            } else {
                stall_count += 1;
            }
            if generation >= warmup {
                improvement_history.push(improvement.max(0.0));
            }

            debug!(generation, best_fitness, stall_count, "generation complete");

            if stall_count >= self.params.ga_timeout {
                debug!(generation, "terminating: stalled past ga_timeout");
                break;
            }
            if generation >= warmup && !improvement_history.is_empty() {
                let rate = improvement_history.iter().sum::<f64>() / improvement_history.len() as f64;
                if rate < self.params.ga_min_improvement_rate {
                    debug!(generation, rate, "terminating: improvement rate below threshold");
                    break;
                }
            }
        }

        let best = population
            .into_iter()
            .max_by(|a, b| a.fitness.partial_cmp(&b.fitness).unwrap())
            .expect("population is never empty");

        ScheduleOutcome {
            new_spans: self.coalesce(&best),
            discard: self.discarded_prev_solutions(&best),
            best_fitness: best.fitness,
        }
    }

    /// Coalesces contiguous runs of selected candidates whose intervals are time-contiguous into
    /// single output spans.
    fn coalesce(&self, best: &Chromosome) -> Vec<(f64, f64)> {
        let mut order: Vec<usize> = (0..self.candidates.len()).filter(|&i| best.get(i)).collect();
        order.sort_by(|&a, &b| self.candidates[a].t0.partial_cmp(&self.candidates[b].t0).unwrap());

        let mut spans: Vec<(f64, f64)> = Vec::new();
        for i in order {
            let c = &self.candidates[i];
            match spans.last_mut() {
                Some((_, end)) if (*end - c.t0).abs() < 1e-9 => *end = c.t1,
                _ => spans.push((c.t0, c.t1)),
            }
        }
        spans
    }

    fn discarded_prev_solutions(&self, best: &Chromosome) -> Vec<usize> {
        self.candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.prev_solution.filter(|_| !best.get(i)))
            .collect()
    }
}
