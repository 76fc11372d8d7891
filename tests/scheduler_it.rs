//! Resource-limited GA scheduling scenario (S5) and the feasibility/coverage invariants (5, 6).

use std::collections::HashMap;

use aeodss_sim::resource::{Resource, ResourceKind, ResourceLedger};
use aeodss_sim::scheduler::operators::{CrossoverType, EnvironSelType, ParentSelType};
use aeodss_sim::scheduler::{Candidate, GAScheduler, GaParams};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn exhaustive_params() -> GaParams {
    GaParams {
        population_size: 30,
        ga_generations: 60,
        ga_timeout: 60,
        ga_min_improvement_rate: 0.0,
        ga_mutation_rate: 0.05,
        crossover: CrossoverType::Uniform,
        crossover_points: 2,
        parent_sel: ParentSelType::Tournament,
        tournament_k: 3,
        environ_sel: EnvironSelType::Elitist,
        lambda: 1.5,
    }
}

fn candidate(t0: f64, t1: f64, payoff: f64, rate: f64) -> Candidate {
    let mut rates = HashMap::new();
    rates.insert("battery".to_string(), rate);
    Candidate { t0, t1, payoff, resource_rates: rates, prev_solution: None, prev_confirmed: false }
}

/// S5: one resource of capacity 10, three non-overlapping candidates each needing rate 5 for 2
/// time-units (10 total apiece) -- only one can be afforded, so the scheduler never returns a
/// solution that would overrun the ledger if replayed in order.
#[test]
fn s5_resource_limited_scheduling_it() {
    let mut ledger = ResourceLedger::new();
    ledger.insert("battery".to_string(), Resource::new(ResourceKind::Depletable, "battery", 10.0, 0.0));

    let candidates = vec![candidate(0.0, 2.0, 1.0, 5.0), candidate(10.0, 12.0, 1.0, 5.0), candidate(20.0, 22.0, 1.0, 5.0)];

    let params = exhaustive_params();
    let scheduler = GAScheduler::new(&candidates, &params, &ledger).unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let outcome = scheduler.run(&mut rng);

    assert!(outcome.best_fitness.is_finite());
    assert!(outcome.new_spans.len() <= 2, "scheduler selected more than the scenario's upper bound of 2 of 3");

    // Invariant 5: replay the returned spans against a fresh copy of the ledger; none may
    // overrun, since each span's duration is known (rate is uniform across the three candidates).
    let mut trial = ledger.clone();
    for &(t0, t1) in &outcome.new_spans {
        let resource = trial.get_mut("battery").unwrap();
        assert!(resource.apply_for(5.0, t1 - t0).is_ok(), "returned schedule overruns the resource ledger on replay");
    }
}

/// Invariant 5, restated over a denser candidate pool: whatever spans the GA returns can always be
/// replayed against the original ledger copy without a single `apply_for` failing.
#[test]
fn invariant5_scheduler_feasibility_it() {
    let mut ledger = ResourceLedger::new();
    ledger.insert("battery".to_string(), Resource::new(ResourceKind::Depletable, "battery", 40.0, 2.0));

    let candidates: Vec<Candidate> = (0..8).map(|i| candidate(i as f64 * 10.0, i as f64 * 10.0 + 4.0, 1.0 + i as f64 * 0.1, 3.0)).collect();

    let params = exhaustive_params();
    let scheduler = GAScheduler::new(&candidates, &params, &ledger).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let outcome = scheduler.run(&mut rng);

    let mut trial = ledger.clone();
    for &(t0, t1) in &outcome.new_spans {
        let resource = trial.get_mut("battery").unwrap();
        assert!(resource.apply_for(3.0, t1 - t0).is_ok(), "returned schedule overruns the resource ledger on replay");
    }
}

/// Invariant 6: with `min_improvement_rate = 0` and a large generation budget, adding extra
/// feasible, positive-payoff candidates alongside a protected previous-solution bit never leaves
/// the scheduler worse off than running with the protected candidate alone.
#[test]
fn invariant6_scheduler_coverage_it() {
    let ledger = {
        let mut m = ResourceLedger::new();
        m.insert("battery".to_string(), Resource::new(ResourceKind::Depletable, "battery", 100.0, 5.0));
        m
    };
    let params = exhaustive_params();

    let mut protected_only = candidate(0.0, 5.0, 1.0, 1.0);
    protected_only.prev_solution = Some(0);
    protected_only.prev_confirmed = true;
    let baseline_candidates = vec![protected_only.clone()];
    let baseline = GAScheduler::new(&baseline_candidates, &params, &ledger).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let baseline_outcome = baseline.run(&mut rng);

    let mut extended_candidates = vec![protected_only];
    for i in 1..6 {
        extended_candidates.push(candidate(i as f64 * 10.0, i as f64 * 10.0 + 5.0, 0.8, 1.0));
    }
    let extended = GAScheduler::new(&extended_candidates, &params, &ledger).unwrap();
    let mut rng2 = StdRng::seed_from_u64(3);
    let extended_outcome = extended.run(&mut rng2);

    assert!(
        extended_outcome.best_fitness >= baseline_outcome.best_fitness - 1e-9,
        "adding feasible candidates alongside a protected bit regressed fitness: {} < {}",
        extended_outcome.best_fitness,
        baseline_outcome.best_fitness
    );
}
