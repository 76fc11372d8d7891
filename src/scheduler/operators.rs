//! GA operators (§4.8): crossover, mutation, parent selection, environment selection.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::chromosome::Chromosome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverType {
    Uniform,
    SinglePoint,
    MultiPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentSelType {
    Tournament,
    Roulette,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironSelType {
    Elitist,
    Generational,
}

/// Produces one child from two parents per the configured crossover strategy.
pub fn crossover(a: &Chromosome, b: &Chromosome, kind: CrossoverType, n_points: usize, rng: &mut impl Rng) -> Chromosome {
    let len = a.len();
    let mut bits = vec![false; len];
    match kind {
        CrossoverType::Uniform => {
            for i in 0..len {
                bits[i] = if rng.random_bool(0.5) { a.get(i) } else { b.get(i) };
            }
        }
        CrossoverType::SinglePoint => {
            let cut = rng.random_range(0..len.max(1));
            for i in 0..len {
                bits[i] = if i < cut { a.get(i) } else { b.get(i) };
            }
        }
        CrossoverType::MultiPoint => {
            let k = n_points.min(len.saturating_sub(1)).max(1);
            let mut cuts: Vec<usize> = (0..len).collect();
            cuts.shuffle(rng);
            let mut cuts: Vec<usize> = cuts.into_iter().take(k).collect();
            cuts.sort_unstable();
            let mut from_a = true;
            let mut next_cut_idx = 0;
            for i in 0..len {
                if next_cut_idx < cuts.len() && i == cuts[next_cut_idx] {
                    from_a = !from_a;
                    next_cut_idx += 1;
                }
                bits[i] = if from_a { a.get(i) } else { b.get(i) };
            }
        }
    }
    Chromosome::new(bits)
}

/// Flips each gene independently with probability `rate`, then restores protected genes.
pub fn mutate(c: &mut Chromosome, rate: f64, protected: &[usize], rng: &mut impl Rng) {
    for i in 0..c.len() {
        if rng.random_bool(rate.clamp(0.0, 1.0)) {
            let current = c.get(i);
            c.set(i, !current);
        }
    }
    c.enforce_protected(protected);
}

/// Selects one parent from `pool` by k-tournament (best of `k` samples without replacement).
pub fn tournament_select<'a>(pool: &'a [Chromosome], k: usize, rng: &mut impl Rng) -> &'a Chromosome {
    let k = k.clamp(1, pool.len());
    let mut indices: Vec<usize> = (0..pool.len()).collect();
    indices.shuffle(rng);
    indices
        .into_iter()
        .take(k)
        .map(|i| &pool[i])
        .max_by(|a, b| a.fitness.partial_cmp(&b.fitness).unwrap())
        .expect("pool is non-empty")
}

/// Selects one parent from `pool` by fitness-proportional roulette (fitnesses shifted to be
/// non-negative first, so a population with negative/penalised fitness values still works).
pub fn roulette_select<'a>(pool: &'a [Chromosome], rng: &mut impl Rng) -> &'a Chromosome {
    let min = pool.iter().map(|c| c.fitness).fold(f64::INFINITY, f64::min).min(0.0);
    let shifted: Vec<f64> = pool.iter().map(|c| c.fitness - min + 1e-9).collect();
    let total: f64 = shifted.iter().sum();
    let mut target = rng.random_range(0.0..total);
    for (i, w) in shifted.iter().enumerate() {
        if target < *w {
            return &pool[i];
        }
        target -= w;
    }
    &pool[pool.len() - 1]
}

/// Survivor selection: elitist keeps the best `pop_size` of parents ∪ children; generational
/// replaces parents with children wholesale (padding with parents if children are short).
pub fn select_environment(
    parents: Vec<Chromosome>,
    children: Vec<Chromosome>,
    kind: EnvironSelType,
    pop_size: usize,
) -> Vec<Chromosome> {
    match kind {
        EnvironSelType::Generational => {
            let mut next = children;
            if next.len() < pop_size {
                next.extend(parents.into_iter().take(pop_size - next.len()));
            }
            next.truncate(pop_size);
            next
        }
        EnvironSelType::Elitist => {
            let mut combined = parents;
            combined.extend(children);
            combined.sort_by(|a, b| b.fitness.partial_cmp(&a.fitness).unwrap());
            combined.truncate(pop_size);
            combined
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn single_point_crossover_splits_at_cut() {
        let a = Chromosome::new(vec![true; 6]);
        let b = Chromosome::new(vec![false; 6]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let child = crossover(&a, &b, CrossoverType::SinglePoint, 1, &mut rng);
        assert_eq!(child.len(), 6);
    }

    #[test]
    fn mutation_restores_protected() {
        let mut c = Chromosome::new(vec![false; 4]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        mutate(&mut c, 1.0, &[0, 2], &mut rng);
        assert!(c.get(0));
        assert!(c.get(2));
    }

    #[test]
    fn generational_selection_replaces_parents() {
        let mut parents = vec![Chromosome::zeros(2); 3];
        for (i, p) in parents.iter_mut().enumerate() {
            p.fitness = i as f64;
        }
        let mut children = vec![Chromosome::zeros(2); 3];
        for (i, c) in children.iter_mut().enumerate() {
            c.fitness = 100.0 + i as f64;
        }
        let next = select_environment(parents, children, EnvironSelType::Generational, 3);
        assert!(next.iter().all(|c| c.fitness >= 100.0));
    }
}
