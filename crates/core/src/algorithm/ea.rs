//! The evolutionary-algorithm specialization: parent/child bookkeeping,
//! the three selection disciplines, and Pareto-front selection for
//! multi-criterion candidates.

use crate::algorithm::{crowding_distance, non_dominated_fronts};
use crate::candidate::{Candidate, EaTraits, PersonalityTraits};
use crate::config::SortingScheme;
use crate::engine::{Algorithm, CycleResult};
use crate::error::Result;
use crate::executor::Evaluator;
use crate::population::Population;
use crate::rng::get_rng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::AtomicBool;

pub struct EaAlgorithm {
    pub n_parents: usize,
    pub lambda: usize,
    pub sorting_scheme: SortingScheme,
    pub pareto: bool,
    pub evaluator: Evaluator,
    rng: ChaCha8Rng,
}

impl EaAlgorithm {
    pub fn new(
        n_parents: usize,
        lambda: usize,
        sorting_scheme: SortingScheme,
        pareto: bool,
        evaluator: Evaluator,
        seed: u64,
    ) -> Self {
        Self { n_parents, lambda, sorting_scheme, pareto, evaluator, rng: get_rng(seed) }
    }

    fn make_children(&mut self, parents: &[Candidate]) -> Vec<Candidate> {
        (0..self.lambda)
            .map(|i| {
                let parent_idx = i % self.n_parents;
                let mut child = parents[parent_idx].clone();
                child.adapt(&mut self.rng);
                child.traits = PersonalityTraits::Ea(EaTraits {
                    parent_counter: 0,
                    population_position: self.n_parents + i,
                    parent_id: Some(parent_idx as u64),
                    is_on_pareto_front: false,
                });
                child
            })
            .collect()
    }

    fn evaluates_parents_this_cycle(&self, iteration: u64) -> bool {
        iteration == 0
            && matches!(self.sorting_scheme, SortingScheme::Plus | SortingScheme::Nu1Pretain)
    }

    fn mark_as_parent(mut candidate: Candidate) -> Candidate {
        match &mut candidate.traits {
            PersonalityTraits::Ea(traits) if traits.parent_counter > 0 => {}
            PersonalityTraits::Ea(traits) => traits.parent_counter = 1,
            other => {
                *other = PersonalityTraits::Ea(EaTraits {
                    parent_counter: 1,
                    population_position: 0,
                    parent_id: None,
                    is_on_pareto_front: false,
                });
            }
        }
        candidate
    }

    fn is_tagged_as_parent(candidate: &Candidate) -> bool {
        matches!(&candidate.traits, PersonalityTraits::Ea(traits) if traits.parent_counter > 0)
    }

    /// Selects the new parent set from `pool` (already evaluated) according
    /// to the configured sorting scheme. Returns the winners, best-first.
    fn select(&self, mut pool: Vec<Candidate>, prior_parents: &[Candidate]) -> Vec<Candidate> {
        if self.pareto && pool.iter().any(|c| !c.secondary.is_empty()) {
            return self.select_pareto(pool);
        }

        match self.sorting_scheme {
            SortingScheme::Plus => {
                pool.sort_by(|a, b| {
                    a.sort_key(0).partial_cmp(&b.sort_key(0)).unwrap_or(std::cmp::Ordering::Equal)
                });
                pool.truncate(self.n_parents);
                pool
            }
            SortingScheme::Comma => {
                pool.sort_by(|a, b| {
                    a.sort_key(0).partial_cmp(&b.sort_key(0)).unwrap_or(std::cmp::Ordering::Equal)
                });
                pool.truncate(self.n_parents);
                pool
            }
            SortingScheme::Nu1Pretain => {
                pool.sort_by(|a, b| {
                    a.sort_key(0).partial_cmp(&b.sort_key(0)).unwrap_or(std::cmp::Ordering::Equal)
                });
                let best_parent = prior_parents.iter().min_by(|a, b| {
                    a.sort_key(0).partial_cmp(&b.sort_key(0)).unwrap_or(std::cmp::Ordering::Equal)
                });
                let keep_parent = match (best_parent, pool.first()) {
                    (Some(parent), Some(best_child)) => parent.is_better_than(best_child),
                    _ => false,
                };
                if keep_parent {
                    let mut winners = vec![best_parent.unwrap().clone()];
                    winners.extend(pool.into_iter().take(self.n_parents - 1));
                    winners
                } else {
                    pool.truncate(self.n_parents);
                    pool
                }
            }
        }
    }

    fn select_pareto(&self, pool: Vec<Candidate>) -> Vec<Candidate> {
        let fronts = non_dominated_fronts(&pool);
        let mut winners = Vec::with_capacity(self.n_parents);
        for (front_idx, front) in fronts.iter().enumerate() {
            if winners.len() >= self.n_parents {
                break;
            }
            let mut marked: Vec<Candidate> = front.iter().map(|&i| pool[i].clone()).collect();
            if front_idx == 0 {
                for c in &mut marked {
                    if let PersonalityTraits::Ea(traits) = &mut c.traits {
                        traits.is_on_pareto_front = true;
                    }
                }
            }
            let remaining = self.n_parents - winners.len();
            if marked.len() <= remaining {
                winners.extend(marked);
            } else {
                let distances = crowding_distance(&pool, front);
                let mut ranked: Vec<(usize, f64)> = (0..front.len()).zip(distances).collect();
                ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                for (local_idx, _) in ranked.into_iter().take(remaining) {
                    winners.push(marked[local_idx].clone());
                }
            }
        }
        winners
    }
}

impl Algorithm for EaAlgorithm {
    fn cycle_logic(
        &mut self,
        population: &mut Population,
        iteration: u64,
        cancel: &AtomicBool,
    ) -> Result<CycleResult> {
        let prior_parents: Vec<Candidate> =
            population.members.iter().take(self.n_parents).cloned().collect();

        let children = self.make_children(&prior_parents);
        let send_parents = self.evaluates_parents_this_cycle(iteration);

        let mut batch = Vec::with_capacity(children.len() + prior_parents.len());
        let mut parent_flags = Vec::with_capacity(batch.capacity());
        if send_parents {
            // Tag resubmitted parents with a nonzero parent_counter so they
            // can be told apart from children after evaluation, regardless
            // of the original traits or the order the executor returns them
            // in (the broker makes no order guarantee).
            batch.extend(prior_parents.iter().cloned().map(Self::mark_as_parent));
            parent_flags.extend(std::iter::repeat(true).take(prior_parents.len()));
        }
        batch.extend(children);
        parent_flags.extend(std::iter::repeat(false).take(self.lambda));

        let expected = batch.len();
        let outcome = self.evaluator.evaluate(batch, iteration, &parent_flags, cancel)?;
        let mut evaluated = outcome.candidates;

        if outcome.short_by > 0 {
            let mut repaired = Population::from_members(evaluated, expected);
            repaired.expand_to_default(&mut self.rng, |candidate, rng| {
                candidate.adapt(rng);
            });
            evaluated = repaired.members;
        }

        let (evaluated_parents, evaluated_children): (Vec<Candidate>, Vec<Candidate>) =
            evaluated.into_iter().partition(Self::is_tagged_as_parent);

        // Parents that were freshly evaluated this cycle replace the stale
        // prior_parents fitness; otherwise prior_parents already carry a
        // valid fitness from the cycle that selected them.
        let effective_parents = if send_parents { evaluated_parents } else { prior_parents.clone() };

        // plus keeps the whole parent set in the competitive pool every
        // cycle; comma/nu1pretain restrict competition to the freshly
        // evaluated children only (spec: "comma: only children compete").
        // nu1pretain's "best parent beats best child" compare still needs
        // the parents, passed separately below.
        let pool = match self.sorting_scheme {
            SortingScheme::Plus => {
                let mut pool = effective_parents.clone();
                pool.extend(evaluated_children);
                pool
            }
            SortingScheme::Comma | SortingScheme::Nu1Pretain => evaluated_children,
        };

        let mut winners = self.select(pool, &effective_parents);

        for (i, winner) in winners.iter_mut().enumerate() {
            if let PersonalityTraits::Ea(traits) = &mut winner.traits {
                traits.parent_counter += 1;
                traits.population_position = i;
            } else {
                winner.traits = PersonalityTraits::Ea(EaTraits {
                    parent_counter: 1,
                    population_position: i,
                    parent_id: None,
                    is_on_pareto_front: false,
                });
            }
        }

        let best = winners.first().cloned();
        population.members = winners;
        population.default_size = self.n_parents + self.lambda;
        population.sort_best_first();
        population.trim_to_default();

        let best = best.unwrap_or_else(|| population.members[0].clone());
        Ok(CycleResult { best_raw: best.primary.raw, best_transformed: best.primary.transformed })
    }

    fn rng_state(&self) -> Option<crate::rng::RngState> {
        Some(crate::rng::RngState::capture(&self.rng))
    }

    fn restore_rng_state(&mut self, state: &crate::rng::RngState) {
        self.rng = state.restore();
    }

    fn name(&self) -> &'static str {
        "ea"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Candidate;
    use crate::config::{Domain, Scale};
    use crate::executor::{FitnessOutcome, SerialExecutor};
    use crate::param::adaptor::Adaptor;
    use crate::param::{Leaf, LeafValue, Tree};
    use std::sync::Arc;

    fn parabola(candidate: &Candidate) -> FitnessOutcome {
        let sum_sq: f64 = candidate.parameters.streamline().iter().map(|v| v * v).sum();
        FitnessOutcome::Ok { primary: sum_sq, secondary: Vec::new() }
    }

    fn seed_population(n: usize, value: f64) -> Population {
        let members: Vec<Candidate> = (0..n)
            .map(|_| {
                let mut tree = Tree::new();
                tree.push_leaf(Leaf::new(
                    "x0",
                    LeafValue::ConstrainedDouble(
                        value,
                        Domain { min: -10.0, max: 10.0, scale: Scale::Linear },
                    ),
                    Adaptor::gaussian(0.5),
                ));
                tree.push_leaf(Leaf::new(
                    "x1",
                    LeafValue::ConstrainedDouble(
                        value,
                        Domain { min: -10.0, max: 10.0, scale: Scale::Linear },
                    ),
                    Adaptor::gaussian(0.5),
                ));
                let mut c = Candidate::new(tree, false);
                c.record_result(2.0 * value * value, &[], 0.0);
                c
            })
            .collect();
        Population::from_members(members, n)
    }

    #[test]
    fn plus_mode_never_loses_the_best_parent() {
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(parabola)));
        let mut algorithm = EaAlgorithm::new(5, 15, SortingScheme::Plus, false, evaluator, 1);
        let mut population = seed_population(5, 3.0);
        let cancel = AtomicBool::new(false);
        let before_best = population.members[0].primary.transformed;
        let cycle = algorithm.cycle_logic(&mut population, 0, &cancel).unwrap();
        assert!(cycle.best_transformed <= before_best);
    }

    #[test]
    fn comma_mode_only_considers_children() {
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(parabola)));
        let mut algorithm = EaAlgorithm::new(5, 15, SortingScheme::Comma, false, evaluator, 2);
        let mut population = seed_population(5, 0.0001);
        let cancel = AtomicBool::new(false);
        algorithm.cycle_logic(&mut population, 1, &cancel).unwrap();
        assert_eq!(population.members.len(), 5);
    }

    #[test]
    fn comma_mode_discards_a_dominant_prior_parent() {
        // A prior parent sitting on the global optimum must not survive
        // comma selection: only the (much worse) children may compete.
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(parabola)));
        let mut algorithm = EaAlgorithm::new(5, 15, SortingScheme::Comma, false, evaluator, 2);
        let mut population = seed_population(5, 50.0);
        population.members[0].record_result(0.0, &[], 0.0);
        let cancel = AtomicBool::new(false);
        algorithm.cycle_logic(&mut population, 1, &cancel).unwrap();
        assert!(
            population.members.iter().all(|c| c.primary.transformed > 0.0),
            "the dominant prior parent leaked into the comma-selected population"
        );
    }

    #[test]
    fn convergence_on_parabola_reaches_small_fitness() {
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(parabola)));
        let mut algorithm = EaAlgorithm::new(5, 15, SortingScheme::Plus, false, evaluator, 7);
        let mut population = seed_population(5, 5.0);
        let cancel = AtomicBool::new(false);
        let mut best = f64::INFINITY;
        for iteration in 0..200 {
            let cycle = algorithm.cycle_logic(&mut population, iteration, &cancel).unwrap();
            best = best.min(cycle.best_transformed);
        }
        assert!(best < 1.0);
    }

    #[test]
    fn pareto_mode_marks_front_members() {
        fn two_criteria(candidate: &Candidate) -> FitnessOutcome {
            let x: Vec<f64> = candidate.parameters.streamline();
            FitnessOutcome::Ok { primary: x[0].powi(2), secondary: vec![(x[0] - 1.0).powi(2)] }
        }
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(two_criteria)));
        let mut algorithm = EaAlgorithm::new(10, 30, SortingScheme::Plus, true, evaluator, 3);
        let mut population = seed_population(10, 0.5);
        for c in population.members.iter_mut() {
            c.secondary.push(crate::candidate::FitnessValue::new(0.25));
        }
        let cancel = AtomicBool::new(false);
        algorithm.cycle_logic(&mut population, 0, &cancel).unwrap();
        let on_front = population.members.iter().any(|c| {
            matches!(&c.traits, PersonalityTraits::Ea(traits) if traits.is_on_pareto_front)
        });
        assert!(on_front);
    }
}
