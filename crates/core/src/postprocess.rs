//! Recursive per-individual post-optimization: after each cycle, before the
//! next variation, every surviving candidate can be handed to a short
//! nested optimization run and the nested best loaded back into the outer
//! population. The nested run carries its own bounded budget and never
//! registers a post-processor of its own — the one guard against unbounded
//! recursion.

use crate::algorithm::ea::EaAlgorithm;
use crate::candidate::Candidate;
use crate::config::AlgorithmConfig;
use crate::engine::{IterationEngine, InfoHook};
use crate::error::Result;
use crate::executor::{Evaluator, FitnessFn, SerialExecutor};
use crate::param::Tree;
use crate::population::Population;
use crate::rng::get_rng;
use std::sync::Arc;

pub trait PostProcessor: Send {
    fn process(&mut self, population: &mut Population) -> Result<()>;
}

struct NoopHook;
impl InfoHook for NoopHook {}

/// Runs a small, single-parent EA on each surviving candidate's parameter
/// tree, seeded from that candidate's current values, and writes the nested
/// best back in place. `nested_config.halt` bounds its budget; its own
/// `post_processor` is always `None` regardless of the outer config, which
/// is the recursion veto.
pub struct EaPostProcessor {
    pub nested_config: AlgorithmConfig,
    pub fitness: Arc<dyn FitnessFn>,
    pub n_survivors: usize,
    seed_counter: u64,
}

impl EaPostProcessor {
    pub fn new(nested_config: AlgorithmConfig, fitness: Arc<dyn FitnessFn>, n_survivors: usize) -> Self {
        Self { nested_config, fitness, n_survivors, seed_counter: 0 }
    }

    fn optimize_one(&mut self, seed_candidate: &Candidate) -> Result<Candidate> {
        self.seed_counter += 1;
        let mut config = self.nested_config.clone();
        config.seed = crate::rng::derive_seed(config.seed, self.seed_counter);
        let lambda = config.size.saturating_sub(1).max(1);
        let mut rng = get_rng(config.seed);

        let mut members = Vec::with_capacity(1 + lambda);
        members.push(seed_candidate.clone());
        for _ in 0..lambda {
            let mut child = seed_candidate.clone();
            child.adapt(&mut rng);
            members.push(child);
        }
        let population = Population::from_members(members, 1 + lambda);

        let evaluator = Evaluator::Serial(SerialExecutor::new(self.fitness.clone()));
        let algorithm = EaAlgorithm::new(1, lambda, config.sorting_scheme, false, evaluator, config.seed);
        let mut nested_config = config;
        nested_config.n_parents = 1;
        nested_config.size = 1 + lambda;

        let mut engine = IterationEngine::new(nested_config, algorithm, population);
        let mut hook = NoopHook;
        engine.optimize(&mut hook)?;
        engine.population.sort_best_first();
        Ok(engine.population.members.into_iter().next().unwrap_or_else(|| seed_candidate.clone()))
    }
}

impl PostProcessor for EaPostProcessor {
    fn process(&mut self, population: &mut Population) -> Result<()> {
        let n = self.n_survivors.min(population.members.len());
        for i in 0..n {
            let refined = self.optimize_one(&population.members[i])?;
            if refined.is_better_than(&population.members[i]) {
                population.members[i] = refined;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Candidate;
    use crate::config::{Domain, HaltConfig, Scale};
    use crate::executor::FitnessOutcome;
    use crate::param::adaptor::Adaptor;
    use crate::param::{Leaf, LeafValue};

    fn parabola(candidate: &Candidate) -> FitnessOutcome {
        let sum_sq: f64 = candidate.parameters.streamline().iter().map(|v| v * v).sum();
        FitnessOutcome::Ok { primary: sum_sq, secondary: Vec::new() }
    }

    fn seeded_candidate() -> Candidate {
        let mut tree = Tree::new();
        tree.push_leaf(Leaf::new(
            "x",
            LeafValue::ConstrainedDouble(3.0, Domain { min: -10.0, max: 10.0, scale: Scale::Linear }),
            Adaptor::gaussian(0.5),
        ));
        let mut c = Candidate::new(tree, false);
        c.record_result(9.0, &[], 0.0);
        c
    }

    #[test]
    fn post_processor_never_makes_a_survivor_worse() {
        let nested_config = AlgorithmConfig {
            size: 6,
            n_parents: 1,
            halt: HaltConfig { max_iteration: 5, ..Default::default() },
            ..Default::default()
        };
        let mut post = EaPostProcessor::new(nested_config, Arc::new(parabola), 1);
        let mut population = Population::from_members(vec![seeded_candidate()], 1);
        let before = population.members[0].primary.transformed;
        post.process(&mut population).unwrap();
        assert!(population.members[0].primary.transformed <= before);
    }
}
