//! The gradient-descent specialization: finite-difference gradient
//! estimate against a single running iterate, stepped with a decaying
//! step size. The simplest of the four specializations — no parent/child
//! bookkeeping, no neighborhoods, just one point walking downhill (or
//! uphill, for maximization).

use crate::candidate::{Candidate, GdTraits, PersonalityTraits};
use crate::config::GdConfig;
use crate::engine::{Algorithm, CycleResult};
use crate::error::Result;
use crate::executor::Evaluator;
use crate::population::Population;
use std::sync::atomic::AtomicBool;

pub struct GdAlgorithm {
    pub config: GdConfig,
    pub maximize: bool,
    evaluator: Evaluator,
}

impl GdAlgorithm {
    pub fn new(config: GdConfig, maximize: bool, evaluator: Evaluator) -> Self {
        Self { config, maximize, evaluator }
    }

    fn step_size_for(&self, step_index: u32) -> f64 {
        let decayed = self.config.initial_step_size * self.config.step_decay.powi(step_index as i32);
        decayed.max(self.config.min_step_size)
    }

    fn central_difference_batch(&self, base: &Candidate) -> (Vec<Candidate>, f64) {
        let h = self.config.finite_difference_step;
        let pos = base.parameters.streamline();
        let mut batch = Vec::with_capacity(1 + 2 * pos.len());
        batch.push(base.clone());
        for d in 0..pos.len() {
            let mut plus = pos.clone();
            plus[d] += h;
            let mut plus_candidate = base.clone();
            plus_candidate.parameters.assign(&plus);
            plus_candidate.mark_dirty();
            batch.push(plus_candidate);

            let mut minus = pos.clone();
            minus[d] -= h;
            let mut minus_candidate = base.clone();
            minus_candidate.parameters.assign(&minus);
            minus_candidate.mark_dirty();
            batch.push(minus_candidate);
        }
        (batch, h)
    }
}

impl Algorithm for GdAlgorithm {
    fn cycle_logic(
        &mut self,
        population: &mut Population,
        iteration: u64,
        cancel: &AtomicBool,
    ) -> Result<CycleResult> {
        let base = population.members[0].clone();
        let (step_index, _) = match &base.traits {
            PersonalityTraits::Gd(t) => (t.step_index, t.step_size),
            _ => (0, self.config.initial_step_size),
        };

        let (batch, h) = self.central_difference_batch(&base);
        let dims = base.parameters.len();
        let parent_flags = vec![false; batch.len()];
        let outcome = self.evaluator.evaluate(batch, iteration, &parent_flags, cancel)?;
        let evaluated = outcome.candidates;

        let mut gradient = vec![0.0; dims];
        for d in 0..dims {
            let plus = &evaluated[1 + 2 * d];
            let minus = &evaluated[2 + 2 * d];
            gradient[d] = (plus.primary.transformed - minus.primary.transformed) / (2.0 * h);
        }

        let step_size = self.step_size_for(step_index);
        let sign = if self.maximize { 1.0 } else { -1.0 };
        let pos = base.parameters.streamline();
        let new_pos: Vec<f64> =
            pos.iter().zip(&gradient).map(|(p, g)| p + sign * step_size * g).collect();

        let mut moved = base.clone();
        moved.parameters.assign(&new_pos);
        moved.mark_dirty();
        moved.traits = PersonalityTraits::Gd(GdTraits { step_index: step_index + 1, step_size });

        let moved_batch = vec![moved];
        let parent_flags = vec![false];
        let outcome = self.evaluator.evaluate(moved_batch, iteration, &parent_flags, cancel)?;
        let moved = outcome.candidates.into_iter().next().expect("single candidate evaluated");

        population.members = vec![moved.clone()];
        Ok(CycleResult { best_raw: moved.primary.raw, best_transformed: moved.primary.transformed })
    }

    fn name(&self) -> &'static str {
        "gd"
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

    fn starting_population() -> Population {
        let mut tree = Tree::new();
        tree.push_leaf(Leaf::new(
            "x0",
            LeafValue::ConstrainedDouble(4.0, Domain { min: -10.0, max: 10.0, scale: Scale::Linear }),
            Adaptor::gaussian(0.0),
        ));
        tree.push_leaf(Leaf::new(
            "x1",
            LeafValue::ConstrainedDouble(-3.0, Domain { min: -10.0, max: 10.0, scale: Scale::Linear }),
            Adaptor::gaussian(0.0),
        ));
        let mut c = Candidate::new(tree, false);
        c.traits = PersonalityTraits::Gd(GdTraits { step_index: 0, step_size: 0.1 });
        Population::from_members(vec![c], 1)
    }

    #[test]
    fn descends_toward_the_minimum_on_a_parabola() {
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(parabola)));
        let mut algorithm = GdAlgorithm::new(GdConfig::default(), false, evaluator);
        let mut population = starting_population();
        let cancel = AtomicBool::new(false);
        let mut best = f64::INFINITY;
        for iteration in 0..200 {
            let cycle = algorithm.cycle_logic(&mut population, iteration, &cancel).unwrap();
            best = best.min(cycle.best_transformed);
        }
        assert!(best < 1.0);
    }

    #[test]
    fn step_index_advances_each_cycle() {
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(parabola)));
        let mut algorithm = GdAlgorithm::new(GdConfig::default(), false, evaluator);
        let mut population = starting_population();
        let cancel = AtomicBool::new(false);
        algorithm.cycle_logic(&mut population, 0, &cancel).unwrap();
        match &population.members[0].traits {
            PersonalityTraits::Gd(t) => assert_eq!(t.step_index, 1),
            _ => panic!("expected gd traits"),
        }
    }
}
