//! The swarm specialization: particles partitioned into neighborhoods, each
//! pulled toward its neighborhood's local best and the swarm's global best.
//! Local/global bests are owned clones held by the algorithm — never
//! aliases of live population members — so a member's personality traits
//! reference them by index into an algorithm-owned table, never by pointer.

use crate::candidate::{Candidate, PersonalityTraits, SwarmTraits};
use crate::config::SwarmConfig;
use crate::engine::{Algorithm, CycleResult};
use crate::error::Result;
use crate::executor::Evaluator;
use crate::population::{partition_neighborhoods, Population};
use crate::rng::get_rng;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::AtomicBool;

pub struct SwarmAlgorithm {
    pub config: SwarmConfig,
    pub maximize: bool,
    evaluator: Evaluator,
    rng: ChaCha8Rng,
    /// One owned clone per neighborhood; index matches `SwarmTraits::neighborhood`.
    local_bests: Vec<Option<Candidate>>,
    global_best: Option<Candidate>,
}

impl SwarmAlgorithm {
    pub fn new(config: SwarmConfig, maximize: bool, evaluator: Evaluator, seed: u64) -> Self {
        let n = config.n_neighborhoods;
        Self {
            config,
            maximize,
            evaluator,
            rng: get_rng(seed),
            local_bests: vec![None; n.max(1)],
            global_best: None,
        }
    }

    fn is_better(&self, a: &Candidate, b: &Candidate) -> bool {
        if self.maximize {
            a.primary.transformed > b.primary.transformed
        } else {
            a.primary.transformed < b.primary.transformed
        }
    }

    fn sample_multiplier(&mut self, fixed: f64, range: Option<(f64, f64)>) -> f64 {
        match range {
            Some((lo, hi)) if hi > lo => self.rng.random_range(lo..hi),
            _ => fixed,
        }
    }

    /// Assigns neighborhood ids round-robin over the declared partition
    /// sizes, stamping multipliers and seeding an all-zero velocity for
    /// particles that don't have one yet.
    fn ensure_traits(&mut self, population: &mut Population) {
        let sizes = partition_neighborhoods(population.members.len(), self.config.n_neighborhoods);
        let mut idx = 0usize;
        for (neighborhood, size) in sizes.iter().enumerate() {
            for _ in 0..*size {
                if idx >= population.members.len() {
                    break;
                }
                let dims = population.members[idx].parameters.len();
                let c_local = self.sample_multiplier(self.config.c_local, self.config.randomize_c_local);
                let c_global =
                    self.sample_multiplier(self.config.c_global, self.config.randomize_c_global);
                let c_delta = self.sample_multiplier(self.config.c_delta, self.config.randomize_c_delta);
                let member = &mut population.members[idx];
                match &mut member.traits {
                    PersonalityTraits::Swarm(traits) => {
                        traits.neighborhood = neighborhood;
                        traits.c_local = c_local;
                        traits.c_global = c_global;
                        traits.c_delta = c_delta;
                        if traits.velocity.len() != dims {
                            traits.velocity = vec![0.0; dims];
                        }
                    }
                    _ => {
                        member.traits = PersonalityTraits::Swarm(SwarmTraits {
                            neighborhood,
                            local_best: None,
                            global_best: None,
                            c_local,
                            c_global,
                            c_delta,
                            skip_position_update: true,
                            velocity: vec![0.0; dims],
                        });
                    }
                }
                idx += 1;
            }
        }
    }

    /// Velocity update: `v' = c_delta * v + c_local * r1 * (local - pos) +
    /// c_global * r2 * (global - pos)`, then `pos += v'`, clamped to bounds.
    /// Particles tagged `skip_position_update` (freshly randomized) sit
    /// this cycle out, per spec.
    fn update_position(&mut self, candidate: &mut Candidate, neighborhood: usize) {
        let (c_local, c_global, c_delta, skip) = match &candidate.traits {
            PersonalityTraits::Swarm(t) => (t.c_local, t.c_global, t.c_delta, t.skip_position_update),
            _ => return,
        };
        if skip {
            if let PersonalityTraits::Swarm(t) = &mut candidate.traits {
                t.skip_position_update = false;
            }
            return;
        }
        let local = self.local_bests[neighborhood].as_ref().map(|c| c.parameters.streamline());
        let global = self.global_best.as_ref().map(|c| c.parameters.streamline());
        let pos = candidate.parameters.streamline();

        let r1: f64 = self.rng.random_range(0.0..1.0);
        let r2: f64 = self.rng.random_range(0.0..1.0);

        let velocity = if let PersonalityTraits::Swarm(t) = &mut candidate.traits {
            for (d, v) in t.velocity.iter_mut().enumerate() {
                let pull_local = local.as_ref().map_or(0.0, |l| l[d] - pos[d]);
                let pull_global = global.as_ref().map_or(0.0, |g| g[d] - pos[d]);
                *v = c_delta * *v + c_local * r1 * pull_local + c_global * r2 * pull_global;
            }
            t.velocity.clone()
        } else {
            return;
        };

        let new_pos: Vec<f64> = pos.iter().zip(&velocity).map(|(p, v)| p + v).collect();
        candidate.parameters.assign(&new_pos);
        candidate.mark_dirty();
    }

    fn update_bests(&mut self, population: &Population) {
        for candidate in &population.members {
            if candidate.invalid {
                continue;
            }
            let neighborhood = match &candidate.traits {
                PersonalityTraits::Swarm(t) => t.neighborhood,
                _ => continue,
            };
            if neighborhood < self.local_bests.len() {
                let replace = match &self.local_bests[neighborhood] {
                    Some(current) => self.is_better(candidate, current),
                    None => true,
                };
                if replace {
                    self.local_bests[neighborhood] = Some(candidate.clone());
                }
            }
            let replace_global = match &self.global_best {
                Some(current) => self.is_better(candidate, current),
                None => true,
            };
            if replace_global {
                self.global_best = Some(candidate.clone());
            }
        }
    }

    /// Trims neighborhoods back down to their declared size (dropping the
    /// worst members) and fills any that came up short by cloning and
    /// randomizing from that neighborhood's local best.
    ///
    /// A neighborhood exactly at its declared size needs no repair — the
    /// ordinary case, not an error.
    fn adjust_neighborhoods(&mut self, population: &mut Population) {
        let sizes = partition_neighborhoods(population.default_size, self.config.n_neighborhoods);
        let mut by_neighborhood: Vec<Vec<Candidate>> = vec![Vec::new(); sizes.len()];
        for candidate in population.members.drain(..) {
            let neighborhood = match &candidate.traits {
                PersonalityTraits::Swarm(t) => t.neighborhood.min(sizes.len().saturating_sub(1)),
                _ => 0,
            };
            by_neighborhood[neighborhood].push(candidate);
        }

        let mut rebuilt = Vec::with_capacity(population.default_size);
        for (neighborhood, (mut members, &declared)) in
            by_neighborhood.into_iter().zip(sizes.iter()).enumerate()
        {
            if members.len() > declared {
                members.sort_by(|a, b| {
                    let sign = if self.maximize { -1.0 } else { 1.0 };
                    (sign * a.primary.transformed)
                        .partial_cmp(&(sign * b.primary.transformed))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                members.truncate(declared);
            }
            let n_missing = declared.saturating_sub(members.len());
            if n_missing > 0 {
                let template = members
                    .first()
                    .cloned()
                    .or_else(|| self.local_bests[neighborhood].clone())
                    .or_else(|| self.global_best.clone());
                if let Some(template) = template {
                    for _ in 0..n_missing {
                        let mut clone = template.clone();
                        clone.parameters.random_init(&mut self.rng);
                        clone.mark_dirty();
                        clone.is_substitute = true;
                        if let PersonalityTraits::Swarm(t) = &mut clone.traits {
                            t.neighborhood = neighborhood;
                            t.skip_position_update = true;
                            t.velocity.iter_mut().for_each(|v| *v = 0.0);
                        }
                        members.push(clone);
                    }
                }
            }
            rebuilt.extend(members);
        }
        population.members = rebuilt;
    }
}

impl Algorithm for SwarmAlgorithm {
    fn cycle_logic(
        &mut self,
        population: &mut Population,
        iteration: u64,
        cancel: &AtomicBool,
    ) -> Result<CycleResult> {
        self.ensure_traits(population);

        for candidate in population.members.iter_mut() {
            let neighborhood = match &candidate.traits {
                PersonalityTraits::Swarm(t) => t.neighborhood,
                _ => 0,
            };
            self.update_position(candidate, neighborhood);
        }

        let batch = std::mem::take(&mut population.members);
        let parent_flags = vec![false; batch.len()];
        let outcome = self.evaluator.evaluate(batch, iteration, &parent_flags, cancel)?;
        let mut evaluated = outcome.candidates;

        if outcome.short_by > 0 {
            let mut repaired = Population::from_members(evaluated, population.default_size);
            repaired.expand_to_default(&mut self.rng, |candidate, rng| {
                candidate.parameters.random_init(rng);
                candidate.mark_dirty();
            });
            evaluated = repaired.members;
        }
        population.members = evaluated;

        self.update_bests(population);
        self.adjust_neighborhoods(population);

        let best = self.global_best.clone().unwrap_or_else(|| {
            population.members[0].clone()
        });
        Ok(CycleResult { best_raw: best.primary.raw, best_transformed: best.primary.transformed })
    }

    fn rng_state(&self) -> Option<crate::rng::RngState> {
        Some(crate::rng::RngState::capture(&self.rng))
    }

    fn restore_rng_state(&mut self, state: &crate::rng::RngState) {
        self.rng = state.restore();
    }

    fn name(&self) -> &'static str {
        "swarm"
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

    fn seed_population(n: usize) -> Population {
        let members: Vec<Candidate> = (0..n)
            .map(|i| {
                let mut tree = Tree::new();
                tree.push_leaf(Leaf::new(
                    "x0",
                    LeafValue::ConstrainedDouble(
                        (i as f64) - 5.0,
                        Domain { min: -10.0, max: 10.0, scale: Scale::Linear },
                    ),
                    Adaptor::gaussian(0.0),
                ));
                tree.push_leaf(Leaf::new(
                    "x1",
                    LeafValue::ConstrainedDouble(
                        (i as f64) - 3.0,
                        Domain { min: -10.0, max: 10.0, scale: Scale::Linear },
                    ),
                    Adaptor::gaussian(0.0),
                ));
                let mut c = Candidate::new(tree, false);
                c.traits = PersonalityTraits::Swarm(SwarmTraits {
                    neighborhood: 0,
                    local_best: None,
                    global_best: None,
                    c_local: 2.0,
                    c_global: 2.0,
                    c_delta: 0.5,
                    skip_position_update: true,
                    velocity: vec![0.0, 0.0],
                });
                c
            })
            .collect();
        Population::from_members(members, n)
    }

    #[test]
    fn neighborhoods_stay_at_declared_size_after_a_cycle() {
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(parabola)));
        let config = SwarmConfig { n_neighborhoods: 2, ..Default::default() };
        let mut algorithm = SwarmAlgorithm::new(config, false, evaluator, 1);
        let mut population = seed_population(10);
        let cancel = AtomicBool::new(false);
        algorithm.cycle_logic(&mut population, 0, &cancel).unwrap();
        assert_eq!(population.members.len(), 10);
    }

    #[test]
    fn global_best_never_gets_worse_across_cycles() {
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(parabola)));
        let config = SwarmConfig { n_neighborhoods: 2, ..Default::default() };
        let mut algorithm = SwarmAlgorithm::new(config, false, evaluator, 3);
        let mut population = seed_population(10);
        let cancel = AtomicBool::new(false);
        let mut best = f64::INFINITY;
        for iteration in 0..30 {
            let cycle = algorithm.cycle_logic(&mut population, iteration, &cancel).unwrap();
            assert!(cycle.best_transformed <= best + 1e-9);
            best = best.min(cycle.best_transformed);
        }
    }

    #[test]
    fn freshly_randomized_particle_skips_one_position_update() {
        let evaluator = Evaluator::Serial(SerialExecutor::new(Arc::new(parabola)));
        let config = SwarmConfig { n_neighborhoods: 1, ..Default::default() };
        let mut algorithm = SwarmAlgorithm::new(config, false, evaluator, 2);
        let mut population = seed_population(4);
        let before = population.members[0].parameters.streamline();
        algorithm.ensure_traits(&mut population);
        algorithm.update_position(&mut population.members[0], 0);
        let after = population.members[0].parameters.streamline();
        assert_eq!(before, after);
    }
}
