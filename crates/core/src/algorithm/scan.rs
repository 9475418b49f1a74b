//! The parameter-scan specialization: walks a grid (or samples random
//! probes) instead of evolving a population. Each scan index maps to one
//! concrete coordinate tuple via the cartesian product of its axes;
//! `customHalt` fires once every combination has been visited.
//!
//! Grounded in the `--parameterSpec` grammar of the external interface: a
//! comma-separated list of `<type>(id, min, max, steps)` grid axes plus an
//! optional `s(N)` random-probe axis.

use crate::candidate::{Candidate, PersonalityTraits, ScanTraits};
use crate::config::ScanAxis;
use crate::engine::{Algorithm, CycleResult};
use crate::error::Result;
use crate::executor::Evaluator;
use crate::param::{Leaf, LeafValue, Tree};
use crate::population::Population;
use crate::rng::get_rng;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::AtomicBool;

/// One axis's materialized value set: grid axes get `steps` linearly-spaced
/// points; a random-probe axis draws lazily so repeated visits don't repeat
/// the same sample.
enum AxisPlan {
    Fixed { id: String, values: Vec<LeafValue> },
    Probe { id: String, n: u64, low: f64, high: f64 },
}

impl AxisPlan {
    fn cardinality(&self) -> u64 {
        match self {
            AxisPlan::Fixed { values, .. } => values.len() as u64,
            AxisPlan::Probe { n, .. } => (*n).max(1),
        }
    }
}

fn linspace(min: f64, max: f64, steps: u64) -> Vec<f64> {
    if steps <= 1 {
        return vec![min];
    }
    (0..steps).map(|i| min + (max - min) * (i as f64) / ((steps - 1) as f64)).collect()
}

fn build_plans(axes: &[ScanAxis]) -> Vec<AxisPlan> {
    axes.iter()
        .map(|axis| match axis {
            ScanAxis::Double { id, min, max, steps } => AxisPlan::Fixed {
                id: id.clone(),
                values: linspace(*min, *max, *steps).into_iter().map(LeafValue::Double).collect(),
            },
            ScanAxis::Float { id, min, max, steps } => AxisPlan::Fixed {
                id: id.clone(),
                values: linspace(*min, *max, *steps)
                    .into_iter()
                    .map(|v| LeafValue::Float(v as f32))
                    .collect(),
            },
            ScanAxis::Int32 { id, min, max, steps } => AxisPlan::Fixed {
                id: id.clone(),
                values: linspace(*min, *max, *steps)
                    .into_iter()
                    .map(|v| LeafValue::Int32(v.round() as i32))
                    .collect(),
            },
            ScanAxis::Bool { id, steps } => AxisPlan::Fixed {
                id: id.clone(),
                values: (0..(*steps).max(1)).map(|i| LeafValue::Bool(i % 2 == 1)).collect(),
            },
            ScanAxis::RandomProbes { n } => {
                AxisPlan::Probe { id: "probe".to_string(), n: *n, low: -1.0, high: 1.0 }
            }
        })
        .collect()
}

pub struct ScanAlgorithm {
    plans: Vec<AxisPlan>,
    total: u64,
    next_index: u64,
    maximize: bool,
    evaluator: Evaluator,
    rng: ChaCha8Rng,
}

impl ScanAlgorithm {
    pub fn new(axes: Vec<ScanAxis>, evaluator: Evaluator, maximize: bool, seed: u64) -> Self {
        let plans = build_plans(&axes);
        let total: u64 = plans.iter().map(AxisPlan::cardinality).product::<u64>().max(1);
        Self { plans, total, next_index: 0, maximize, evaluator, rng: get_rng(seed) }
    }

    pub fn total_combinations(&self) -> u64 {
        self.total
    }

    /// Decodes a mixed-radix scan index into one concrete value per axis.
    fn coordinate(&mut self, mut index: u64) -> Vec<(String, LeafValue)> {
        let mut out = Vec::with_capacity(self.plans.len());
        for plan in &self.plans {
            let radix = plan.cardinality();
            let digit = index % radix;
            index /= radix;
            let (id, value) = match plan {
                AxisPlan::Fixed { id, values } => (id.clone(), values[digit as usize].clone()),
                AxisPlan::Probe { id, low, high, .. } => {
                    (id.clone(), LeafValue::Double(self.rng.random_range(*low..*high)))
                }
            };
            out.push((id, value));
        }
        out
    }

    fn build_candidate(&mut self, index: u64) -> Candidate {
        let coords = self.coordinate(index);
        let mut tree = Tree::new();
        for (id, value) in coords {
            tree.push_leaf(Leaf::new(id, value, crate::param::adaptor::Adaptor::gaussian(0.0)));
        }
        let mut candidate = Candidate::new(tree, self.maximize);
        candidate.traits = PersonalityTraits::Scan(ScanTraits { scan_index: index });
        candidate
    }
}

impl Algorithm for ScanAlgorithm {
    fn cycle_logic(
        &mut self,
        population: &mut Population,
        iteration: u64,
        cancel: &AtomicBool,
    ) -> Result<CycleResult> {
        let remaining = self.total.saturating_sub(self.next_index);
        let batch_n = remaining.min(population.default_size as u64) as usize;

        let mut batch = Vec::with_capacity(batch_n.max(1));
        for _ in 0..batch_n {
            batch.push(self.build_candidate(self.next_index));
            self.next_index += 1;
        }
        if batch.is_empty() {
            let worst = if self.maximize { f64::NEG_INFINITY } else { f64::INFINITY };
            return Ok(CycleResult { best_raw: worst, best_transformed: worst });
        }

        let parent_flags = vec![false; batch.len()];
        let outcome = self.evaluator.evaluate(batch, iteration, &parent_flags, cancel)?;
        let mut evaluated = outcome.candidates;
        evaluated.sort_by(|a, b| {
            let sign = if self.maximize { -1.0 } else { 1.0 };
            (sign * a.primary.transformed)
                .partial_cmp(&(sign * b.primary.transformed))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let best = evaluated.first().cloned();
        population.members = evaluated;
        let best =
            best.unwrap_or_else(|| Candidate::new(Tree::new(), self.maximize));
        Ok(CycleResult { best_raw: best.primary.raw, best_transformed: best.primary.transformed })
    }

    fn custom_halt(&self, _population: &Population, _iteration: u64) -> bool {
        self.next_index >= self.total
    }

    fn rng_state(&self) -> Option<crate::rng::RngState> {
        Some(crate::rng::RngState::capture(&self.rng))
    }

    fn restore_rng_state(&mut self, state: &crate::rng::RngState) {
        self.rng = state.restore();
    }

    fn name(&self) -> &'static str {
        "ps"
    }
}
