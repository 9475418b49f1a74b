//! The candidate/individual model: a parameter tree plus fitness state,
//! a processing-status state machine, and algorithm-specific personality
//! traits.

use crate::param::Tree;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    Unprocessed,
    DoProcess,
    Processed,
    Error,
}

/// Algorithm-specific annotations. One variant per specialization; state
/// that a generic engine has no business knowing about lives here instead
/// of in a base-class hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersonalityTraits {
    Ea(EaTraits),
    Swarm(SwarmTraits),
    Gd(GdTraits),
    Scan(ScanTraits),
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EaTraits {
    /// 0 = child; >= 1 = number of generations this item has survived as a parent.
    pub parent_counter: u32,
    pub population_position: usize,
    pub parent_id: Option<u64>,
    pub is_on_pareto_front: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTraits {
    pub neighborhood: usize,
    /// Index into the algorithm-owned best table; never a live reference.
    pub local_best: Option<usize>,
    pub global_best: Option<usize>,
    pub c_local: f64,
    pub c_global: f64,
    pub c_delta: f64,
    pub skip_position_update: bool,
    /// Per-dimension velocity, same length and order as the parameter
    /// tree's streamline. Lives here rather than on the tree itself since
    /// it's swarm-only bookkeeping, not a parameter.
    pub velocity: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GdTraits {
    pub step_index: u32,
    pub step_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanTraits {
    pub scan_index: u64,
}

/// A single evaluation result slot: primary or secondary criterion, raw and
/// transformed (post-penalty) forms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FitnessValue {
    pub raw: f64,
    pub transformed: f64,
}

impl FitnessValue {
    pub fn new(raw: f64) -> Self {
        Self { raw, transformed: raw }
    }
}

/// One constraint in a candidate's check combiner. Violation adds a
/// nonnegative penalty to the transformed primary fitness; it is never an
/// error.
pub trait Constraint: std::fmt::Debug {
    fn penalty(&self, tree: &Tree) -> f64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumOfParamsConstraint {
    pub target: f64,
    pub weight: f64,
}

impl Constraint for SumOfParamsConstraint {
    fn penalty(&self, tree: &Tree) -> f64 {
        let sum: f64 = tree.streamline().iter().sum();
        self.weight * (sum - self.target).abs()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnSphereConstraint {
    pub radius: f64,
    pub weight: f64,
}

impl Constraint for OnSphereConstraint {
    fn penalty(&self, tree: &Tree) -> f64 {
        let norm: f64 = tree.streamline().iter().map(|v| v * v).sum::<f64>().sqrt();
        self.weight * (norm - self.radius).abs()
    }
}

/// A parameter tree, its fitness state, and its bookkeeping. Every field
/// the generic engine needs is here; algorithm-only state lives behind
/// [`PersonalityTraits`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub parameters: Tree,
    pub primary: FitnessValue,
    pub secondary: Vec<FitnessValue>,
    pub dirty: bool,
    pub status: ProcessingStatus,
    pub traits: PersonalityTraits,
    pub eval_id: u64,
    pub assigned_iteration: u64,
    pub maximize: bool,
    pub worst_case: f64,
    pub invalid: bool,
    /// Set by the broker reception loop when this item is a timeout
    /// substitute (a clone of a survivor) rather than a genuine evaluation.
    pub is_substitute: bool,
}

impl Candidate {
    pub fn new(parameters: Tree, maximize: bool) -> Self {
        let worst_case = if maximize { f64::NEG_INFINITY } else { f64::INFINITY };
        Self {
            parameters,
            primary: FitnessValue::new(worst_case),
            secondary: Vec::new(),
            dirty: true,
            status: ProcessingStatus::Unprocessed,
            traits: PersonalityTraits::None,
            eval_id: 0,
            assigned_iteration: 0,
            maximize,
            worst_case,
            invalid: false,
            is_substitute: false,
        }
    }

    /// Mutates the parameter tree via its adaptors. Sets the dirty flag and
    /// transitions processing status back to DoProcess if anything changed.
    pub fn adapt(&mut self, rng: &mut ChaCha8Rng) -> usize {
        let changes = self.parameters.adapt(rng);
        if changes > 0 {
            self.mark_dirty();
        }
        changes
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.status = match self.status {
            ProcessingStatus::Processed | ProcessingStatus::Unprocessed => ProcessingStatus::DoProcess,
            other => other,
        };
    }

    /// Lazy fitness read. Fails if dirty — callers must evaluate first.
    pub fn fitness(&self) -> Option<f64> {
        if self.dirty {
            None
        } else {
            Some(self.primary.transformed)
        }
    }

    /// Records the outcome of a user fitness calculation: primary raw value,
    /// any secondary results, and the penalty from constraint violations (if
    /// any). Clears dirty and transitions to Processed.
    pub fn record_result(&mut self, primary_raw: f64, secondary_raw: &[f64], penalty: f64) {
        self.primary = FitnessValue { raw: primary_raw, transformed: primary_raw + penalty };
        self.secondary = secondary_raw.iter().map(|&v| FitnessValue::new(v)).collect();
        self.dirty = false;
        self.status = ProcessingStatus::Processed;
        self.invalid = false;
    }

    /// Records a failed evaluation: worst-case fitness in every slot,
    /// flagged invalid. Such candidates can still be selected against (they
    /// lose) but never become a new best-ever.
    pub fn mark_invalid(&mut self, n_secondary: usize) {
        self.primary = FitnessValue::new(self.worst_case);
        self.secondary = vec![FitnessValue::new(self.worst_case); n_secondary];
        self.dirty = false;
        self.status = ProcessingStatus::Error;
        self.invalid = true;
    }

    pub fn apply_constraints(&mut self, constraints: &[Box<dyn Constraint>]) -> f64 {
        constraints.iter().map(|c| c.penalty(&self.parameters)).sum()
    }

    /// Transformed-then-raw-then-insertion-order comparison key for sorting.
    /// Insertion order is supplied by the caller (the candidate's current
    /// position) since the candidate itself doesn't track it.
    pub fn sort_key(&self, insertion_order: usize) -> (f64, f64, usize) {
        let sign = if self.maximize { -1.0 } else { 1.0 };
        (sign * self.primary.transformed, sign * self.primary.raw, insertion_order)
    }

    pub fn is_better_than(&self, other: &Candidate) -> bool {
        if self.maximize {
            self.primary.transformed > other.primary.transformed
        } else {
            self.primary.transformed < other.primary.transformed
        }
    }

    pub fn dominates(&self, other: &Candidate) -> bool {
        let mine: Vec<f64> = std::iter::once(self.primary.transformed)
            .chain(self.secondary.iter().map(|f| f.transformed))
            .collect();
        let theirs: Vec<f64> = std::iter::once(other.primary.transformed)
            .chain(other.secondary.iter().map(|f| f.transformed))
            .collect();
        let cmp = |a: f64, b: f64| if self.maximize { a >= b } else { a <= b };
        let strict = |a: f64, b: f64| if self.maximize { a > b } else { a < b };
        mine.iter().zip(theirs.iter()).all(|(&a, &b)| cmp(a, b))
            && mine.iter().zip(theirs.iter()).any(|(&a, &b)| strict(a, b))
    }
}
