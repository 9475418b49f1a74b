//! Built-in demo problems: plain [`FitnessFn`] closures for exercising the
//! optimizer without an external process. Kept in the CLI, never in
//! `optimon-core`, since the core has no business knowing what a parabola
//! or a Rosenbrock valley is.

use optimon_core::candidate::Candidate;
use optimon_core::executor::FitnessOutcome;

/// `f(x) = sum(x_i^2)`, minimum 0 at the origin.
pub fn parabola(candidate: &Candidate) -> FitnessOutcome {
    let sum_sq: f64 = candidate.parameters.streamline().iter().map(|v| v * v).sum();
    FitnessOutcome::Ok { primary: sum_sq, secondary: Vec::new() }
}

/// `f(x) = sum(100*(x_{i+1} - x_i^2)^2 + (1 - x_i)^2)`, minimum 0 at all-ones.
/// Needs at least two active dimensions; fewer than that is treated as flat.
pub fn rosenbrock(candidate: &Candidate) -> FitnessOutcome {
    let x = candidate.parameters.streamline();
    if x.len() < 2 {
        return FitnessOutcome::Ok { primary: 0.0, secondary: Vec::new() };
    }
    let value: f64 = x
        .windows(2)
        .map(|pair| {
            let (a, b) = (pair[0], pair[1]);
            100.0 * (b - a * a).powi(2) + (1.0 - a).powi(2)
        })
        .sum();
    FitnessOutcome::Ok { primary: value, secondary: Vec::new() }
}

/// Per-criterion shifted parabolas for exercising the Pareto-front path:
/// criterion `i` is `(x0 - offsets[i])^2 + sum(x_{1..}^2)`, so no single
/// point minimizes every criterion at once and a real trade-off front
/// forms along `x0`. `offsets` must be non-empty; the first entry becomes
/// the primary fitness, the rest become `secondary`.
pub fn multi_parabola(offsets: Vec<f64>) -> impl Fn(&Candidate) -> FitnessOutcome {
    move |candidate: &Candidate| {
        let x = candidate.parameters.streamline();
        let x0 = x.first().copied().unwrap_or(0.0);
        let rest: f64 = x.iter().skip(1).map(|v| v * v).sum();
        let criterion = |offset: f64| (x0 - offset).powi(2) + rest;
        let primary = criterion(offsets[0]);
        let secondary = offsets[1..].iter().map(|&offset| criterion(offset)).collect();
        FitnessOutcome::Ok { primary, secondary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimon_core::config::{Domain, Scale};
    use optimon_core::param::adaptor::Adaptor;
    use optimon_core::param::{Leaf, LeafValue, Tree};

    fn candidate_at(values: &[f64]) -> Candidate {
        let mut tree = Tree::new();
        for (i, &v) in values.iter().enumerate() {
            tree.push_leaf(Leaf::new(
                format!("x{i}"),
                LeafValue::ConstrainedDouble(v, Domain { min: -10.0, max: 10.0, scale: Scale::Linear }),
                Adaptor::gaussian(0.1),
            ));
        }
        Candidate::new(tree, false)
    }

    #[test]
    fn parabola_minimum_is_at_the_origin() {
        match parabola(&candidate_at(&[0.0, 0.0])) {
            FitnessOutcome::Ok { primary, .. } => assert_eq!(primary, 0.0),
            _ => panic!("expected a valid result"),
        }
    }

    #[test]
    fn rosenbrock_minimum_is_at_all_ones() {
        match rosenbrock(&candidate_at(&[1.0, 1.0, 1.0])) {
            FitnessOutcome::Ok { primary, .. } => assert_eq!(primary, 0.0),
            _ => panic!("expected a valid result"),
        }
    }

    #[test]
    fn rosenbrock_penalizes_the_origin() {
        match rosenbrock(&candidate_at(&[0.0, 0.0])) {
            FitnessOutcome::Ok { primary, .. } => assert_eq!(primary, 1.0),
            _ => panic!("expected a valid result"),
        }
    }

    #[test]
    fn multi_parabola_reports_one_secondary_per_extra_offset() {
        let fitness = multi_parabola(vec![-1.0, 0.0, 1.0]);
        match fitness(&candidate_at(&[0.0])) {
            FitnessOutcome::Ok { primary, secondary } => {
                assert_eq!(primary, 1.0);
                assert_eq!(secondary, vec![0.0, 1.0]);
            }
            _ => panic!("expected a valid result"),
        }
    }

    #[test]
    fn multi_parabola_no_point_minimizes_every_criterion() {
        let fitness = multi_parabola(vec![-1.0, 0.0, 1.0]);
        for x0 in [-1.0, 0.0, 1.0] {
            match fitness(&candidate_at(&[x0])) {
                FitnessOutcome::Ok { primary, secondary } => {
                    let mut all = vec![primary];
                    all.extend(secondary);
                    assert!(all.iter().any(|&v| v > 0.0), "x0={x0} dominates every criterion");
                }
                _ => panic!("expected a valid result"),
            }
        }
    }
}
