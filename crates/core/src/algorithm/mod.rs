//! Algorithm specializations: each overrides variation/selection and
//! supplies its own personality traits, but all plug into the same
//! [`crate::engine::IterationEngine`].

pub mod ea;
pub mod gd;
pub mod scan;
pub mod swarm;

use crate::candidate::Candidate;

/// Non-dominated sorting into successive Pareto fronts (NSGA-II style).
/// Front 0 is the set no member of `candidates` dominates; front 1 is what
/// remains after removing front 0, and so on. Returns indices into
/// `candidates`, grouped by front.
pub fn non_dominated_fronts(candidates: &[Candidate]) -> Vec<Vec<usize>> {
    let n = candidates.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];
    let mut fronts: Vec<Vec<usize>> = vec![Vec::new()];

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if candidates[i].dominates(&candidates[j]) {
                dominated_by[i].push(j);
            } else if candidates[j].dominates(&candidates[i]) {
                domination_count[i] += 1;
            }
        }
        if domination_count[i] == 0 {
            fronts[0].push(i);
        }
    }

    let mut current = 0;
    while !fronts[current].is_empty() {
        let mut next = Vec::new();
        for &i in &fronts[current] {
            for &j in &dominated_by[i] {
                domination_count[j] -= 1;
                if domination_count[j] == 0 {
                    next.push(j);
                }
            }
        }
        current += 1;
        fronts.push(next);
    }
    fronts.pop(); // trailing empty front from the loop condition
    fronts
}

/// Crowding distance within one front: sum, per criterion, of the
/// normalized gap to each member's neighbors. Boundary members get
/// infinite distance so they're always preferred as tie-breakers.
pub fn crowding_distance(candidates: &[Candidate], front: &[usize]) -> Vec<f64> {
    let m = front.len();
    if m == 0 {
        return Vec::new();
    }
    let mut distance = vec![0.0f64; m];
    if m <= 2 {
        return vec![f64::INFINITY; m];
    }

    let n_criteria = 1 + candidates[front[0]].secondary.len();
    for criterion in 0..n_criteria {
        let value = |idx: usize| -> f64 {
            if criterion == 0 {
                candidates[idx].primary.transformed
            } else {
                candidates[idx].secondary[criterion - 1].transformed
            }
        };
        let mut order: Vec<usize> = (0..m).collect();
        order.sort_by(|&a, &b| {
            value(front[a]).partial_cmp(&value(front[b])).unwrap_or(std::cmp::Ordering::Equal)
        });
        distance[order[0]] = f64::INFINITY;
        distance[order[m - 1]] = f64::INFINITY;
        let span = value(front[order[m - 1]]) - value(front[order[0]]);
        if span.abs() < f64::EPSILON {
            continue;
        }
        for w in 1..m - 1 {
            let prev = value(front[order[w - 1]]);
            let next = value(front[order[w + 1]]);
            distance[order[w]] += (next - prev).abs() / span;
        }
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Tree;

    fn candidate(primary: f64, secondary: f64) -> Candidate {
        let mut c = Candidate::new(Tree::new(), false);
        c.record_result(primary, &[secondary], 0.0);
        c
    }

    #[test]
    fn first_front_contains_only_nondominated_members() {
        let candidates =
            vec![candidate(0.0, 1.0), candidate(1.0, 0.0), candidate(0.5, 0.5), candidate(1.0, 1.0)];
        let fronts = non_dominated_fronts(&candidates);
        assert!(fronts[0].contains(&0));
        assert!(fronts[0].contains(&1));
        assert!(fronts[0].contains(&2));
        assert!(!fronts[0].contains(&3));
    }

    #[test]
    fn boundary_members_get_infinite_crowding_distance() {
        let candidates = vec![candidate(0.0, 2.0), candidate(1.0, 1.0), candidate(2.0, 0.0)];
        let front = vec![0, 1, 2];
        let distances = crowding_distance(&candidates, &front);
        assert_eq!(distances[0], f64::INFINITY);
        assert_eq!(distances[2], f64::INFINITY);
        assert!(distances[1].is_finite());
    }
}
