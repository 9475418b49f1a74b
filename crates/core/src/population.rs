//! An ordered sequence of candidates with a declared default size.
//!
//! For EA the first `nParents` positions are parents and the remainder are
//! children; size may transiently exceed the default while late arrivals
//! are still being collected, then gets resized back down after selection.
//! For swarm, members are partitioned into neighborhoods.

use crate::candidate::Candidate;

#[derive(Debug, Clone)]
pub struct Population {
    pub members: Vec<Candidate>,
    pub default_size: usize,
}

impl Population {
    pub fn new(default_size: usize) -> Self {
        Self { members: Vec::new(), default_size }
    }

    pub fn from_members(members: Vec<Candidate>, default_size: usize) -> Self {
        Self { members, default_size }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Resizes down to `default_size` by dropping the worst-ranked tail.
    /// Assumes `members` is already sorted best-first.
    pub fn trim_to_default(&mut self) {
        if self.members.len() > self.default_size {
            self.members.truncate(self.default_size);
        }
    }

    /// If short of `default_size`, clones and random-initializes from the
    /// best member to fill the gap. Covers a population of size 1 against a
    /// larger `default_size`, and broker timeout recovery replacing missing
    /// late arrivals.
    pub fn expand_to_default<F>(&mut self, rng: &mut rand_chacha::ChaCha8Rng, mut randomize: F)
    where
        F: FnMut(&mut Candidate, &mut rand_chacha::ChaCha8Rng),
    {
        if self.members.is_empty() || self.members.len() >= self.default_size {
            return;
        }
        let template_idx = 0;
        while self.members.len() < self.default_size {
            let mut clone = self.members[template_idx].clone();
            clone.is_substitute = true;
            randomize(&mut clone, rng);
            self.members.push(clone);
        }
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.members.iter().filter(|c| !c.invalid).min_by(|a, b| {
            let sign = if a.maximize { -1.0 } else { 1.0 };
            (sign * a.primary.transformed)
                .partial_cmp(&(sign * b.primary.transformed))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Sorts best-first by transformed fitness, ties broken by raw fitness,
    /// then by current (pre-sort) position — a stable sort preserves
    /// insertion order among exact ties automatically.
    pub fn sort_best_first(&mut self) {
        self.members.sort_by(|a, b| {
            let sign_a = if a.maximize { -1.0 } else { 1.0 };
            let sign_b = if b.maximize { -1.0 } else { 1.0 };
            (sign_a * a.primary.transformed)
                .partial_cmp(&(sign_b * b.primary.transformed))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    (sign_a * a.primary.raw)
                        .partial_cmp(&(sign_b * b.primary.raw))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
    }
}

/// Partitions `members` into `k` neighborhoods of roughly equal size (swarm
/// specialization). Surplus members in a neighborhood are trimmed by the
/// caller; missing ones are cloned-and-randomized.
pub fn partition_neighborhoods(size: usize, k: usize) -> Vec<usize> {
    if k == 0 {
        return Vec::new();
    }
    let base = size / k;
    let remainder = size % k;
    (0..k).map(|i| if i < remainder { base + 1 } else { base }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Candidate;
    use crate::param::Tree;
    use crate::rng::get_rng;

    fn population_of(n: usize) -> Population {
        let mut pop = Population::new(n.max(4));
        for i in 0..n {
            let mut c = Candidate::new(Tree::new(), false);
            c.record_result(i as f64, &[], 0.0);
            pop.members.push(c);
        }
        pop
    }

    #[test]
    fn sort_best_first_orders_ascending_for_minimization() {
        let mut pop = population_of(5);
        pop.members.reverse();
        pop.sort_best_first();
        let values: Vec<f64> = pop.members.iter().map(|c| c.primary.transformed).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn expand_to_default_clones_until_default_size_reached() {
        let mut pop = population_of(1);
        let mut rng = get_rng(1);
        pop.expand_to_default(&mut rng, |_, _| {});
        assert_eq!(pop.len(), pop.default_size);
        assert!(pop.members.iter().skip(1).all(|c| c.is_substitute));
    }

    #[test]
    fn neighborhood_partition_distributes_remainder() {
        let sizes = partition_neighborhoods(10, 3);
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        assert_eq!(sizes, vec![4, 3, 3]);
    }

    #[test]
    fn trim_to_default_drops_tail_only() {
        let mut pop = population_of(8);
        pop.default_size = 5;
        pop.sort_best_first();
        pop.trim_to_default();
        assert_eq!(pop.len(), 5);
        assert_eq!(pop.members.last().unwrap().primary.transformed, 4.0);
    }
}
