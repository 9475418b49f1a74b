//! Mutation operators attached to parameter leaves.
//!
//! An [`Adaptor`] fires a Bernoulli trial with probability `p_ad`; on success
//! it perturbs the leaf's value by a Gaussian (or bi-Gaussian) step and,
//! every `adaption_threshold` successful invocations, self-adapts its own
//! sigma and `p_ad` within their declared ranges.

use crate::param::LeafValue;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianParams {
    pub sigma1: f64,
    pub sigma_sigma1: f64,
    pub min_sigma1: f64,
    pub max_sigma1: f64,
    pub use_bi_gaussian: bool,
    pub sigma2: f64,
    pub delta: f64,
    pub sigma_delta: f64,
    pub min_delta: f64,
    pub max_delta: f64,
}

impl Default for GaussianParams {
    fn default() -> Self {
        Self {
            sigma1: 0.5,
            sigma_sigma1: 0.8,
            min_sigma1: 1e-6,
            max_sigma1: 5.0,
            use_bi_gaussian: false,
            sigma2: 0.1,
            delta: 1.0,
            sigma_delta: 0.8,
            min_delta: 0.0,
            max_delta: 5.0,
        }
    }
}

/// An always/never-adapt override, bypassing the Bernoulli trial entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AdaptOverride {
    #[default]
    None,
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adaptor {
    pub p_ad: f64,
    pub adapt_ad_prob: f64,
    pub min_ad_prob: f64,
    pub max_ad_prob: f64,
    pub adaption_threshold: u32,
    pub gaussian: GaussianParams,
    pub overr: AdaptOverride,
    /// Successful adaptions since the last self-adaption of sigma/p_ad.
    invocations_since_adapt: u32,
}

impl Adaptor {
    pub fn gaussian(sigma1: f64) -> Self {
        Self {
            p_ad: 0.05,
            adapt_ad_prob: 0.0,
            min_ad_prob: 0.0,
            max_ad_prob: 1.0,
            adaption_threshold: 1,
            gaussian: GaussianParams { sigma1, ..Default::default() },
            overr: AdaptOverride::None,
            invocations_since_adapt: 0,
        }
    }

    pub fn from_config(cfg: &crate::config::AdaptorConfig) -> Self {
        Self {
            p_ad: cfg.ad_prob,
            adapt_ad_prob: cfg.adapt_ad_prob,
            min_ad_prob: cfg.min_ad_prob,
            max_ad_prob: cfg.max_ad_prob,
            adaption_threshold: cfg.adaption_threshold,
            gaussian: GaussianParams {
                sigma1: cfg.sigma1,
                sigma_sigma1: cfg.sigma_sigma1,
                min_sigma1: cfg.min_sigma1,
                max_sigma1: cfg.max_sigma1,
                use_bi_gaussian: cfg.use_bi_gaussian,
                sigma2: cfg.sigma2,
                delta: cfg.delta,
                sigma_delta: cfg.sigma_delta,
                min_delta: cfg.min_delta,
                max_delta: cfg.max_delta,
            },
            overr: AdaptOverride::None,
            invocations_since_adapt: 0,
        }
    }

    fn should_fire(&self, rng: &mut ChaCha8Rng) -> bool {
        match self.overr {
            AdaptOverride::Always => true,
            AdaptOverride::Never => false,
            AdaptOverride::None => rng.random_bool(self.p_ad.clamp(0.0, 1.0)),
        }
    }

    /// Returns true if the value changed.
    pub fn adapt(&mut self, value: &mut LeafValue, rng: &mut ChaCha8Rng) -> bool {
        if !self.should_fire(rng) {
            return false;
        }
        let step = self.draw_step(rng);
        apply_step(value, step);
        self.invocations_since_adapt += 1;
        if self.invocations_since_adapt >= self.adaption_threshold.max(1) {
            self.self_adapt(rng);
            self.invocations_since_adapt = 0;
        }
        true
    }

    fn draw_step(&self, rng: &mut ChaCha8Rng) -> f64 {
        let g = &self.gaussian;
        if g.use_bi_gaussian {
            let sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
            let normal = Normal::new(sign * g.delta, g.sigma2.max(1e-12)).expect("finite sigma2");
            normal.sample(rng)
        } else {
            let normal = Normal::new(0.0, g.sigma1.max(1e-12)).expect("finite sigma1");
            normal.sample(rng)
        }
    }

    /// Multiplicative self-adaption of sigma/delta and bounded adaption of p_ad.
    fn self_adapt(&mut self, rng: &mut ChaCha8Rng) {
        let g = &mut self.gaussian;
        let factor = Normal::new(0.0, g.sigma_sigma1.max(1e-12))
            .expect("finite sigma_sigma1")
            .sample(rng)
            .exp();
        g.sigma1 = (g.sigma1 * factor).clamp(g.min_sigma1, g.max_sigma1);

        if g.use_bi_gaussian {
            let delta_factor = Normal::new(0.0, g.sigma_delta.max(1e-12))
                .expect("finite sigma_delta")
                .sample(rng)
                .exp();
            g.delta = (g.delta * delta_factor).clamp(g.min_delta, g.max_delta);
        }

        if self.adapt_ad_prob > 0.0 {
            let drift = Normal::new(0.0, self.adapt_ad_prob)
                .expect("finite adapt_ad_prob")
                .sample(rng);
            self.p_ad = (self.p_ad + drift).clamp(self.min_ad_prob, self.max_ad_prob);
        }
    }
}

fn apply_step(value: &mut LeafValue, step: f64) {
    match value {
        LeafValue::Double(v) | LeafValue::ConstrainedDouble(v, _) => *v += step,
        LeafValue::Float(v) | LeafValue::ConstrainedFloat(v, _) => *v += step as f32,
        LeafValue::Int32(v) | LeafValue::ConstrainedInt32(v, _) => *v += step.round() as i32,
        LeafValue::Bool(v) => {
            if step.abs() > f64::EPSILON {
                *v = !*v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::get_rng;

    #[test]
    fn always_override_fires_every_time() {
        let mut adaptor = Adaptor::gaussian(0.1);
        adaptor.overr = AdaptOverride::Always;
        let mut rng = get_rng(1);
        for _ in 0..20 {
            let mut v = LeafValue::Double(0.0);
            assert!(adaptor.adapt(&mut v, &mut rng));
        }
    }

    #[test]
    fn never_override_never_fires() {
        let mut adaptor = Adaptor::gaussian(0.1);
        adaptor.overr = AdaptOverride::Never;
        let mut rng = get_rng(1);
        let mut v = LeafValue::Double(0.0);
        assert!(!adaptor.adapt(&mut v, &mut rng));
    }

    #[test]
    fn sigma_stays_within_declared_range_after_many_adaptions() {
        let mut adaptor = Adaptor::gaussian(0.5);
        adaptor.overr = AdaptOverride::Always;
        adaptor.adaption_threshold = 1;
        let mut rng = get_rng(99);
        let mut v = LeafValue::Double(0.0);
        for _ in 0..2000 {
            adaptor.adapt(&mut v, &mut rng);
        }
        assert!(adaptor.gaussian.sigma1 >= adaptor.gaussian.min_sigma1);
        assert!(adaptor.gaussian.sigma1 <= adaptor.gaussian.max_sigma1);
    }

    #[test]
    fn p_ad_stays_within_bounds_when_self_adapting() {
        let mut adaptor = Adaptor::gaussian(0.2);
        adaptor.overr = AdaptOverride::Always;
        adaptor.adapt_ad_prob = 0.3;
        adaptor.min_ad_prob = 0.01;
        adaptor.max_ad_prob = 0.9;
        let mut rng = get_rng(5);
        let mut v = LeafValue::Double(0.0);
        for _ in 0..500 {
            adaptor.adapt(&mut v, &mut rng);
            assert!(adaptor.p_ad >= adaptor.min_ad_prob && adaptor.p_ad <= adaptor.max_ad_prob);
        }
    }
}
