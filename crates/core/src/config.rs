//! Configuration surface: the key-value options recognized by every
//! algorithm instance. Every field has a default grounded in the reference
//! implementation's constants so a config file only needs to override what
//! it changes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Scale {
    #[default]
    Linear,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Domain {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub scale: Scale,
}

impl Domain {
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min.min(self.max), self.max.max(self.min))
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// The three selection disciplines of the evolutionary specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortingScheme {
    Plus,
    Comma,
    Nu1Pretain,
}

impl Default for SortingScheme {
    fn default() -> Self {
        SortingScheme::Plus
    }
}

/// Per-run adaptor tuning: Gaussian (optionally bi-Gaussian) mutation,
/// its self-adaption rate, and the adaption-probability self-adaption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptorConfig {
    pub ad_prob: f64,
    pub adapt_ad_prob: f64,
    pub min_ad_prob: f64,
    pub max_ad_prob: f64,
    pub sigma1: f64,
    pub sigma_sigma1: f64,
    pub min_sigma1: f64,
    pub max_sigma1: f64,
    /// Apply sigma/ad_prob self-adaption every N invocations.
    pub adaption_threshold: u32,
    pub use_bi_gaussian: bool,
    pub sigma2: f64,
    pub delta: f64,
    pub sigma_delta: f64,
    pub min_delta: f64,
    pub max_delta: f64,
}

impl Default for AdaptorConfig {
    fn default() -> Self {
        Self {
            ad_prob: 0.05,
            adapt_ad_prob: 0.0,
            min_ad_prob: 0.0,
            max_ad_prob: 1.0,
            sigma1: 0.5,
            sigma_sigma1: 0.8,
            min_sigma1: 1e-6,
            max_sigma1: 5.0,
            adaption_threshold: 1,
            use_bi_gaussian: false,
            sigma2: 0.1,
            delta: 1.0,
            sigma_delta: 0.8,
            min_delta: 0.0,
            max_delta: 5.0,
        }
    }
}

/// Broker tuning. Defaults mirror the reference implementation's
/// wait-factor (20), max-wait-factor (0, meaning auto-adaption is off by
/// default), and loop-time (20ms) constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub wait_factor: u32,
    pub max_wait_factor: u32,
    pub first_timeout_ms: u64,
    pub loop_time_ms: u64,
    pub outbound_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            wait_factor: 20,
            max_wait_factor: 0,
            first_timeout_ms: 60_000,
            loop_time_ms: 20,
            outbound_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckpointEncoding {
    /// Compact, single-line JSON. Not meant for manual editing.
    Binary,
    /// Pretty-printed JSON, meant for manual inspection.
    Text,
}

impl Default for CheckpointEncoding {
    fn default() -> Self {
        CheckpointEncoding::Binary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// 0 disables checkpointing.
    pub interval: u64,
    pub directory: PathBuf,
    pub base_name: String,
    pub encoding: CheckpointEncoding,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: 0,
            directory: PathBuf::from("."),
            base_name: "optimon".to_string(),
            encoding: CheckpointEncoding::Binary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HaltConfig {
    /// 0 disables the iteration budget.
    pub max_iteration: u64,
    /// 0 disables the stall budget.
    pub max_stall_iteration: u64,
    /// 0 disables the wall-clock budget.
    pub max_seconds: u64,
    pub target_fitness: Option<f64>,
}

impl Default for HaltConfig {
    fn default() -> Self {
        Self {
            max_iteration: 1000,
            max_stall_iteration: 0,
            max_seconds: 0,
            target_fitness: None,
        }
    }
}

/// Swarm specialization tuning: neighborhood topology and the
/// local/global/delta velocity multipliers, each either fixed or resampled
/// every iteration from a `[min, max]` range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub n_neighborhoods: usize,
    pub n_neighborhood_members: usize,
    pub c_local: f64,
    pub c_global: f64,
    pub c_delta: f64,
    pub randomize_c_local: Option<(f64, f64)>,
    pub randomize_c_global: Option<(f64, f64)>,
    pub randomize_c_delta: Option<(f64, f64)>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            n_neighborhoods: 5,
            n_neighborhood_members: 20,
            c_local: 2.0,
            c_global: 2.0,
            c_delta: 0.5,
            randomize_c_local: None,
            randomize_c_global: None,
            randomize_c_delta: None,
        }
    }
}

/// Gradient-descent specialization tuning: finite-difference step for the
/// gradient estimate and the (decaying) step size along it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GdConfig {
    pub finite_difference_step: f64,
    pub initial_step_size: f64,
    pub step_decay: f64,
    pub min_step_size: f64,
}

impl Default for GdConfig {
    fn default() -> Self {
        Self {
            finite_difference_step: 1e-4,
            initial_step_size: 0.1,
            step_decay: 0.98,
            min_step_size: 1e-6,
        }
    }
}

/// One axis of a parameter-scan grid or random-probe spec: `d(id,min,max,steps)`,
/// `f(...)`, `i(...)`, `b(...)` for grid axes, or `s(n)` for `n` uniform probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanAxis {
    Double { id: String, min: f64, max: f64, steps: u64 },
    Float { id: String, min: f64, max: f64, steps: u64 },
    Int32 { id: String, min: f64, max: f64, steps: u64 },
    Bool { id: String, steps: u64 },
    RandomProbes { n: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScanConfig {
    pub axes: Vec<ScanAxis>,
}

/// Top-level per-algorithm-instance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    pub seed: u64,
    /// Default population size.
    pub size: usize,
    /// mu: number of parents (EA).
    pub n_parents: usize,
    pub sorting_scheme: SortingScheme,
    pub halt: HaltConfig,
    pub checkpoint: CheckpointConfig,
    pub adaptor: AdaptorConfig,
    pub broker: BrokerConfig,
    pub swarm: SwarmConfig,
    pub gd: GdConfig,
    pub scan: ScanConfig,
    /// Parameter bounds, keyed by leaf name.
    pub bounds: HashMap<String, Domain>,
    pub maximize: bool,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            size: 20,
            n_parents: 5,
            sorting_scheme: SortingScheme::default(),
            halt: HaltConfig::default(),
            checkpoint: CheckpointConfig::default(),
            adaptor: AdaptorConfig::default(),
            broker: BrokerConfig::default(),
            swarm: SwarmConfig::default(),
            gd: GdConfig::default(),
            scan: ScanConfig::default(),
            bounds: HashMap::new(),
            maximize: false,
        }
    }
}

/// Parses the `--parameterSpec` grammar: a comma-separated list of
/// `<type>(<id>, <min>, <max>, <steps>)` items (`d`/`f`/`i`/`b`), or `s(N)`
/// for `N` uniformly-random probes.
pub fn parse_parameter_spec(spec: &str) -> crate::Result<Vec<ScanAxis>> {
    let mut axes = Vec::new();
    for item in split_top_level_commas(spec) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let open = item.find('(').ok_or_else(|| {
            crate::OptimonError::config(format!("malformed parameter-spec item: {item}"))
        })?;
        let close = item.rfind(')').ok_or_else(|| {
            crate::OptimonError::config(format!("malformed parameter-spec item: {item}"))
        })?;
        let kind = item[..open].trim();
        let args: Vec<&str> = item[open + 1..close].split(',').map(str::trim).collect();

        let axis = match kind {
            "s" => {
                let n: u64 = args
                    .first()
                    .ok_or_else(|| crate::OptimonError::config("s(N) requires one argument"))?
                    .parse()
                    .map_err(|_| crate::OptimonError::config(format!("bad probe count in {item}")))?;
                ScanAxis::RandomProbes { n }
            }
            "d" | "f" | "i" | "b" => {
                if kind == "b" {
                    if args.len() != 2 {
                        return Err(crate::OptimonError::config(format!(
                            "b(id, steps) requires two arguments, got {item}"
                        )));
                    }
                    let id = args[0].to_string();
                    let steps: u64 = args[1].parse().map_err(|_| {
                        crate::OptimonError::config(format!("bad step count in {item}"))
                    })?;
                    ScanAxis::Bool { id, steps }
                } else {
                    if args.len() != 4 {
                        return Err(crate::OptimonError::config(format!(
                            "{kind}(id, min, max, steps) requires four arguments, got {item}"
                        )));
                    }
                    let id = args[0].to_string();
                    let parse_f = |s: &str| {
                        s.parse::<f64>().map_err(|_| {
                            crate::OptimonError::config(format!("bad numeric bound in {item}"))
                        })
                    };
                    let min = parse_f(args[1])?;
                    let max = parse_f(args[2])?;
                    let steps: u64 = args[3].parse().map_err(|_| {
                        crate::OptimonError::config(format!("bad step count in {item}"))
                    })?;
                    match kind {
                        "d" => ScanAxis::Double { id, min, max, steps },
                        "f" => ScanAxis::Float { id, min, max, steps },
                        "i" => ScanAxis::Int32 { id, min, max, steps },
                        _ => unreachable!(),
                    }
                }
            }
            other => {
                return Err(crate::OptimonError::config(format!(
                    "unknown parameter-spec type '{other}' in {item}"
                )))
            }
        };
        axes.push(axis);
    }
    Ok(axes)
}

fn split_top_level_commas(spec: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in spec.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                out.push(&spec[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&spec[start..]);
    out
}

impl AlgorithmConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.size == 0 {
            return Err(crate::OptimonError::config("size must be > 0"));
        }
        if self.n_parents == 0 {
            return Err(crate::OptimonError::config("nParents must be > 0"));
        }
        if self.n_parents > self.size {
            return Err(crate::OptimonError::config("nParents must not exceed size"));
        }
        for (name, domain) in &self.bounds {
            if domain.min >= domain.max {
                return Err(crate::OptimonError::config(format!(
                    "bounds for {name} must satisfy min < max"
                )));
            }
            if domain.scale == Scale::Log && (domain.min <= 0.0 || domain.max <= 0.0) {
                return Err(crate::OptimonError::config(format!(
                    "log scale bounds for {name} must be > 0"
                )));
            }
        }
        Ok(())
    }
}
