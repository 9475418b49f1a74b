//! The generic iteration engine: the spine every algorithm specialization
//! plugs into. It knows nothing about selection or variation — only the
//! init/cycle/halt/checkpoint/finalize lifecycle.

use crate::config::AlgorithmConfig;
use crate::error::Result;
use crate::population::Population;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// One cycle's outcome: the best raw and transformed fitness seen this
/// cycle, handed up so the engine can update bests and check for stall.
#[derive(Debug, Clone, Copy)]
pub struct CycleResult {
    pub best_raw: f64,
    pub best_transformed: f64,
}

/// The algorithm-specific half of a cycle: variation, submission, and
/// selection. Everything halt/checkpoint/info-hook related lives in the
/// engine instead.
pub trait Algorithm {
    fn cycle_logic(
        &mut self,
        population: &mut Population,
        iteration: u64,
        cancel: &AtomicBool,
    ) -> Result<CycleResult>;

    /// Algorithm-specific extra halt condition (e.g. parameter-scan grid
    /// exhaustion). Most algorithms never trigger early.
    fn custom_halt(&self, _population: &Population, _iteration: u64) -> bool {
        false
    }

    /// Captures the algorithm's internal RNG for checkpointing. `None` for
    /// algorithms with no stochastic component (e.g. gradient descent).
    fn rng_state(&self) -> Option<crate::rng::RngState> {
        None
    }

    /// Restores RNG state loaded from a checkpoint (no-op by default).
    fn restore_rng_state(&mut self, _state: &crate::rng::RngState) {}

    fn name(&self) -> &'static str;
}

/// Info hooks: callable at `INFO_INIT` / `INFO_PROCESSING` / `INFO_END`.
/// Must not mutate the population; a panic here is logged and swallowed,
/// never propagated.
pub trait InfoHook {
    fn on_init(&mut self, _population: &Population) {}
    fn on_processing(&mut self, _population: &Population, _iteration: u64, _best: &CycleResult) {}
    fn on_end(&mut self, _population: &Population, _iteration: u64) {}
}

fn invoke_hook<F: FnOnce() + std::panic::UnwindSafe>(label: &str, f: F) {
    if std::panic::catch_unwind(f).is_err() {
        warn!(hook = label, "info hook panicked; ignoring");
    }
}

pub struct IterationEngine<A: Algorithm> {
    pub config: AlgorithmConfig,
    pub algorithm: A,
    pub population: Population,
    pub iteration: u64,
    pub best_ever_raw: f64,
    pub best_ever_transformed: f64,
    pub stall_count: u64,
    pub cancel: AtomicBool,
    pub post_processor: Option<Box<dyn crate::postprocess::PostProcessor>>,
    start_time: Option<Instant>,
}

impl<A: Algorithm> IterationEngine<A> {
    pub fn new(config: AlgorithmConfig, algorithm: A, population: Population) -> Self {
        let worst = if config.maximize { f64::NEG_INFINITY } else { f64::INFINITY };
        Self {
            config,
            algorithm,
            population,
            iteration: 0,
            best_ever_raw: worst,
            best_ever_transformed: worst,
            stall_count: 0,
            cancel: AtomicBool::new(false),
            post_processor: None,
            start_time: None,
        }
    }

    pub fn with_post_processor(mut self, post_processor: Box<dyn crate::postprocess::PostProcessor>) -> Self {
        self.post_processor = Some(post_processor);
        self
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    fn is_better(&self, transformed: f64) -> bool {
        if self.config.maximize {
            transformed > self.best_ever_transformed
        } else {
            transformed < self.best_ever_transformed
        }
    }

    fn halt_reason(&self) -> Option<&'static str> {
        let halt = &self.config.halt;
        if halt.max_iteration > 0 && self.iteration >= halt.max_iteration {
            return Some("maxIteration");
        }
        if halt.max_stall_iteration > 0 && self.stall_count >= halt.max_stall_iteration {
            return Some("maxStallIteration");
        }
        if halt.max_seconds > 0 {
            if let Some(start) = self.start_time {
                if start.elapsed().as_secs() >= halt.max_seconds {
                    return Some("maxSeconds");
                }
            }
        }
        if let Some(target) = halt.target_fitness {
            let reached = if self.config.maximize {
                self.best_ever_transformed >= target
            } else {
                self.best_ever_transformed <= target
            };
            if reached {
                return Some("targetFitness");
            }
        }
        if self.cancel.load(Ordering::Relaxed) {
            return Some("cancelled");
        }
        if self.algorithm.custom_halt(&self.population, self.iteration) {
            return Some("customHalt");
        }
        None
    }

    /// Runs `init → (cycleLogic → postEvaluationWork → halt-check →
    /// checkpoint)* → finalize` and returns the best-ever transformed
    /// fitness. `cycleLogic` failures are fatal and propagate after
    /// `finalize()` runs; info hook failures never propagate.
    pub fn optimize(&mut self, hook: &mut dyn InfoHook) -> Result<f64> {
        if self.population.is_empty() {
            return Err(crate::OptimonError::invariant(
                "optimize() called with an empty population",
            ));
        }
        self.start_time = Some(Instant::now());
        invoke_hook("init", std::panic::AssertUnwindSafe(|| hook.on_init(&self.population)));

        let result = self.run_loop(hook);

        invoke_hook(
            "end",
            std::panic::AssertUnwindSafe(|| hook.on_end(&self.population, self.iteration)),
        );
        self.finalize();
        result.map(|()| self.best_ever_transformed)
    }

    fn run_loop(&mut self, hook: &mut dyn InfoHook) -> Result<()> {
        loop {
            if let Some(reason) = self.halt_reason() {
                info!(reason, iteration = self.iteration, "halting");
                return Ok(());
            }

            let cycle =
                self.algorithm.cycle_logic(&mut self.population, self.iteration, &self.cancel)?;

            if let Some(post_processor) = &mut self.post_processor {
                if let Err(err) = post_processor.process(&mut self.population) {
                    warn!(error = %err, "post-processor failed; skipping this cycle");
                }
            }

            if self.is_better(cycle.best_transformed) {
                self.best_ever_raw = cycle.best_raw;
                self.best_ever_transformed = cycle.best_transformed;
                self.stall_count = 0;
            } else {
                self.stall_count += 1;
            }

            invoke_hook(
                "processing",
                std::panic::AssertUnwindSafe(|| {
                    hook.on_processing(&self.population, self.iteration, &cycle)
                }),
            );

            if self.config.checkpoint.interval > 0
                && self.iteration % self.config.checkpoint.interval == 0
            {
                if let Err(err) = self.save_checkpoint() {
                    warn!(error = %err, "checkpoint save failed; continuing");
                }
            }

            self.iteration += 1;
        }
    }

    fn save_checkpoint(&self) -> Result<()> {
        crate::checkpoint::save(
            &self.config,
            &self.population,
            self.iteration,
            self.best_ever_transformed,
            self.algorithm.rng_state(),
        )
    }

    fn finalize(&mut self) {
        info!(
            iteration = self.iteration,
            best = self.best_ever_transformed,
            "optimize() finished"
        );
    }
}
