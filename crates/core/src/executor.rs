//! Where evaluation happens. The engine submits a batch of candidates and
//! awaits results under a policy; it never knows whether that meant calling
//! a closure inline, fanning out across a thread pool, or round-tripping
//! through the broker to a remote worker.

use crate::broker::{Broker, Command, WorkItem};
use crate::candidate::Candidate;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// The user-supplied fitness function: takes a candidate's parameter tree,
/// returns the primary result and any secondary results. Mirrors
/// `fitnessCalculation()` plus `registerSecondaryResult`.
pub trait FitnessFn: Send + Sync {
    fn evaluate(&self, candidate: &Candidate) -> FitnessOutcome;
}

pub enum FitnessOutcome {
    Ok { primary: f64, secondary: Vec<f64> },
    Invalid(String),
}

impl<F> FitnessFn for F
where
    F: Fn(&Candidate) -> FitnessOutcome + Send + Sync,
{
    fn evaluate(&self, candidate: &Candidate) -> FitnessOutcome {
        self(candidate)
    }
}

fn apply_outcome(candidate: &mut Candidate, outcome: FitnessOutcome, n_secondary: usize) {
    match outcome {
        FitnessOutcome::Ok { primary, secondary } => candidate.record_result(primary, &secondary, 0.0),
        FitnessOutcome::Invalid(_) => candidate.mark_invalid(n_secondary),
    }
}

/// A single-threaded, in-process executor. Evaluates candidates one at a
/// time on the calling thread; used for tests and demo problems.
pub struct SerialExecutor {
    fitness: Arc<dyn FitnessFn>,
}

impl SerialExecutor {
    pub fn new(fitness: Arc<dyn FitnessFn>) -> Self {
        Self { fitness }
    }

    pub fn evaluate_all(&self, candidates: &mut [Candidate]) {
        for candidate in candidates.iter_mut() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.fitness.evaluate(candidate)
            }))
            .unwrap_or_else(|_| FitnessOutcome::Invalid("fitness function panicked".to_string()));
            let n_secondary = candidate.secondary.len();
            apply_outcome(candidate, outcome, n_secondary);
        }
    }
}

/// Fans candidates out across `n_threads` OS threads using `std::thread`
/// scoped threads; each worker evaluates its shard inline.
pub struct MultithreadedExecutor {
    fitness: Arc<dyn FitnessFn>,
    n_threads: usize,
}

impl MultithreadedExecutor {
    pub fn new(fitness: Arc<dyn FitnessFn>, n_threads: usize) -> Self {
        Self { fitness, n_threads: n_threads.max(1) }
    }

    pub fn evaluate_all(&self, candidates: &mut [Candidate]) {
        if candidates.is_empty() {
            return;
        }
        let chunk_size = candidates.len().div_ceil(self.n_threads);
        std::thread::scope(|scope| {
            for chunk in candidates.chunks_mut(chunk_size) {
                let fitness = &self.fitness;
                scope.spawn(move || {
                    for candidate in chunk.iter_mut() {
                        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            fitness.evaluate(candidate)
                        }))
                        .unwrap_or_else(|_| {
                            FitnessOutcome::Invalid("fitness function panicked".to_string())
                        });
                        let n_secondary = candidate.secondary.len();
                        apply_outcome(candidate, outcome, n_secondary);
                    }
                });
            }
        });
    }
}

/// Routes candidates through the broker's bounded queues rather than
/// evaluating them directly. Workers (threaded or remote) are assumed to be
/// consuming the matching outbound queue independently.
pub struct BrokerExecutor {
    pub broker: Broker,
}

impl BrokerExecutor {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    pub fn submit(
        &self,
        candidates: Vec<Candidate>,
        iteration: u64,
        command: Command,
        parent_flags: &[bool],
        cancel: &AtomicBool,
    ) {
        let items = candidates
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| WorkItem {
                candidate,
                assigned_iteration: iteration,
                command,
                is_parent: parent_flags.get(i).copied().unwrap_or(false),
            })
            .collect();
        self.broker.submit(items, cancel);
    }

    pub fn receive(
        &mut self,
        iteration: u64,
        expected: usize,
        cancel: &AtomicBool,
    ) -> Result<crate::broker::ReceptionOutcome> {
        self.broker.receive(iteration, expected, cancel)
    }
}

/// The unified evaluation policy an algorithm cycle submits through. Hides
/// whether a batch ran inline, across a thread pool, or round-tripped
/// through the broker's generation discipline.
pub enum Evaluator {
    Serial(SerialExecutor),
    Multithreaded(MultithreadedExecutor),
    Broker(BrokerExecutor),
}

/// Outcome of one evaluator pass: the evaluated candidates plus, for the
/// broker path, whether the reception loop ended on timeout with some
/// expected returns still missing (the caller must then repair the
/// population by cloning survivors, per the broker's timeout-recovery rule).
pub struct EvaluationOutcome {
    pub candidates: Vec<Candidate>,
    pub short_by: usize,
}

impl Evaluator {
    pub fn evaluate(
        &mut self,
        candidates: Vec<Candidate>,
        iteration: u64,
        parent_flags: &[bool],
        cancel: &AtomicBool,
    ) -> Result<EvaluationOutcome> {
        match self {
            Evaluator::Serial(executor) => {
                let mut candidates = candidates;
                executor.evaluate_all(&mut candidates);
                Ok(EvaluationOutcome { candidates, short_by: 0 })
            }
            Evaluator::Multithreaded(executor) => {
                let mut candidates = candidates;
                executor.evaluate_all(&mut candidates);
                Ok(EvaluationOutcome { candidates, short_by: 0 })
            }
            Evaluator::Broker(executor) => {
                let expected = candidates.len();
                executor.submit(candidates, iteration, Command::AdaptThenEvaluate, parent_flags, cancel);
                let outcome = executor.receive(iteration, expected, cancel)?;
                let short_by = expected.saturating_sub(outcome.returned.len());
                Ok(EvaluationOutcome {
                    candidates: outcome.returned.into_iter().map(|item| item.candidate).collect(),
                    short_by,
                })
            }
        }
    }
}

/// A [`FitnessFn`] that farms evaluation out to an external process: writes
/// the candidate's streamlined parameters to a temp file, invokes the
/// configured binary with `--evaluate --input=<in> --output=<out>`, and
/// reads back a result document. Mirrors the reference implementation's
/// pattern of shelling out to a user script and parsing its result, but
/// over files rather than stdout so a multi-criterion result round-trips
/// without an ad hoc text grammar.
pub struct ExternalProcessEvaluator {
    pub program: std::path::PathBuf,
    pub args: Vec<String>,
    next_eval_id: std::sync::atomic::AtomicU64,
}

#[derive(Serialize)]
struct ExternalRequest<'a> {
    eval_id: u64,
    parameters: &'a [f64],
}

#[derive(Deserialize)]
struct ExternalResponse {
    eval_id: u64,
    primary: f64,
    #[serde(default)]
    secondary: Vec<f64>,
    #[serde(default = "default_valid")]
    is_valid: bool,
}

fn default_valid() -> bool {
    true
}

impl ExternalProcessEvaluator {
    pub fn new(program: impl Into<std::path::PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, next_eval_id: std::sync::atomic::AtomicU64::new(0) }
    }
}

impl FitnessFn for ExternalProcessEvaluator {
    fn evaluate(&self, candidate: &Candidate) -> FitnessOutcome {
        match self.run_once(candidate) {
            Ok(outcome) => outcome,
            Err(message) => FitnessOutcome::Invalid(message),
        }
    }
}

impl ExternalProcessEvaluator {
    fn run_once(&self, candidate: &Candidate) -> std::result::Result<FitnessOutcome, String> {
        let eval_id = self.next_eval_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let request = ExternalRequest { eval_id, parameters: &candidate.parameters.streamline() };

        let in_file = tempfile_path("optimon-eval-in", eval_id);
        let out_file = tempfile_path("optimon-eval-out", eval_id);
        let body = serde_json::to_string(&request).map_err(|e| e.to_string())?;
        std::fs::write(&in_file, body).map_err(|e| e.to_string())?;

        let status = std::process::Command::new(&self.program)
            .args(&self.args)
            .arg("--evaluate")
            .arg(format!("--input={}", in_file.display()))
            .arg(format!("--output={}", out_file.display()))
            .status()
            .map_err(|e| format!("failed to spawn external evaluator: {e}"))?;

        let cleanup = || {
            let _ = std::fs::remove_file(&in_file);
            let _ = std::fs::remove_file(&out_file);
        };

        if !status.success() {
            cleanup();
            return Err(format!("external evaluator exited with {status}"));
        }

        let body = match std::fs::read_to_string(&out_file) {
            Ok(body) => body,
            Err(e) => {
                cleanup();
                return Err(format!("external evaluator produced no output file: {e}"));
            }
        };
        cleanup();

        let response: ExternalResponse =
            serde_json::from_str(&body).map_err(|e| format!("malformed evaluator output: {e}"))?;
        if response.eval_id != eval_id {
            return Err(format!(
                "evaluator returned mismatched eval_id {} (expected {eval_id})",
                response.eval_id
            ));
        }
        if !response.is_valid {
            return Ok(FitnessOutcome::Invalid("external evaluator reported an invalid result".to_string()));
        }
        Ok(FitnessOutcome::Ok { primary: response.primary, secondary: response.secondary })
    }
}

fn tempfile_path(prefix: &str, eval_id: u64) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}-{eval_id}", std::process::id()))
}

/// A worker-side loop: pop from outbound, evaluate, push to inbound. Meant
/// to run on its own thread per worker; `n_iterations` of `None` runs until
/// cancelled. Does not branch on `item.command` — adaption always happens
/// driver-side before submission, so every item it sees only needs evaluating.
pub fn run_worker_loop(
    pair: Arc<crate::broker::BufferPair>,
    fitness: Arc<dyn FitnessFn>,
    cancel: Arc<AtomicBool>,
    poll_interval: std::time::Duration,
) {
    while !cancel.load(std::sync::atomic::Ordering::Relaxed) {
        match pair.outbound.pop_timeout(poll_interval) {
            Some(mut item) => {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    fitness.evaluate(&item.candidate)
                }))
                .unwrap_or_else(|_| FitnessOutcome::Invalid("fitness function panicked".to_string()));
                let n_secondary = item.candidate.secondary.len();
                apply_outcome(&mut item.candidate, outcome, n_secondary);
                let _ = pair.inbound.push_nonblocking(item);
            }
            None => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Tree;

    fn parabola(candidate: &Candidate) -> FitnessOutcome {
        let sum_sq: f64 = candidate.parameters.streamline().iter().map(|v| v * v).sum();
        FitnessOutcome::Ok { primary: sum_sq, secondary: Vec::new() }
    }

    #[test]
    fn serial_executor_evaluates_every_candidate() {
        let executor = SerialExecutor::new(Arc::new(parabola));
        let mut candidates = vec![Candidate::new(Tree::new(), false); 4];
        executor.evaluate_all(&mut candidates);
        assert!(candidates.iter().all(|c| !c.dirty));
    }

    #[test]
    fn multithreaded_executor_evaluates_every_candidate() {
        let executor = MultithreadedExecutor::new(Arc::new(parabola), 3);
        let mut candidates = vec![Candidate::new(Tree::new(), false); 10];
        executor.evaluate_all(&mut candidates);
        assert!(candidates.iter().all(|c| !c.dirty));
    }

    #[test]
    fn panicking_fitness_fn_marks_candidate_invalid_not_crash() {
        let executor = SerialExecutor::new(Arc::new(|_: &Candidate| -> FitnessOutcome {
            panic!("boom")
        }));
        let mut candidates = vec![Candidate::new(Tree::new(), false)];
        executor.evaluate_all(&mut candidates);
        assert!(candidates[0].invalid);
    }

    #[test]
    fn external_evaluator_reports_invalid_on_missing_program() {
        let evaluator = ExternalProcessEvaluator::new("/no/such/optimon-evaluator", Vec::new());
        let candidate = Candidate::new(Tree::new(), false);
        match evaluator.evaluate(&candidate) {
            FitnessOutcome::Invalid(_) => {}
            FitnessOutcome::Ok { .. } => panic!("expected a missing program to be reported invalid"),
        }
    }

    #[test]
    fn external_evaluator_round_trips_through_a_real_process() {
        let script = std::env::temp_dir().join(format!("optimon-echo-evaluator-{}.sh", std::process::id()));
        std::fs::write(
            &script,
            r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --input=*) in_file="${arg#--input=}" ;;
    --output=*) out_file="${arg#--output=}" ;;
  esac
done
id=$(grep -o '"eval_id":[0-9]*' "$in_file" | grep -o '[0-9]*$')
printf '{"eval_id": %s, "primary": 42.0, "secondary": [], "is_valid": true}' "$id" > "$out_file"
"#,
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let evaluator = ExternalProcessEvaluator::new("/bin/sh", vec![script.display().to_string()]);
        let candidate = Candidate::new(Tree::new(), false);
        match evaluator.evaluate(&candidate) {
            FitnessOutcome::Ok { primary, secondary } => {
                assert_eq!(primary, 42.0);
                assert!(secondary.is_empty());
            }
            FitnessOutcome::Invalid(message) => panic!("expected a valid result, got: {message}"),
        }

        std::fs::remove_file(&script).ok();
    }
}
