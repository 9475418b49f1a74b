//! Command-line driver for `optimon-core`. Wires a config file (or CLI
//! overrides) and a fitness source — a built-in demo problem or an external
//! evaluator process — to one of the four algorithm specializations through
//! the factory registry, then runs the iteration engine to completion.

mod demos;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use optimon_core::algorithm::ea::EaAlgorithm;
use optimon_core::algorithm::gd::GdAlgorithm;
use optimon_core::algorithm::scan::ScanAlgorithm;
use optimon_core::algorithm::swarm::SwarmAlgorithm;
use optimon_core::broker::Broker;
use optimon_core::candidate::Candidate;
use optimon_core::checkpoint;
use optimon_core::config::{parse_parameter_spec, AlgorithmConfig, Domain, Scale};
use optimon_core::engine::{Algorithm, CycleResult, InfoHook, IterationEngine};
use optimon_core::executor::{
    run_worker_loop, BrokerExecutor, Evaluator, ExternalProcessEvaluator, FitnessFn,
    MultithreadedExecutor, SerialExecutor,
};
use optimon_core::param::adaptor::Adaptor;
use optimon_core::param::{Leaf, LeafValue, Tree};
use optimon_core::population::Population;
use optimon_core::postprocess::{EaPostProcessor, PostProcessor};
use optimon_core::registry::{AlgorithmFactory, RegistryHandle};
use optimon_core::rng::get_rng;
use serde::Serialize;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "optimon", version, about = "Distributed, parallel black-box parameter optimizer")]
struct Cli {
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an optimization to completion (or until cancelled/checkpointed).
    Run(RunArgs),
    /// Parse and validate a config file without running anything.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Mnemonic {
    Ea,
    Swarm,
    Gd,
    Ps,
}

impl Mnemonic {
    fn as_str(&self) -> &'static str {
        match self {
            Mnemonic::Ea => "ea",
            Mnemonic::Swarm => "swarm",
            Mnemonic::Gd => "gd",
            Mnemonic::Ps => "ps",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Problem {
    Parabola,
    Rosenbrock,
    /// Per-criterion shifted parabolas; pairs with `--pareto` (see
    /// `--pareto-offsets`).
    MultiParabola,
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long, value_enum)]
    algorithm: Mnemonic,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    problem: Option<Problem>,
    #[arg(long)]
    evaluator: Option<PathBuf>,
    #[arg(long = "evaluator-arg")]
    evaluator_args: Vec<String>,
    #[arg(long = "checkpoint-resume")]
    checkpoint_resume: Option<PathBuf>,
    #[arg(long = "parameterSpec")]
    parameter_spec: Option<String>,
    /// Run this many local worker threads against the broker's generation
    /// discipline instead of evaluating inline. In this single-binary
    /// implementation a "remote" worker is just another thread polling the
    /// same process-wide buffer pair — a real networked client would dial a
    /// remote queue instead, which is out of scope here (see DESIGN.md).
    #[arg(long)]
    client: bool,
    #[arg(long, default_value_t = 1)]
    workers: usize,
    /// Dimensionality used to synthesize default bounds when the config
    /// carries none (convenient for demo problems without a config file).
    #[arg(long, default_value_t = 2)]
    dims: usize,
    #[arg(long, default_value_t = -5.0)]
    bounds_min: f64,
    #[arg(long, default_value_t = 5.0)]
    bounds_max: f64,
    #[arg(long)]
    pareto: bool,
    /// Per-criterion minima for `--problem multi-parabola`, comma-separated;
    /// the first value is the primary criterion, the rest become `secondary`.
    #[arg(long = "pareto-offsets", value_delimiter = ',', default_value = "-1,0,1")]
    pareto_offsets: Vec<f64>,
    /// Recursively refine the top survivor(s) with a nested single-parent
    /// EA each cycle.
    #[arg(long = "eaPostProcess")]
    ea_post_process: bool,
    #[arg(long = "eaPostSurvivors", default_value_t = 1)]
    ea_post_survivors: usize,
    #[arg(long = "eaPostMaxIterations", default_value_t = 20)]
    ea_post_max_iterations: u64,

    #[arg(long = "eaMaxIterations")]
    ea_max_iterations: Option<u64>,
    #[arg(long = "eaMaxStallIterations")]
    ea_max_stall_iterations: Option<u64>,
    #[arg(long = "eaMaxSeconds")]
    ea_max_seconds: Option<u64>,

    #[arg(long = "swarmMaxIterations")]
    swarm_max_iterations: Option<u64>,
    #[arg(long = "swarmMaxStallIterations")]
    swarm_max_stall_iterations: Option<u64>,
    #[arg(long = "swarmMaxSeconds")]
    swarm_max_seconds: Option<u64>,

    #[arg(long = "gdMaxIterations")]
    gd_max_iterations: Option<u64>,
    #[arg(long = "gdMaxStallIterations")]
    gd_max_stall_iterations: Option<u64>,
    #[arg(long = "gdMaxSeconds")]
    gd_max_seconds: Option<u64>,

    #[arg(long = "psMaxIterations")]
    ps_max_iterations: Option<u64>,
    #[arg(long = "psMaxStallIterations")]
    ps_max_stall_iterations: Option<u64>,
    #[arg(long = "psMaxSeconds")]
    ps_max_seconds: Option<u64>,
}

fn init_tracing(log_format: LogFormat, log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .into_diagnostic()?;
    let fmt = tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(std::io::stderr);
    match log_format {
        LogFormat::Json => fmt.json().init(),
        LogFormat::Pretty => fmt.init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, &cli.log_level)?;

    match cli.command {
        Commands::Run(args) => run_command(args),
        Commands::Validate { config } => validate_command(&config),
    }
}

fn validate_command(config_path: &Path) -> Result<()> {
    tracing::info!(command = "validate", config = %config_path.display());
    load_config(config_path)?;
    println!("Config OK");
    Ok(())
}

fn load_config(path: &Path) -> Result<AlgorithmConfig> {
    let contents = std::fs::read_to_string(path)
        .into_diagnostic()
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: AlgorithmConfig = serde_json::from_str(&contents)
        .into_diagnostic()
        .with_context(|| format!("invalid config JSON in {}", path.display()))?;
    config.validate().into_diagnostic().with_context(|| "invalid configuration")?;
    Ok(config)
}

fn apply_halt_overrides(config: &mut AlgorithmConfig, mnemonic: Mnemonic, args: &RunArgs) {
    let (max_iteration, max_stall_iteration, max_seconds) = match mnemonic {
        Mnemonic::Ea => (args.ea_max_iterations, args.ea_max_stall_iterations, args.ea_max_seconds),
        Mnemonic::Swarm => {
            (args.swarm_max_iterations, args.swarm_max_stall_iterations, args.swarm_max_seconds)
        }
        Mnemonic::Gd => (args.gd_max_iterations, args.gd_max_stall_iterations, args.gd_max_seconds),
        Mnemonic::Ps => (args.ps_max_iterations, args.ps_max_stall_iterations, args.ps_max_seconds),
    };
    if let Some(v) = max_iteration {
        config.halt.max_iteration = v;
    }
    if let Some(v) = max_stall_iteration {
        config.halt.max_stall_iteration = v;
    }
    if let Some(v) = max_seconds {
        config.halt.max_seconds = v;
    }
}

fn ensure_default_bounds(config: &mut AlgorithmConfig, args: &RunArgs) {
    if !config.bounds.is_empty() {
        return;
    }
    for i in 0..args.dims.max(1) {
        config.bounds.insert(
            format!("x{i}"),
            Domain { min: args.bounds_min, max: args.bounds_max, scale: Scale::Linear },
        );
    }
}

fn build_fitness(args: &RunArgs) -> Arc<dyn FitnessFn> {
    if let Some(program) = &args.evaluator {
        return Arc::new(ExternalProcessEvaluator::new(program.clone(), args.evaluator_args.clone()));
    }
    match args.problem.unwrap_or(Problem::Parabola) {
        Problem::Parabola => Arc::new(demos::parabola) as Arc<dyn FitnessFn>,
        Problem::Rosenbrock => Arc::new(demos::rosenbrock) as Arc<dyn FitnessFn>,
        Problem::MultiParabola => {
            Arc::new(demos::multi_parabola(args.pareto_offsets.clone())) as Arc<dyn FitnessFn>
        }
    }
}

/// Runs a lifecycle hook (`--init`/`--finalize`) against an external evaluator
/// process. Best-effort: a failure is logged, not fatal — the core's only
/// hard contract with an external process is the per-candidate evaluate
/// round trip.
fn invoke_lifecycle_hook(program: &Path, args: &[String], flag: &str) {
    match std::process::Command::new(program).args(args).arg(flag).status() {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::warn!(flag, %status, "evaluator lifecycle hook exited non-zero"),
        Err(error) => tracing::warn!(flag, %error, "failed to invoke evaluator lifecycle hook"),
    }
}

fn parameter_tree(config: &AlgorithmConfig) -> Tree {
    let mut names: Vec<&String> = config.bounds.keys().collect();
    names.sort();
    let mut tree = Tree::new();
    for name in names {
        let domain = config.bounds[name].clone();
        let adaptor = Adaptor::from_config(&config.adaptor);
        let mid = (domain.min + domain.max) / 2.0;
        tree.push_leaf(Leaf::new(name.clone(), LeafValue::ConstrainedDouble(mid, domain), adaptor));
    }
    tree
}

fn initial_population_of_size(config: &AlgorithmConfig, size: usize) -> Population {
    let mut rng = get_rng(config.seed);
    let mut population = Population::new(size.max(1));
    for _ in 0..size.max(1) {
        let mut tree = parameter_tree(config);
        tree.random_init(&mut rng);
        let mut candidate = Candidate::new(tree, config.maximize);
        candidate.mark_dirty();
        population.members.push(candidate);
    }
    population
}

struct EaFactory {
    evaluator: RefCell<Option<Evaluator>>,
    pareto: bool,
    post_process: Option<(Arc<dyn FitnessFn>, usize, u64)>,
}

impl AlgorithmFactory for EaFactory {
    fn mnemonic(&self) -> &'static str {
        "ea"
    }

    fn build(&self, config: AlgorithmConfig) -> optimon_core::Result<Box<dyn Any>> {
        let evaluator = self
            .evaluator
            .borrow_mut()
            .take()
            .ok_or_else(|| optimon_core::OptimonError::invariant("ea evaluator already consumed"))?;
        let lambda = config.size.saturating_sub(config.n_parents).max(1);
        let population = initial_population_of_size(&config, config.size);
        let algorithm =
            EaAlgorithm::new(config.n_parents, lambda, config.sorting_scheme, self.pareto, evaluator, config.seed);
        let post_processor: Option<Box<dyn PostProcessor>> =
            self.post_process.as_ref().map(|(fitness, n_survivors, max_iterations)| {
                let mut nested_config = config.clone();
                nested_config.halt.max_iteration = *max_iterations;
                nested_config.halt.max_stall_iteration = 0;
                nested_config.halt.max_seconds = 0;
                nested_config.checkpoint = Default::default();
                Box::new(EaPostProcessor::new(nested_config, fitness.clone(), *n_survivors)) as Box<dyn PostProcessor>
            });
        Ok(Box::new((config, population, algorithm, post_processor)))
    }
}

struct SwarmFactory {
    evaluator: RefCell<Option<Evaluator>>,
}

impl AlgorithmFactory for SwarmFactory {
    fn mnemonic(&self) -> &'static str {
        "swarm"
    }

    fn build(&self, config: AlgorithmConfig) -> optimon_core::Result<Box<dyn Any>> {
        let evaluator = self
            .evaluator
            .borrow_mut()
            .take()
            .ok_or_else(|| optimon_core::OptimonError::invariant("swarm evaluator already consumed"))?;
        let total = config.swarm.n_neighborhoods.max(1) * config.swarm.n_neighborhood_members.max(1);
        let population = initial_population_of_size(&config, total);
        let algorithm = SwarmAlgorithm::new(config.swarm.clone(), config.maximize, evaluator, config.seed);
        Ok(Box::new((config, population, algorithm)))
    }
}

struct GdFactory {
    evaluator: RefCell<Option<Evaluator>>,
}

impl AlgorithmFactory for GdFactory {
    fn mnemonic(&self) -> &'static str {
        "gd"
    }

    fn build(&self, config: AlgorithmConfig) -> optimon_core::Result<Box<dyn Any>> {
        let evaluator = self
            .evaluator
            .borrow_mut()
            .take()
            .ok_or_else(|| optimon_core::OptimonError::invariant("gd evaluator already consumed"))?;
        let population = initial_population_of_size(&config, 1);
        let algorithm = GdAlgorithm::new(config.gd.clone(), config.maximize, evaluator);
        Ok(Box::new((config, population, algorithm)))
    }
}

struct ScanFactory {
    evaluator: RefCell<Option<Evaluator>>,
}

impl AlgorithmFactory for ScanFactory {
    fn mnemonic(&self) -> &'static str {
        "ps"
    }

    fn build(&self, config: AlgorithmConfig) -> optimon_core::Result<Box<dyn Any>> {
        let evaluator = self
            .evaluator
            .borrow_mut()
            .take()
            .ok_or_else(|| optimon_core::OptimonError::invariant("ps evaluator already consumed"))?;
        if config.scan.axes.is_empty() {
            return Err(optimon_core::OptimonError::config(
                "parameter-scan requires at least one axis (--parameterSpec or config.scan.axes)",
            ));
        }
        let population = Population::from_members(vec![Candidate::new(Tree::new(), config.maximize)], config.size);
        let algorithm = ScanAlgorithm::new(config.scan.axes.clone(), evaluator, config.maximize, config.seed);
        Ok(Box::new((config, population, algorithm)))
    }
}

#[derive(Default)]
struct TracingHook;

impl InfoHook for TracingHook {
    fn on_init(&mut self, population: &Population) {
        tracing::info!(population = population.len(), "optimization starting");
    }

    fn on_processing(&mut self, population: &Population, iteration: u64, best: &CycleResult) {
        tracing::debug!(
            iteration,
            best_transformed = best.best_transformed,
            population = population.len(),
            "cycle complete"
        );
    }

    fn on_end(&mut self, population: &Population, iteration: u64) {
        tracing::info!(iteration, population = population.len(), "optimization ending");
    }
}

#[derive(Serialize)]
struct RunOutput {
    algorithm: &'static str,
    iterations: u64,
    best_raw: f64,
    best_transformed: f64,
    best_parameters: HashMap<String, f64>,
}

fn run_engine<A: Algorithm>(
    config: AlgorithmConfig,
    mut population: Population,
    algorithm: A,
    post_processor: Option<Box<dyn PostProcessor>>,
    resume: Option<&Path>,
) -> Result<()> {
    let mut resume_iteration = 0u64;
    let mut resume_best = None;
    let mut resume_rng_state = None;
    if let Some(path) = resume {
        let snapshot = checkpoint::load(path)
            .into_diagnostic()
            .with_context(|| format!("failed to load checkpoint {}", path.display()))?;
        population = checkpoint::snapshot_to_population(&snapshot);
        resume_iteration = snapshot.iteration;
        resume_best = Some(snapshot.best_transformed);
        resume_rng_state = snapshot.rng_state;
    }

    let name = algorithm.name();
    let mut engine = IterationEngine::new(config, algorithm, population);
    if let Some(post_processor) = post_processor {
        engine = engine.with_post_processor(post_processor);
    }
    engine.iteration = resume_iteration;
    if let Some(best) = resume_best {
        engine.best_ever_transformed = best;
        engine.best_ever_raw = best;
    }
    // Restore the generator's exact keystream position so a checkpointed
    // run continues the same sequence a fresh run with the same seed would
    // have produced, instead of restarting it.
    if let Some(state) = &resume_rng_state {
        engine.algorithm.restore_rng_state(state);
    }

    let mut hook = TracingHook;
    let best = engine.optimize(&mut hook).into_diagnostic().with_context(|| "optimization run failed")?;

    engine.population.sort_best_first();
    let winner = engine.population.members.first();
    let output = RunOutput {
        algorithm: name,
        iterations: engine.iteration,
        best_raw: winner.map(|c| c.primary.raw).unwrap_or(best),
        best_transformed: best,
        best_parameters: winner.map(|c| c.parameters.streamline_named()).unwrap_or_default(),
    };
    println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
    Ok(())
}

fn run_command(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AlgorithmConfig::default(),
    };
    apply_halt_overrides(&mut config, args.algorithm, &args);

    if args.algorithm == Mnemonic::Ps {
        if let Some(spec) = &args.parameter_spec {
            config.scan.axes =
                parse_parameter_spec(spec).into_diagnostic().with_context(|| "invalid --parameterSpec grammar")?;
        }
    } else {
        ensure_default_bounds(&mut config, &args);
    }
    config.validate().into_diagnostic().with_context(|| "invalid configuration")?;

    tracing::info!(algorithm = args.algorithm.as_str(), "starting run");

    if let Some(program) = &args.evaluator {
        invoke_lifecycle_hook(program, &args.evaluator_args, "--init");
    }

    let fitness = build_fitness(&args);
    let n_workers = args.workers.max(1);

    let (real_evaluator, worker_pool) = if args.client {
        let broker = Broker::new(&config.broker);
        let pair = broker.buffer_pair();
        let worker_cancel = Arc::new(AtomicBool::new(false));
        let loop_time = Duration::from_millis(config.broker.loop_time_ms.max(1));
        let handles: Vec<_> = (0..n_workers)
            .map(|_| {
                let pair = pair.clone();
                let fitness = fitness.clone();
                let cancel = worker_cancel.clone();
                std::thread::spawn(move || run_worker_loop(pair, fitness, cancel, loop_time))
            })
            .collect();
        (Evaluator::Broker(BrokerExecutor::new(broker)), Some((worker_cancel, handles)))
    } else if n_workers > 1 {
        (Evaluator::Multithreaded(MultithreadedExecutor::new(fitness.clone(), n_workers)), None)
    } else {
        (Evaluator::Serial(SerialExecutor::new(fitness.clone())), None)
    };

    // Every mnemonic gets a registered factory, per the external interface,
    // but only the one actually selected carries the evaluator built above —
    // the rest get an inert serial filler since at most one factory is ever
    // built in a given run.
    let filler = || Evaluator::Serial(SerialExecutor::new(fitness.clone()));
    let mut real_evaluator = Some(real_evaluator);
    let mut take_or_filler = |mnemonic: Mnemonic| {
        if args.algorithm == mnemonic {
            real_evaluator.take().expect("real evaluator installed exactly once")
        } else {
            filler()
        }
    };

    let post_process =
        args.ea_post_process.then(|| (fitness.clone(), args.ea_post_survivors, args.ea_post_max_iterations));

    let mut registry = RegistryHandle::new();
    registry.register(Box::new(EaFactory {
        evaluator: RefCell::new(Some(take_or_filler(Mnemonic::Ea))),
        pareto: args.pareto,
        post_process,
    }));
    registry.register(Box::new(SwarmFactory { evaluator: RefCell::new(Some(take_or_filler(Mnemonic::Swarm))) }));
    registry.register(Box::new(GdFactory { evaluator: RefCell::new(Some(take_or_filler(Mnemonic::Gd))) }));
    registry.register(Box::new(ScanFactory { evaluator: RefCell::new(Some(take_or_filler(Mnemonic::Ps))) }));

    let factory = registry
        .lookup(args.algorithm.as_str())
        .ok_or_else(|| miette::miette!("no factory registered for algorithm {}", args.algorithm.as_str()))?;
    let built = factory.build(config.clone()).map_err(|e| miette::miette!("{e}"))?;

    let outcome = match args.algorithm {
        Mnemonic::Ea => {
            let (config, population, algorithm, post_processor) = *built
                .downcast::<(AlgorithmConfig, Population, EaAlgorithm, Option<Box<dyn PostProcessor>>)>()
                .map_err(|_| miette::miette!("internal error: ea factory produced an unexpected type"))?;
            run_engine(config, population, algorithm, post_processor, args.checkpoint_resume.as_deref())
        }
        Mnemonic::Swarm => {
            let (config, population, algorithm) = *built
                .downcast::<(AlgorithmConfig, Population, SwarmAlgorithm)>()
                .map_err(|_| miette::miette!("internal error: swarm factory produced an unexpected type"))?;
            run_engine(config, population, algorithm, None, args.checkpoint_resume.as_deref())
        }
        Mnemonic::Gd => {
            let (config, population, algorithm) = *built
                .downcast::<(AlgorithmConfig, Population, GdAlgorithm)>()
                .map_err(|_| miette::miette!("internal error: gd factory produced an unexpected type"))?;
            run_engine(config, population, algorithm, None, args.checkpoint_resume.as_deref())
        }
        Mnemonic::Ps => {
            let (config, population, algorithm) = *built
                .downcast::<(AlgorithmConfig, Population, ScanAlgorithm)>()
                .map_err(|_| miette::miette!("internal error: ps factory produced an unexpected type"))?;
            run_engine(config, population, algorithm, None, args.checkpoint_resume.as_deref())
        }
    };

    if let Some((worker_cancel, handles)) = worker_pool {
        worker_cancel.store(true, Ordering::Relaxed);
        for handle in handles {
            let _ = handle.join();
        }
    }

    if let Some(program) = &args.evaluator {
        invoke_lifecycle_hook(program, &args.evaluator_args, "--finalize");
    }

    outcome
}
