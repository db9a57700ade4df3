//! Command-line interface for the faultline model checker.

mod demos;

use clap::{Parser, Subcommand, ValueEnum};
use faultline_mc::{
    CounterExample, ExplorationConfig, ExploreError, Explorer, ModelCapacity, Optimum,
    ProgressCounters, Proposition, TerminateAtLabel,
};
use faultline_model::{Model, ObjectDump};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to access {path}: {message}")]
    IoError { path: String, message: String },

    #[error("unknown model `{0}` (run `faultline models` for the list)")]
    UnknownModel(String),

    #[error("model has no label `{0}`")]
    UnknownLabel(String),

    #[error(transparent)]
    Explore(#[from] ExploreError),

    #[error("{message}")]
    Other { message: String },
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "faultline", version)]
#[command(about = "Probabilistic fault model checker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CapacityPreset {
    Small,
    Medium,
    Large,
}

#[derive(clap::Args)]
struct ExploreArgs {
    /// Bundled model to explore
    #[arg(value_name = "MODEL")]
    model: String,

    /// Capacity preset
    #[arg(long, value_enum, default_value = "medium")]
    capacity: CapacityPreset,

    /// Override the maximum number of states
    #[arg(long)]
    max_states: Option<usize>,

    /// Override the transition budget
    #[arg(long)]
    max_transitions: Option<usize>,

    /// Disable parallel exploration
    #[arg(long)]
    no_parallel: bool,

    /// Number of threads for parallel exploration (0 = use all available)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Keep fault choices that had no effect on the step
    #[arg(long)]
    no_forward: bool,

    /// Do not explore successors of states carrying this label
    #[arg(long, value_name = "LABEL")]
    terminate_at: Option<String>,

    /// Print progress while exploring
    #[arg(long)]
    progress: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the bundled models
    Models,

    /// Explore a model and compute reachability probabilities
    Check {
        #[command(flatten)]
        explore: ExploreArgs,

        /// Labels whose reachability to compute (default: all labels)
        #[arg(short, long, value_name = "LABEL")]
        target: Vec<String>,

        /// Only count paths of at most this many steps
        #[arg(long)]
        bound: Option<usize>,

        /// Minimize over scheduler choices instead of maximizing
        #[arg(long)]
        min: bool,
    },

    /// Export a shortest path to a labeled state as JSON
    Trace {
        #[command(flatten)]
        explore: ExploreArgs,

        /// Label of the state to reach
        #[arg(short, long, value_name = "LABEL")]
        target: String,

        /// Output file (default: stdout)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Replay an exported trace against a model
    Replay {
        /// Bundled model the trace was recorded on
        #[arg(value_name = "MODEL")]
        model: String,

        /// Trace file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose.
    let verbose = match &cli.command {
        Commands::Models => false,
        Commands::Check { explore, .. } | Commands::Trace { explore, .. } => explore.verbose,
        Commands::Replay { verbose, .. } => *verbose,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Models => cmd_models(),
        Commands::Check {
            explore,
            target,
            bound,
            min,
        } => cmd_check(&explore, &target, bound, min),
        Commands::Trace {
            explore,
            target,
            output,
        } => cmd_trace(&explore, &target, output.as_ref()),
        Commands::Replay { model, file, .. } => cmd_replay(&model, &file),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        let code = match e {
            CliError::Explore(ref e) if e.is_capacity() => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn load_model(name: &str) -> CliResult<Arc<dyn Model>> {
    demos::by_name(name).ok_or_else(|| CliError::UnknownModel(name.to_string()))
}

fn label(model: &dyn Model, name: &str) -> CliResult<Proposition> {
    model
        .label_index(name)
        .map(Proposition::label)
        .ok_or_else(|| CliError::UnknownLabel(name.to_string()))
}

fn exploration_config(args: &ExploreArgs, track_predecessors: bool) -> ExplorationConfig {
    let mut capacity = match args.capacity {
        CapacityPreset::Small => ModelCapacity::small(),
        CapacityPreset::Medium => ModelCapacity::medium(),
        CapacityPreset::Large => ModelCapacity::large(),
    };
    if let Some(max_states) = args.max_states {
        capacity.max_states = max_states;
    }
    if let Some(max_transitions) = args.max_transitions {
        capacity.max_transitions = max_transitions;
    }
    ExplorationConfig {
        capacity,
        parallel: !args.no_parallel,
        num_threads: args.threads,
        forward_optimization: !args.no_forward,
        track_predecessors,
        progress: args.progress.then(|| Arc::new(ProgressCounters::new())),
        ..Default::default()
    }
}

/// Print the progress counters once a second until `done` is set.
fn spawn_progress_reporter(
    progress: Arc<ProgressCounters>,
    done: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let start = Instant::now();
        let mut ticks = 0u32;
        while !done.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));
            ticks += 1;
            if ticks % 10 != 0 {
                continue;
            }
            let states = progress.states.load(Ordering::Relaxed);
            eprintln!(
                "  depth {} | {} states | {} transitions | {} explored | {} queued | {:.0} states/s",
                progress.depth.load(Ordering::Relaxed),
                states,
                progress.transitions.load(Ordering::Relaxed),
                progress.explored.load(Ordering::Relaxed),
                progress.queue_len.load(Ordering::Relaxed),
                states as f64 / start.elapsed().as_secs_f64(),
            );
        }
    })
}

/// Build an explorer for `args` and explore the model.
fn explore(args: &ExploreArgs, track_predecessors: bool) -> CliResult<Explorer> {
    let model = load_model(&args.model)?;
    let config = exploration_config(args, track_predecessors);
    let progress = config.progress.clone();

    let mut explorer = Explorer::new(model.clone(), config)?;
    if let Some(name) = &args.terminate_at {
        explorer = explorer.with_modifier(TerminateAtLabel::new(label(&*model, name)?));
    }

    info!(model = %args.model, "exploring...");
    let done = Arc::new(AtomicBool::new(false));
    let reporter = progress.map(|p| spawn_progress_reporter(p, done.clone()));
    let result = explorer.explore();
    done.store(true, Ordering::Relaxed);
    if let Some(handle) = reporter {
        let _ = handle.join();
    }

    let stats = result?;
    println!();
    println!("Model: {}", args.model);
    println!("  States: {}", stats.states);
    println!("  Transition targets: {}", stats.transition_targets);
    println!("  Continuation elements: {}", stats.continuation_elements);
    println!("  Max depth: {}", stats.max_depth);
    println!(
        "  Matrix: {} distributions, {} entries{}",
        stats.distributions,
        stats.matrix_entries,
        if stats.stuttering {
            " (with stuttering state)"
        } else {
            ""
        }
    );
    println!("  Time: {:.2}s", stats.elapsed.as_secs_f64());
    println!(
        "  States/sec: {:.0}",
        stats.states as f64 / stats.elapsed.as_secs_f64()
    );
    Ok(explorer)
}

fn cmd_models() -> CliResult<()> {
    for (name, description) in demos::DEMOS {
        let model = load_model(name)?;
        println!("{name}: {description}");
        let faults: Vec<&str> = model.faults().iter().map(|f| f.name.as_str()).collect();
        let labels: Vec<&str> = model.labels().iter().map(|l| l.name()).collect();
        println!("  faults: {}", faults.join(", "));
        println!("  labels: {}", labels.join(", "));
    }
    Ok(())
}

fn cmd_check(
    args: &ExploreArgs,
    targets: &[String],
    bound: Option<usize>,
    min: bool,
) -> CliResult<()> {
    let explorer = explore(args, false)?;
    let optimum = if min { Optimum::Min } else { Optimum::Max };

    let names: Vec<String> = if targets.is_empty() {
        explorer
            .model()
            .labels()
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    } else {
        targets.to_vec()
    };

    let within = bound
        .map(|b| format!(", within {b} steps"))
        .unwrap_or_default();
    println!();
    println!("Reachability ({optimum:?}{within}):");
    for name in &names {
        let target = label(explorer.model(), name)?;
        let result = explorer.reachability(&target, bound, optimum)?;
        let note = if result.converged { "" } else { " (not converged)" };
        println!("  {name}: {:.9}{note}", result.probability);
    }
    Ok(())
}

fn cmd_trace(args: &ExploreArgs, target: &str, output: Option<&PathBuf>) -> CliResult<()> {
    let explorer = explore(args, true)?;
    let proposition = label(explorer.model(), target)?;
    let Some(counterexample) = explorer.counterexample(&proposition)? else {
        println!();
        println!("Result: `{target}` is unreachable");
        return Ok(());
    };

    println!();
    println!("Result: `{target}` reached in {} steps", counterexample.len() - 1);
    let json = counterexample.to_json()?;
    match output {
        Some(path) => {
            fs::write(path, json).map_err(|e| CliError::IoError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            println!("  Trace written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn format_dump(objects: &[ObjectDump]) -> String {
    objects
        .iter()
        .map(|object| {
            let fields = object
                .fields
                .iter()
                .filter(|f| !f.hidden)
                .map(|f| format!("{}={}", f.name, f.value))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}@{} {{{}}}", object.type_name, object.slot, fields)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn cmd_replay(model_name: &str, file: &PathBuf) -> CliResult<()> {
    let source = fs::read_to_string(file).map_err(|e| CliError::IoError {
        path: file.display().to_string(),
        message: e.to_string(),
    })?;
    let counterexample = CounterExample::from_json(&source)?;
    if counterexample.is_empty() {
        return Err(CliError::Other {
            message: format!("{} contains an empty trace", file.display()),
        });
    }

    let model = load_model(model_name)?;
    counterexample.check_faults(model.faults().len())?;
    let explorer = Explorer::new(model.clone(), ExplorationConfig::default())?;
    let mut worker = explorer.replay_worker();
    let dumps = counterexample.replay(&mut worker)?;

    println!("Replayed {} states:", dumps.len());
    for (step, objects) in dumps.iter().enumerate() {
        let active = counterexample
            .fault_activations
            .get(step)
            .copied()
            .unwrap_or_default();
        let faults: Vec<&str> = active
            .iter()
            .filter_map(|id| model.faults().get(id.index()))
            .map(|fault| fault.name.as_str())
            .collect();
        println!("  {step}: {}", format_dump(objects));
        if !faults.is_empty() {
            println!("     active faults: {}", faults.join(", "));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_model::FaultId;

    fn hazard_trace() -> CounterExample {
        let config = ExplorationConfig {
            capacity: ModelCapacity::small(),
            parallel: false,
            track_predecessors: true,
            ..Default::default()
        };
        let model = load_model("hazard-step").unwrap();
        let hazard = label(&*model, "hazard").unwrap();
        let mut explorer = Explorer::new(model, config).unwrap();
        explorer.explore().unwrap();
        explorer.counterexample(&hazard).unwrap().unwrap()
    }

    fn write_trace(name: &str, counterexample: &CounterExample) -> PathBuf {
        let file = format!("faultline-{}-{name}.json", std::process::id());
        let path = std::env::temp_dir().join(file);
        fs::write(&path, counterexample.to_json().unwrap()).unwrap();
        path
    }

    #[test]
    fn test_replay_accepts_exported_trace() {
        let path = write_trace("valid", &hazard_trace());
        let result = cmd_replay("hazard-step", &path);
        fs::remove_file(&path).unwrap();
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn test_replay_rejects_undeclared_fault() {
        let mut counterexample = hazard_trace();
        counterexample.fault_activations[0].insert(FaultId(9));
        let path = write_trace("undeclared", &counterexample);
        let result = cmd_replay("hazard-step", &path);
        fs::remove_file(&path).unwrap();
        assert!(matches!(
            result,
            Err(CliError::Explore(ExploreError::MalformedCounterExample(_)))
        ));
    }
}
