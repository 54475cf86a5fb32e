//! procvm CLI Entry Point
//!
//! Runs one instance of a process definition and reports where it stopped.
//!
//! # Usage
//!
//! ```bash
//! # Start an instance and run it until it waits
//! procvm order.yaml
//!
//! # Validate only
//! procvm order.yaml --check
//!
//! # Run async continuations and timers due within the next hour
//! procvm order.yaml --run-jobs --advance 3600
//!
//! # Signal executions waiting at "review", with a config file
//! procvm order.yaml --config procvm.yaml --signal review --run-jobs
//! ```

use std::env;
use std::path::Path;
use std::process::ExitCode;

use chrono::{Duration, Utc};
use log::{error, info, warn};

use procvm::deployment::{
    DeployProcessStep, DeploymentContext, DeploymentOperation, FnHook, HookRegistry,
    PendingDefinitions, PostDeployInvocationStep, ProcessRegistry,
};
use procvm::execution::{Engine, InstanceSnapshot};
use procvm::jobs::{acquire_jobs, InMemoryJobStore, JobExecutor, JobStore};
use procvm::process::{load_process, quick_validate};
use procvm::{EngineConfig, APP_NAME, VERSION};

/// Upper bound on acquisition cycles per run.
const MAX_CYCLES: usize = 1_000;

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    process_path: String,
    config_path: Option<String>,
    check_only: bool,
    run_jobs: bool,
    advance_secs: i64,
    signals: Vec<String>,
    snapshot: bool,
    trace: bool,
    prefer_timer_jobs: bool,
    prefer_old_jobs: bool,
    prioritized: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Process Virtual Machine");
    println!();
}

fn print_usage() {
    println!("Usage: procvm [OPTIONS] <PROCESS_FILE>");
    println!();
    println!("Arguments:");
    println!("  <PROCESS_FILE>      Path to process definition YAML file");
    println!();
    println!("Options:");
    println!("  --config PATH       Engine configuration YAML");
    println!("  --check             Validate the definition and exit");
    println!("  --run-jobs          Execute jobs until none is acquirable");
    println!("  --advance SECS      Run jobs as if SECS seconds had passed");
    println!("  --signal ACTIVITY   Signal executions waiting at ACTIVITY (repeatable)");
    println!("  --prefer-timers     Acquire timer jobs first");
    println!("  --prefer-old        Acquire strictly by due date");
    println!("  --prioritized       Produce prioritized jobs");
    println!("  --snapshot          Save an instance snapshot when done");
    println!("  --trace             Print every executed operation");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  procvm order.yaml --check");
    println!("  procvm order.yaml --run-jobs --advance 3600");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut process_path = None;
    let mut i = 1;

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--check" => config.check_only = true,
            "--run-jobs" => config.run_jobs = true,
            "--snapshot" => config.snapshot = true,
            "--trace" => config.trace = true,
            "--prefer-timers" => config.prefer_timer_jobs = true,
            "--prefer-old" => config.prefer_old_jobs = true,
            "--prioritized" => config.prioritized = true,
            "--verbose" | "-v" => config.verbose = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path argument")?;
                config.config_path = Some(path.clone());
            }
            "--signal" => {
                i += 1;
                let activity = args.get(i).ok_or("--signal requires an activity id")?;
                config.signals.push(activity.clone());
            }
            "--advance" => {
                i += 1;
                let secs = args.get(i).ok_or("--advance requires a number of seconds")?;
                config.advance_secs = secs
                    .parse()
                    .map_err(|_| format!("Invalid advance value: {}", secs))?;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if process_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                process_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    config.process_path = process_path.ok_or("Missing <PROCESS_FILE>")?;
    Ok(config)
}

/// Loads the engine configuration and applies command-line overrides.
fn engine_config(config: &Config) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut engine_config = match &config.config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let acquisition = &mut engine_config.acquisition;
    acquisition.prefer_timer_jobs |= config.prefer_timer_jobs;
    acquisition.prefer_old_jobs |= config.prefer_old_jobs;
    acquisition.produce_prioritized_jobs |= config.prioritized;
    engine_config.validate()?;

    info!(
        "Acquisition: prefer timers={}, prefer old={}, prioritized={}, batch={}",
        engine_config.acquisition.prefer_timer_jobs,
        engine_config.acquisition.prefer_old_jobs,
        engine_config.acquisition.produce_prioritized_jobs,
        engine_config.acquisition.max_jobs_per_acquisition
    );
    Ok(engine_config)
}

fn run_jobs(
    executor: &mut JobExecutor,
    store: &mut InMemoryJobStore,
    now: chrono::DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let reports = executor.run_until_idle(store, now, MAX_CYCLES)?;
    let succeeded: usize = reports.iter().map(|r| r.succeeded.len()).sum();
    let failed: usize = reports.iter().map(|r| r.failed.len()).sum();
    info!(
        "Job executor: {} cycle(s), {} job(s) succeeded, {} failed",
        reports.len(),
        succeeded,
        failed
    );
    for instance in reports.iter().flat_map(|r| &r.lost_instances) {
        error!("Process instance {} was lost to a panicking job worker", instance);
    }
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let engine_config = engine_config(&config)?;

    info!("Loading process: {}", config.process_path);
    let definition = load_process(&config.process_path).map_err(|e| {
        error!("Failed to load process: {}", e);
        format!(
            "Could not load process from '{}': {}",
            config.process_path, e
        )
    })?;

    for warning in quick_validate(&definition) {
        warn!("{}", warning);
    }
    if config.check_only {
        println!(
            "Definition '{}' is valid: {} activities, {} transitions",
            definition.key,
            definition.activities.len(),
            definition.transitions.len()
        );
        return Ok(());
    }

    let key = definition.key.clone();
    let hooks = HookRegistry::new().with_hook(FnHook::new(
        "announce",
        |context: &DeploymentContext| {
            if let Some(registry) = context.attachments.get::<ProcessRegistry>() {
                info!("Deployment '{}' ready: {:?}", context.name, registry.keys());
            }
            Ok(())
        },
    ));
    let context = DeploymentOperation::new(config.process_path.clone())
        .attach(PendingDefinitions(vec![definition]))
        .attach(hooks)
        .with_step(DeployProcessStep)
        .with_step(PostDeployInvocationStep)
        .execute()?;
    let definition = context
        .attachments
        .get::<ProcessRegistry>()
        .and_then(|registry| registry.get(&key))
        .ok_or_else(|| format!("Definition '{}' was not deployed", key))?;

    let now = Utc::now();
    let mut engine = Engine::new(definition);
    engine.set_config(engine_config.clone());
    engine.set_clock(now);
    engine.start()?;

    let instance_id = engine.instance_id().to_string();
    let mut executor = JobExecutor::new(engine_config.acquisition.clone());
    executor.register(engine);
    let mut store = InMemoryJobStore::new();
    executor.collect_jobs(&mut store)?;

    let job_clock = now + Duration::seconds(config.advance_secs);
    if config.run_jobs {
        run_jobs(&mut executor, &mut store, job_clock)?;
    }

    if !config.signals.is_empty() {
        let engine = executor
            .engine_mut(&instance_id)
            .ok_or("Engine not registered")?;
        for activity in &config.signals {
            let waiting = engine.tree().executions_at(activity);
            if waiting.is_empty() {
                warn!("No execution waiting at '{}'", activity);
            }
            for execution in waiting {
                engine.signal(execution)?;
            }
        }
        executor.collect_jobs(&mut store)?;
        if config.run_jobs {
            run_jobs(&mut executor, &mut store, job_clock)?;
        }
    }

    let engine = executor
        .engine(&instance_id)
        .ok_or("Engine not registered")?;

    println!();
    println!("Instance {} of '{}'", instance_id, key);
    println!(
        "Status: {}",
        if engine.is_ended() { "ended" } else { "waiting" }
    );
    println!();
    print!("{}", engine.tree().render());

    let pending = acquire_jobs(
        &store.jobs(),
        usize::MAX,
        &engine_config.acquisition,
        job_clock,
    );
    if !store.is_empty() {
        println!();
        println!("Jobs ({} acquirable at {}):", pending.len(), job_clock);
        for job in pending {
            println!("  {} due {:?} priority {}", job, job.due_date, job.priority);
        }
        for job in store.jobs().iter().filter(|j| !j.is_acquirable(job_clock)) {
            println!("  {} (not acquirable)", job);
        }
    }

    if config.trace {
        println!();
        print!("{}", engine.timeline().trace());
    }
    println!("{}", engine.timeline().summary_chart());

    if config.snapshot {
        let snapshot = InstanceSnapshot::capture(engine, store.jobs_for_instance(&instance_id));
        snapshot.save(Path::new(&engine_config.snapshot_dir))?;
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
