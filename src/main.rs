// LATENCYSUITE v1.0.0 -- REAL-TIME SCHEDULING LATENCY BENCHMARK
// RUNS A WORKLOAD REPEATEDLY UNDER CONTROLLED SCHEDULING AND POWER CONDITIONS
// AND LOGS PER-ITERATION WORKLOAD AND IDLE TIMES AS CSV.
//
// RUST USERSPACE ONLY: SCHED_FIFO VIA sched_setscheduler, WAKE LOCK VIA PM-QOS,
// POWER LEVEL VIA CPUFREQ, CORE LOCK VIA sched_setaffinity.

mod cli;

use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use latencysuite::config::{
    load_test_cases, RunConfiguration, TestCase, CYCLES_DEFAULT, CYCLES_MAX, CYCLES_MIN, CYCLES_STEP,
    PARAMETER_DEFAULT, PARAMETER_MAX, PARAMETER_MIN, PARAMETER_STEP, SLEEP_DEFAULT_MS, SLEEP_MAX_MS,
    SLEEP_MIN_MS, SLEEP_STEP_MS,
};
use latencysuite::engine::RunStatus;
use latencysuite::event::{EventLog, RunEvent};
use latencysuite::power::LinuxPower;
use latencysuite::sched::LinuxScheduler;
use latencysuite::sequencer::{RunOutcome, RunRequest, Sequencer, Worker};
use latencysuite::workload::WorkloadRegistry;

#[derive(Parser)]
#[command(name = "latencysuite")]
#[command(about = "LATENCYSUITE -- REAL-TIME SCHEDULING LATENCY BENCHMARK")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Command {
    // RUN THE SELECTED TEST CASES (DEFAULT)
    Run(RunArgs),

    // REPORT WHETHER THIS MACHINE CAN PRODUCE REAL-TIME SAMPLES
    Check,

    // PRINT IDLE OVERSHOOT SAMPLES UNTIL CTRL+C
    Probe {
        #[arg(long, default_value_t = 10)]
        sleep_ms: u64,

        #[arg(long)]
        count: Option<u64>,

        #[arg(long)]
        priority: Option<i32>,
    },

    // LIST WORKLOADS AND (WITH --cases) TEST CASES
    List {
        #[arg(long)]
        cases: Option<PathBuf>,
    },
}

#[derive(Args, Clone)]
struct RunArgs {
    // WORKLOAD TO MEASURE
    #[arg(long, default_value = "spin")]
    workload: String,

    // INTEGER HANDED TO THE WORKLOAD ON EVERY CALL
    #[arg(long, default_value_t = PARAMETER_DEFAULT)]
    parameter: u32,

    // MEASURED ITERATIONS PER TEST CASE
    #[arg(long, default_value_t = CYCLES_DEFAULT)]
    cycles: u64,

    // IDLE BETWEEN ITERATIONS IN MILLISECONDS
    #[arg(long, default_value_t = SLEEP_DEFAULT_MS)]
    sleep_ms: u64,

    // DIRECTORY RECEIVING THE CSV LOGS
    #[arg(long, default_value = "LatencySuite")]
    out_dir: PathBuf,

    // JSON FILE WITH A LIST OF TEST CASES (OVERRIDES THE INLINE CASE)
    #[arg(long)]
    cases: Option<PathBuf>,

    // INLINE TEST CASE
    #[arg(long, default_value = "Default")]
    name: String,

    #[arg(long)]
    priority: Option<i32>,

    #[arg(long)]
    power: Option<u8>,

    #[arg(long)]
    core: Option<usize>,

    // SKIP THE UNELEVATED WARMUP CASE
    #[arg(long)]
    no_warmup: bool,

    // DEBUG-LEVEL LOGGING
    #[arg(long)]
    verbose: bool,

    // DUMP FULL EVENT LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let opts = Cli::parse();

    match opts.command {
        Some(Command::Check) => {
            init_logging(false);
            cli::check::run_check()
        }
        Some(Command::Probe { sleep_ms, count, priority }) => {
            init_logging(false);
            cli::probe::run_probe(sleep_ms, count, priority)
        }
        Some(Command::List { cases }) => run_list(cases),
        Some(Command::Run(args)) => run_benchmark(args),
        None => run_benchmark(opts.run),
    }
}

fn run_list(cases: Option<PathBuf>) -> Result<()> {
    let registry = WorkloadRegistry::with_builtins();
    println!("WORKLOADS:");
    for name in registry.names() {
        println!("  {}", name);
    }

    println!();
    println!("USUAL RANGES:");
    println!(
        "  {:<12}{}..={} STEP {} (DEFAULT {})",
        "PARAMETER", PARAMETER_MIN, PARAMETER_MAX, PARAMETER_STEP, PARAMETER_DEFAULT
    );
    println!(
        "  {:<12}{}..={} STEP {} (DEFAULT {})",
        "CYCLES", CYCLES_MIN, CYCLES_MAX, CYCLES_STEP, CYCLES_DEFAULT
    );
    println!(
        "  {:<12}{}..={} MS STEP {} (DEFAULT {})",
        "SLEEP", SLEEP_MIN_MS, SLEEP_MAX_MS, SLEEP_STEP_MS, SLEEP_DEFAULT_MS
    );

    if let Some(path) = cases {
        let cases = load_test_cases(&path)?;
        println!();
        println!("TEST CASES ({}):", path.display());
        for case in cases {
            println!("  [{}] {}", case.id(), case.name());
            for line in case.describe().lines() {
                println!("      {}", line);
            }
        }
    }
    Ok(())
}

fn selected_cases(args: &RunArgs) -> Result<Vec<TestCase>> {
    let mut cases = match &args.cases {
        Some(path) => load_test_cases(path)?,
        None => {
            let mut case = TestCase::new(1, args.name.clone());
            if let Some(p) = args.priority {
                case = case.with_realtime_priority(p);
            }
            if let Some(level) = args.power {
                case = case.with_power_level(level);
            }
            if let Some(core) = args.core {
                case = case.with_cpu_core(core);
            }
            case.validate()?;
            vec![case]
        }
    };
    if cases.is_empty() {
        bail!("no test cases selected");
    }
    if !args.no_warmup {
        cases.insert(0, TestCase::warmup());
    }
    Ok(cases)
}

fn run_benchmark(args: RunArgs) -> Result<()> {
    init_logging(args.verbose);

    let registry = WorkloadRegistry::with_builtins();
    if registry.create(&args.workload).is_none() {
        bail!(
            "unknown workload '{}' (available: {})",
            args.workload,
            registry.names().join(", ")
        );
    }

    let config = RunConfiguration {
        workload: args.workload.clone(),
        parameter: args.parameter,
        cycles: args.cycles,
        idle_ms: args.sleep_ms,
    };
    let cases = selected_cases(&args)?;

    println!("LATENCYSUITE v1.0.0");
    println!("WORKLOAD:        {} (parameter {})", config.workload, config.parameter);
    println!("CYCLES:          {}", config.cycles);
    println!("SLEEP:           {} ms", config.idle_ms);
    println!("OUTPUT:          {}", args.out_dir.display());
    println!("CASES:           {}", cases.len());
    for warning in config.range_warnings() {
        println!("NOTE:            {}", warning);
    }
    println!();

    let (events_tx, events_rx) = mpsc::channel();
    let sequencer = Sequencer::spawn(Worker {
        result_root: args.out_dir.clone(),
        registry,
        sched: Box::new(LinuxScheduler::new()),
        power: Box::new(LinuxPower::new()),
        events: events_tx,
    })
    .context("failed to start worker thread")?;

    let handle = sequencer.handle();
    ctrlc::set_handler(move || {
        handle.cancel_all();
    })?;

    for case in &cases {
        println!("QUEUED [{}] {}", case.id(), case.name());
        sequencer
            .submit(RunRequest {
                case: case.clone(),
                config: config.clone(),
            })
            .map_err(|req| anyhow!("worker stopped before '{}' was queued", req.case.name()))?;
    }
    println!("LATENCYSUITE IS ACTIVE (CTRL+C TO CANCEL)");
    println!();

    let mut log = EventLog::new();
    for event in events_rx.iter() {
        match &event {
            RunEvent::Started { test_case_name } => println!("STARTED    {}", test_case_name),
            RunEvent::Progress { iteration } => {
                println!("PROGRESS   {}/{}", iteration + 1, config.cycles)
            }
            RunEvent::Finished { path, .. } => println!("FINISHED   {}", path.display()),
            RunEvent::Canceled { path, .. } => println!("CANCELED   {}", path.display()),
            RunEvent::Warning { message } => println!("WARNING    {}", message),
            RunEvent::AllFinished => {}
        }
        let done = event == RunEvent::AllFinished;
        log.record(event);
        if done {
            break;
        }
    }

    let outcomes = sequencer
        .finish()
        .map_err(|_| anyhow!("worker thread panicked"))?;

    println!();
    println!("{:<24} {:<10} {:>8}  {}", "CASE", "STATUS", "SAMPLES", "FILE");
    println!("{}", "-".repeat(72));
    let mut failures = 0usize;
    for outcome in &outcomes {
        match outcome {
            RunOutcome::Ran { result: Ok(report), .. } => {
                let status = match report.status {
                    RunStatus::Completed => "COMPLETED",
                    RunStatus::Canceled => "CANCELED",
                };
                println!(
                    "{:<24} {:<10} {:>8}  {}",
                    report.test_case_name,
                    status,
                    report.samples,
                    report.path.display()
                );
            }
            RunOutcome::Ran { case, result: Err(e) } => {
                failures += 1;
                println!("{:<24} {:<10} {:>8}  {}", case.name(), "FAILED", "-", e);
            }
            RunOutcome::Skipped { case } => {
                println!("{:<24} {:<10} {:>8}", case.name(), "SKIPPED", "-");
            }
        }
    }

    if args.dump_log {
        log.dump();
    }
    log.summary();

    if failures > 0 {
        bail!("{} of {} runs failed", failures, outcomes.len());
    }
    println!("LATENCYSUITE OUT.");
    Ok(())
}
