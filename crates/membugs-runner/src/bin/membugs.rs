//! membugs CLI — trigger known memory bugs and record what the sanitizer saw.
//!
//! # Usage
//!
//! ```bash
//! # List the fault catalog
//! membugs list
//!
//! # Run one fault in this process
//! membugs run out-of-bounds-dynamic-right --direction read
//!
//! # Run the in-bounds control access only
//! membugs run oob-static-left --control
//!
//! # Run every fault, each in its own worker process
//! membugs --multi-shot run-all --isolate
//!
//! # Text control surface: write a payload to an entry, print the response
//! membugs control out-of-bounds-static-right "write repeat=2"
//! membugs control list
//! ```
//!
//! Configuration comes from `MEMBUGS_MULTI_SHOT`, `MEMBUGS_REPEAT` and
//! `MEMBUGS_DISABLE`; flags override them.

use clap::{Parser, Subcommand};
use membugs_fault::catalog::{AccessKind, Direction, FaultCategory};
use membugs_fault::control::SurfaceError;
use membugs_fault::executor::ExecutionRequest;
use membugs_fault::harness::{Harness, HarnessError};
use membugs_fault::report::ExecutionResult;
use membugs_fault::config::MAX_REPEAT;
use membugs_fault::HarnessConfig;
use membugs_runner::report::format_report;
use membugs_runner::supervisor::{Supervisor, SupervisorError};
use snafu::Snafu;
use std::io::Write;

/// CLI errors for the membugs binary.
#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("Harness error: {source}"), context(false))]
    Harness { source: HarnessError },
    #[snafu(display("Supervisor error: {source}"), context(false))]
    Supervisor { source: SupervisorError },
    #[snafu(display("I/O error: {source}"), context(false))]
    Io { source: std::io::Error },
    #[snafu(display("JSON error: {source}"), context(false))]
    Json { source: serde_json::Error },
}

#[derive(Parser)]
#[command(name = "membugs")]
#[command(about = "Reproduce known memory-safety bugs to measure sanitizer coverage")]
#[command(version)]
struct Cli {
    /// Switch the sanitizer to multi-shot reporting for the run
    #[arg(long, global = true)]
    multi_shot: bool,

    /// Faults to disable (comma-separated names)
    #[arg(long, global = true, value_delimiter = ',')]
    disable: Vec<FaultCategory>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct RunArgs {
    /// Access direction for out-of-bounds faults
    #[arg(short, long)]
    direction: Option<Direction>,

    /// Perform only the in-bounds control access
    #[arg(long)]
    control: bool,

    /// Executions per fault, 1 to 10000 (default: MEMBUGS_REPEAT or 1)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_REPEAT)))]
    repeat: Option<u32>,

    /// Run each execution in a disposable worker process
    #[arg(long)]
    isolate: bool,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the fault catalog
    List,

    /// Run one fault
    Run {
        /// Fault name or alias (umr, uar, oob-static-right, ...)
        fault: FaultCategory,

        #[command(flatten)]
        args: RunArgs,
    },

    /// Run every enabled fault in catalog order
    RunAll {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Read or write a control entry
    ///
    /// Each invocation starts a fresh harness and nothing persists between
    /// invocations, so reading a fault entry reports no result; the response
    /// to a write carries the results of that write.
    Control {
        /// Entry name (list, run-all, reset-log, or a fault name)
        entry: String,

        /// Payload to write; omit to read the entry
        payload: Option<String>,
    },

    /// Execute one fault and print its result as JSON (used by --isolate)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        fault: FaultCategory,

        #[arg(long)]
        direction: Option<Direction>,

        #[arg(long)]
        control: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(&cli);

    let result = match cli.command {
        Commands::List => cmd_list(config),
        Commands::Run { fault, args } => {
            cmd_run(config, ExecutionRequest::one(fault), args, false)
        }
        Commands::RunAll { args } => cmd_run(config, ExecutionRequest::all(), args, true),
        Commands::Control { entry, payload } => cmd_control(config, &entry, payload.as_deref()),
        Commands::Worker {
            fault,
            direction,
            control,
        } => cmd_worker(cli.multi_shot, fault, direction, control),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }
}

fn load_config(cli: &Cli) -> HarnessConfig {
    let mut config = HarnessConfig::from_env();
    if cli.multi_shot {
        config.multi_shot = true;
    }
    if !cli.disable.is_empty() {
        config.disabled = cli.disable.clone();
    }
    config
}

fn cmd_list(config: HarnessConfig) -> Result<(), CliError> {
    let harness = Harness::builder().config(config).init()?;
    println!("{:<3} {:<28} {:<14} {:<6} {}", "id", "fault", "memory", "dir", "state");
    for spec in harness.list_categories()? {
        println!(
            "{:<3} {:<28} {:<14} {:<6} {}",
            spec.id,
            spec.category.as_str(),
            spec.memory_class.to_string(),
            if spec.category.is_bidirectional() {
                "r/w".to_string()
            } else {
                spec.direction.to_string()
            },
            if spec.enabled { "enabled" } else { "disabled" }
        );
    }
    Ok(())
}

fn cmd_run(
    config: HarnessConfig,
    request: ExecutionRequest,
    args: RunArgs,
    summary: bool,
) -> Result<(), CliError> {
    let mut request = request.repeat(args.repeat.unwrap_or(config.repeat()));
    request.direction = args.direction;
    if args.control {
        request = request.access(AccessKind::Control);
    }

    // Init validates the configuration (multi-shot support) even when the
    // faults themselves run in workers.
    let harness = Harness::builder().config(config.clone()).init()?;
    let sanitizer = harness.sanitizer().name().to_string();

    let results = if args.isolate {
        harness.teardown();
        let supervisor = Supervisor::current_exe(config)?;
        supervisor.run_request(&request)?
    } else {
        harness.run_request(&request)?
    };

    print_results(&results, args.json)?;
    if summary && !args.json {
        println!();
        print!("{}", format_report(&sanitizer, &results));
    }
    Ok(())
}

fn cmd_control(config: HarnessConfig, entry: &str, payload: Option<&str>) -> Result<(), CliError> {
    let harness = Harness::builder().config(config).init()?;
    let response = match payload {
        Some(payload) => harness.write_entry(entry, payload),
        None => harness.read_entry(entry),
    };
    match response {
        Ok(text) => print!("{text}"),
        Err(HarnessError::Surface(SurfaceError::NotFound(name))) => {
            let entries = harness.entries().join(", ");
            drop(harness);
            eprintln!("no such entry {name:?}; entries: {entries}");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn cmd_worker(
    multi_shot: bool,
    fault: FaultCategory,
    direction: Option<Direction>,
    control: bool,
) -> Result<(), CliError> {
    let config = HarnessConfig {
        multi_shot,
        ..Default::default()
    };
    let harness = Harness::builder().config(config).init()?;
    let mut request = ExecutionRequest::one(fault);
    request.direction = direction;
    if control {
        request = request.access(AccessKind::Control);
    }
    let results = harness.run_request(&request)?;
    print_results(&results, true)?;
    Ok(())
}

fn print_results(results: &[ExecutionResult], json: bool) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for result in results {
        if json {
            writeln!(out, "{}", serde_json::to_string(result)?)?;
        } else {
            writeln!(out, "{result}")?;
        }
    }
    out.flush()?;
    Ok(())
}
