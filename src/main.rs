//! dpe-bench CLI
//!
//! Entry point for the `dpe-bench` command-line tool. Each invocation is
//! one lifecycle event for one unit: read the peer documents, decide,
//! apply, commit and exit.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use dpe_bench::config::{DEFAULT_HOST_CONFIG, DEFAULT_UNIT_CONFIG};
use dpe_bench::{
    AdvanceOutcome, BenchConfig, ConfigError, EffectiveConfig, FilePeerStore, LifecycleManager,
    LifecycleTransition, PeerStore, PeerView, Status,
};
use dpe_core::StoreError;

#[derive(Parser)]
#[command(name = "dpe-bench")]
#[command(about = "Peer-coordinated benchmark lifecycle", version)]
struct Cli {
    /// Path to unit config file (default: ./dpe-bench.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Path to host config file (default: /etc/dpe-bench/config.toml)
    #[arg(long, global = true)]
    host_config: Option<PathBuf>,

    /// Unit identifier, e.g. "mysql/0"
    #[arg(long, short = 'u', global = true)]
    unit: Option<String>,

    /// Root for peer documents and workload state
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Load the benchmark data set
    Prepare,
    /// Start the benchmark run
    Run,
    /// Stop the benchmark on this unit and, through it, the fleet
    Stop,
    /// Remove benchmark data and reset to unset
    Clean,
    /// Re-evaluate after any event (peer change, workload progress)
    Check,
    /// The set of peer units changed
    MembershipChanged,
    /// Remove this unit's record from the peer set
    Leave,
    /// Show this unit's status
    Status,
    /// Show every known unit record and the aggregate
    Peers,
    /// Show the effective configuration with provenance
    Config,
}

/// CLI-level failure, always exit code 1
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("peer store error: {0}")]
    Store(#[from] StoreError),

    #[error("error serializing output: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(not(unix))]
    #[error("{0}")]
    Unsupported(&'static str),
}

fn main() {
    let cli = Cli::parse();

    // Logging filter comes from the config, so config errors go straight to stderr.
    let effective = match load_config(&cli) {
        Ok(effective) => effective,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    init_tracing(effective.get_str("log_level").unwrap_or("info"));

    match run(&cli, &effective) {
        Ok(code) => process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<EffectiveConfig, CliError> {
    // An explicitly named file must exist; the defaults are optional.
    for path in [&cli.config, &cli.host_config].into_iter().flatten() {
        if !path.exists() {
            return Err(ConfigError::IoError(format!("{} not found", path.display())).into());
        }
    }

    let host = cli
        .host_config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_CONFIG));
    let unit = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_UNIT_CONFIG));

    let mut overrides = serde_json::Map::new();
    if let Some(id) = &cli.unit {
        overrides.insert("unit".to_string(), Value::String(id.clone()));
    }
    if let Some(dir) = &cli.state_dir {
        overrides.insert(
            "state_dir".to_string(),
            Value::String(dir.to_string_lossy().to_string()),
        );
    }
    if let Some(level) = &cli.log_level {
        overrides.insert("log_level".to_string(), Value::String(level.clone()));
    }

    Ok(EffectiveConfig::build(
        Some(&host),
        Some(&unit),
        Some(Value::Object(overrides)),
    )?)
}

fn run(cli: &Cli, effective: &EffectiveConfig) -> Result<i32, CliError> {
    if let Commands::Config = cli.command {
        println!("{}", effective.to_json()?);
        return Ok(0);
    }

    let config = BenchConfig::from_effective(effective)?;
    let store = FilePeerStore::new(&config.peer_dir, config.unit.clone());

    match cli.command {
        Commands::Status => {
            let state = store.get_unit_state(store.this_unit())?;
            let status = Status::for_state(state);
            if cli.json {
                let out = json!({ "unit": config.unit, "state": state, "status": status });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{} [{}] {}", config.unit, state, status);
            }
            Ok(0)
        }
        Commands::Peers => {
            print_peers(&PeerView::collect(&store), cli.json)?;
            Ok(0)
        }
        Commands::Leave => {
            store.leave()?;
            if cli.json {
                println!("{}", json!({ "unit": config.unit, "left": true }));
            } else {
                println!("{} left the peer set", config.unit);
            }
            Ok(0)
        }
        command => {
            let mut manager = LifecycleManager::new(store, build_workload(&config)?);
            let outcome = match command {
                Commands::Prepare => manager.advance(Some(LifecycleTransition::Prepare)),
                Commands::Run => manager.advance(Some(LifecycleTransition::Run)),
                Commands::Stop => manager.advance(Some(LifecycleTransition::Stop)),
                Commands::Clean => manager.advance(Some(LifecycleTransition::Clean)),
                Commands::MembershipChanged => manager.on_membership_changed(),
                _ => manager.advance(None),
            };
            print_outcome(&outcome, &manager.status(), cli.json)?;
            Ok(exit_code(&outcome))
        }
    }
}

#[cfg(unix)]
fn build_workload(config: &BenchConfig) -> Result<dpe_worker::CommandWorkload, CliError> {
    use std::time::Duration;

    let run = config.require_run_command()?.to_string();
    Ok(dpe_worker::CommandWorkload::new(dpe_worker::WorkloadSpec {
        dir: config.workload_dir.clone(),
        unit: config.unit.to_string(),
        test_name: config.test_name.clone(),
        prepare: config.workload.prepare.clone(),
        run,
        clean: config.workload.clean.clone(),
        stop_grace: Duration::from_secs(config.workload.stop_grace_seconds),
        options: config.workload.options.clone(),
    }))
}

#[cfg(not(unix))]
fn build_workload(config: &BenchConfig) -> Result<dpe_bench::MockWorkload, CliError> {
    let _ = config.require_run_command()?;
    Err(CliError::Unsupported(
        "workload commands are only supported on unix hosts",
    ))
}

fn exit_code(outcome: &AdvanceOutcome) -> i32 {
    match outcome {
        AdvanceOutcome::Unchanged { .. } | AdvanceOutcome::Committed { .. } => 0,
        AdvanceOutcome::Rejected { .. } => 2,
        AdvanceOutcome::Blocked { .. } => 3,
        AdvanceOutcome::Deferred { .. } => 4,
    }
}

fn print_outcome(outcome: &AdvanceOutcome, status: &Status, json: bool) -> Result<(), CliError> {
    if json {
        let mut value = serde_json::to_value(outcome)?;
        if let Value::Object(map) = &mut value {
            map.insert("status".to_string(), serde_json::to_value(status)?);
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match outcome {
        AdvanceOutcome::Unchanged { state } => println!("unchanged: {}", state),
        AdvanceOutcome::Rejected { state, transition } => {
            println!("rejected: cannot {} from {}", transition, state)
        }
        AdvanceOutcome::Committed { from, to } => println!("committed: {} -> {}", from, to),
        AdvanceOutcome::Deferred {
            state,
            target,
            reason,
        } => println!("deferred: {} -> {} ({})", state, target, reason),
        AdvanceOutcome::Blocked {
            state,
            target,
            reason,
        } => println!("blocked: {} -> {} ({})", state, target, reason),
    }
    println!("status: {}", status);
    Ok(())
}

fn print_peers(view: &PeerView, json: bool) -> Result<(), CliError> {
    let aggregate = view.aggregate();
    let in_step = view.all_peers_in(aggregate);

    if json {
        let ahead = view
            .ahead()
            .map(|(unit, state)| json!({ "unit": unit, "state": state }));
        let out = json!({
            "own": view.own_entry(),
            "peers": view.peers(),
            "aggregate": aggregate,
            "ahead": ahead,
            "in_step": in_step,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let own = view.own_entry();
    println!("{:<24} {:<12} (this unit)", own.unit, own.state);
    for entry in view.peers() {
        let note = if entry.recorded { "" } else { "(no record)" };
        println!("{:<24} {:<12} {}", entry.unit, entry.state, note);
    }
    println!("aggregate: {}", aggregate);
    match view.ahead() {
        Some((unit, state)) => println!("ahead: {} [{}]", unit, state),
        None if in_step => println!("all peers at {}", aggregate),
        None => {}
    }
    Ok(())
}
