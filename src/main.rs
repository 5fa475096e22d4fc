//! chainrot - generational chain rotation for iptables
//!
//! Command-line front end to the rotation library.
//!
//! # Usage
//!
//! ```bash
//! chainrot apply plan.json                 # Rotate every container in the plan
//! chainrot apply plan.json --family v6     # IPv6 only
//! chainrot apply plan.json --dry-run       # Rehearse against the in-memory engine
//! chainrot status host_in                  # Show which generations exist
//! chainrot check host_in                   # Exit non-zero unless steady
//! chainrot config show                     # Print the effective configuration
//! chainrot config init                     # Write the default configuration
//! ```
//!
//! Logs go to `~/.local/state/chainrot/chainrot.log` (filter with
//! `CHAINROT_LOG`, e.g. `CHAINROT_LOG=debug`).

use chainrot::audit::AuditLog;
use chainrot::config::{self, AppConfig};
use chainrot::core::inventory::{self, GenerationInventory};
use chainrot::core::iptables::IptablesEngine;
use chainrot::core::plan::{load_plan, validate_container_name};
use chainrot::core::runner::{self, PlanRun};
use chainrot::{DualStack, Error, Family};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "chainrot", version, long_version = build::CLAP_LONG_VERSION)]
#[command(about = "Zero-downtime generational rotation of iptables chains", long_about = None)]
struct Cli {
    /// Write logs to stderr instead of the state directory
    #[arg(long, global = true)]
    stderr_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rotate every container listed in a plan file
    Apply {
        /// Path to the JSON plan
        plan: PathBuf,
        /// Limit the run to these families (repeatable; default: from config)
        #[arg(short, long = "family", value_name = "FAMILY")]
        families: Vec<Family>,
        /// Rehearse the plan against an in-memory engine
        #[arg(long)]
        dry_run: bool,
    },
    /// Show which generations of a container exist
    Status {
        /// Container name (the jump chain)
        name: String,
        #[arg(short, long = "family", value_name = "FAMILY")]
        families: Vec<Family>,
    },
    /// Exit with failure unless the container is in steady state
    Check {
        /// Container name (the jump chain)
        name: String,
        #[arg(short, long = "family", value_name = "FAMILY")]
        families: Vec<Family>,
    },
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let _ = chainrot::utils::ensure_dirs();
    let cli = Cli::parse();
    init_logging(cli.stderr_log);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli.command)) {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(force_stderr: bool) {
    let filter = EnvFilter::try_from_env("CHAINROT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = if force_stderr {
        None
    } else {
        chainrot::utils::get_state_dir().and_then(|mut path| {
            path.push("chainrot.log");
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        })
    };

    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(file)
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn report_error(err: &Error) {
    eprintln!("Error: {err}");
    let translation = err.translate();
    if translation.user_message != err.to_string() {
        eprintln!("{}", translation.user_message);
    }
    for suggestion in &translation.suggestions {
        eprintln!("  • {suggestion}");
    }
    if let Some(url) = &translation.help_url {
        eprintln!("  See: {url}");
    }
}

/// Requested families, falling back to the configured set
fn select_families(requested: Vec<Family>, config: &AppConfig) -> Vec<Family> {
    let source = if requested.is_empty() {
        config.families.clone()
    } else {
        requested
    };
    let mut families = Vec::with_capacity(source.len());
    for family in source {
        if !families.contains(&family) {
            families.push(family);
        }
    }
    families
}

fn build_stack(
    config: &AppConfig,
    families: &[Family],
) -> chainrot::Result<DualStack<IptablesEngine>> {
    DualStack::new(
        families
            .iter()
            .map(|&family| IptablesEngine::from_config(config, family)),
    )
}

fn print_run(run: &PlanRun) {
    for summary in &run.summaries {
        println!(
            "  {:<24} {:<3} {} rule(s)",
            summary.name, summary.family, summary.rules_appended
        );
    }
}

fn print_inventory(inventory: &GenerationInventory) {
    let mark = |present: bool| if present { "present" } else { "absent" };
    println!("[{}] {}", inventory.family, inventory.name);
    println!("  jump chain: {}", mark(inventory.jump_chain));
    println!("  _live:      {}", mark(inventory.live));
    println!("  _new:       {}", mark(inventory.new));
    println!("  _old:       {}", mark(inventory.old));
}

async fn inspect_all(
    config: &AppConfig,
    name: &str,
    families: Vec<Family>,
) -> chainrot::Result<Vec<GenerationInventory>> {
    validate_container_name(name)?;
    let audit = config.audit_enabled.then(|| AuditLog::new().ok()).flatten();

    let mut inventories = Vec::new();
    for family in select_families(families, config) {
        let engine = IptablesEngine::from_config(config, family);
        let inventory = inventory::inspect(&engine, name).await?;
        if let Some(audit) = &audit {
            audit.log_inspect(name, family, inventory.is_steady()).await;
        }
        inventories.push(inventory);
    }
    Ok(inventories)
}

async fn handle_cli(command: Commands) -> chainrot::Result<ExitCode> {
    let config = config::load_config().await;

    match command {
        Commands::Apply {
            plan,
            families,
            dry_run,
        } => {
            let loaded = load_plan(&plan).await?;
            let families = select_families(families, &config);

            if dry_run {
                let stack = runner::rehearsal_stack(&loaded.plan, &families)?;
                let run = runner::execute_plan(&stack, &loaded, &families, None).await?;
                println!("Dry run of {} succeeded:", plan.display());
                print_run(&run);
                return Ok(ExitCode::SUCCESS);
            }

            if !nix::unistd::getuid().is_root() {
                println!("Note: Not running as root. Will use sudo/run0/pkexec for iptables.");
            }

            let audit = config.audit_enabled.then(|| AuditLog::new().ok()).flatten();
            let stack = build_stack(&config, &families)?;
            let run = runner::execute_plan(&stack, &loaded, &families, audit.as_ref()).await?;
            println!("✓ Plan applied (run {}):", run.run_id);
            print_run(&run);
        }
        Commands::Status { name, families } => {
            for inventory in inspect_all(&config, &name, families).await? {
                print_inventory(&inventory);
            }
        }
        Commands::Check { name, families } => {
            let mut steady = true;
            for inventory in inspect_all(&config, &name, families).await? {
                for problem in inventory.problems() {
                    steady = false;
                    println!("[{}] {problem}", inventory.family);
                }
            }
            if !steady {
                return Ok(ExitCode::FAILURE);
            }
            println!("✓ {name} is steady");
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Init { force } => {
                let exists = config::config_path().is_some_and(|path| path.exists());
                if exists && !force {
                    eprintln!("Config file already exists (use --force to overwrite)");
                    return Ok(ExitCode::FAILURE);
                }
                let path = config::save_config(&AppConfig::default())?;
                println!("✓ Wrote {}", path.display());
            }
        },
    }
    Ok(ExitCode::SUCCESS)
}
