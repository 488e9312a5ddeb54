//! Polling automation agent for remote analysis jobs.
//!
//! Meant to be started periodically by an external scheduler; each invocation
//! runs one cycle (or one validation pass) and exits.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, warn};

use verssa::agent::{RunOutcome, run_agent};
use verssa::exit_codes;
use verssa::io::config::{AgentConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use verssa::io::notify::SendmailNotifier;
use verssa::io::status_store::StatusStore;
use verssa::io::storage::LocalStorage;
use verssa::io::terrain::{SessionError, TerrainClient};
use verssa::logging;
use verssa::validate::{ValidatorOutcome, run_validator};

#[derive(Parser)]
#[command(
    name = "verssa",
    version,
    about = "Submit uploaded files to remote analyses and track them to completion"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one cycle: reconcile, relocate, dispatch (default).
    Run,
    /// Check FITS headers under the validation root and quarantine failures.
    Validate,
    /// Print tracked job records.
    Jobs,
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    match cli.command.unwrap_or(Command::Run) {
        Command::Init { force } => finish(cmd_init(&cli.config, force)),
        Command::Run => with_config(&cli.config, cmd_run),
        Command::Validate => with_config(&cli.config, cmd_validate),
        Command::Jobs => with_config(&cli.config, cmd_jobs),
    }
}

/// Load config and install logging, then run `command`.
fn with_config(path: &Path, command: fn(&AgentConfig) -> Result<i32>) -> i32 {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::INVALID;
        }
    };
    let _guard = match logging::init(&config.log_level, config.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::INVALID;
        }
    };
    finish(command(&config))
}

fn finish(result: Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "fatal");
            eprintln!("{err:#}");
            if err.downcast_ref::<SessionError>().is_some() {
                exit_codes::SESSION
            } else {
                exit_codes::INVALID
            }
        }
    }
}

fn cmd_run(config: &AgentConfig) -> Result<i32> {
    let storage = LocalStorage::new(&config.storage_root);
    match run_agent(config, &storage, TerrainClient::connect)? {
        RunOutcome::Locked => Ok(exit_codes::LOCKED),
        RunOutcome::Completed(report) => {
            for failure in &report.failures {
                warn!(step = %failure.step, name = %failure.name, "left for next cycle");
            }
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_validate(config: &AgentConfig) -> Result<i32> {
    let storage = LocalStorage::new(&config.storage_root);
    let notifier = SendmailNotifier::from_config(&config.notify);
    match run_validator(config, &storage, &notifier)? {
        ValidatorOutcome::Locked => Ok(exit_codes::LOCKED),
        ValidatorOutcome::Completed(report) => {
            println!(
                "validated {}, already validated {}, failed {}",
                report.validated,
                report.already_validated,
                report.failures.len()
            );
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_jobs(config: &AgentConfig) -> Result<i32> {
    let store = StatusStore::open(&config.state_path)
        .with_context(|| format!("open status store {}", config.state_path.display()))?;
    for record in store.all() {
        println!("{}\t{}\t{}", record.status, record.remote_job_id, record.name);
    }
    Ok(exit_codes::OK)
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &AgentConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_runs_a_cycle() {
        let cli = Cli::parse_from(["verssa"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_validate_with_config() {
        let cli = Cli::parse_from(["verssa", "--config", "/etc/verssa.toml", "validate"]);
        assert!(matches!(cli.command, Some(Command::Validate)));
        assert_eq!(cli.config, PathBuf::from("/etc/verssa.toml"));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["verssa", "init", "--force"]);
        assert!(matches!(cli.command, Some(Command::Init { force: true })));
    }

    #[test]
    fn session_errors_map_to_session_exit_code() {
        let err = anyhow::Error::new(SessionError {
            reason: "token exchange rejected".to_string(),
        });
        assert_eq!(finish(Err(err)), exit_codes::SESSION);
        assert_eq!(finish(Err(anyhow::anyhow!("corrupt store"))), exit_codes::INVALID);
    }
}
