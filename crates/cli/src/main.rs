//! Thin runnable entry point standing in for the "surrounding functionality"
//! spec.md §1 calls an external collaborator: skills, importer CLIs, and UI
//! are out of scope here. This binary only exercises the three documented
//! caller verbs (`execute`, `add_runtime_whitelist`, `shutdown`) plus the
//! standalone `add_permanent_whitelist` helper, the way `aigent-app`'s
//! `main.rs` wires a `clap` subcommand tree onto its library crates.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use synapse_sandbox::{ManagerOptions, SandboxManager};
use synapse_sandbox_policy::{add_permanent_whitelist, load_sandbox_config, LoadOptions};

#[derive(Debug, Parser)]
#[command(name = "synapse", version, about = "Synapse sandbox execution CLI")]
struct Cli {
    /// Path to sandbox.json; defaults to $SYNAPSE_HOME/sandbox.json.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sandboxed command execution subsystem.
    Sandbox {
        #[command(subcommand)]
        command: SandboxCommands,
    },
}

#[derive(Debug, Subcommand)]
enum SandboxCommands {
    /// Run a single command through the sandbox manager and print its result.
    Exec {
        #[arg(long, default_value = ".")]
        cwd: String,
        /// The command to run, e.g. `synapse sandbox exec -- cat ~/.ssh/id_rsa`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Mutate the on-disk or in-memory whitelist.
    Whitelist {
        #[command(subcommand)]
        command: WhitelistCommands,
    },
    /// Interactive mode: read commands from stdin, execute each through one
    /// manager, shut down on EOF. Demonstrates persistent-session state and
    /// the rebuild-on-failure path end to end.
    RunShell {
        #[arg(long, default_value = ".")]
        cwd: String,
    },
    /// Inspect the effective config.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum WhitelistCommands {
    /// Append `path` to the on-disk config's whitelist.
    Add { path: String },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Print the merged, loaded config as JSON.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let load_options = LoadOptions {
        config_path: cli.config.map(std::path::PathBuf::from),
        ..Default::default()
    };

    let Commands::Sandbox { command } = cli.command;
    match command {
        SandboxCommands::Exec { cwd, command } => {
            let config = load_sandbox_config(load_options);
            let mut manager = SandboxManager::new(config, ManagerOptions::default());
            let joined = command.join(" ");
            let result = manager
                .execute(&joined, &cwd)
                .await
                .context("sandbox execute failed")?;
            manager.shutdown().await;

            let rendered = serde_json::to_string_pretty(&result)?;
            println!("{rendered}");
            if result.blocked {
                std::process::exit(1);
            }
            std::process::exit(result.exit_code);
        }
        SandboxCommands::Whitelist { command } => match command {
            WhitelistCommands::Add { path } => {
                add_permanent_whitelist(&path, &load_options)
                    .context("failed to add permanent whitelist entry")?;
                println!("added {path} to permanent whitelist");
            }
        },
        SandboxCommands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = load_sandbox_config(load_options);
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        },
        SandboxCommands::RunShell { cwd } => {
            let config = load_sandbox_config(load_options);
            let mut manager = SandboxManager::new(config, ManagerOptions::default());
            run_shell(&mut manager, &cwd).await?;
        }
    }

    Ok(())
}

async fn run_shell(manager: &mut SandboxManager, cwd: &str) -> Result<()> {
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        }
        match manager.execute(&line, cwd).await {
            Ok(result) => {
                if !result.stdout.is_empty() {
                    println!("{}", result.stdout);
                }
                if !result.stderr.is_empty() {
                    eprintln!("{}", result.stderr);
                }
                if result.blocked {
                    eprintln!(
                        "blocked: {} ({})",
                        result.blocked_reason.as_deref().unwrap_or("unknown"),
                        result.blocked_resource.as_deref().unwrap_or("unknown")
                    );
                }
            }
            Err(err) => eprintln!("error: {err}"),
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    manager.shutdown().await;
    Ok(())
}
