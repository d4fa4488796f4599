use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use vela_backend::{DisabledPrompter, Operation, OperationKind, Prompter};
use vela_cli::config::DEFAULT_CONFIG_FILENAME;
use vela_cli::prompt::TerminalPrompter;
use vela_cli::{BackendOpts, Session};

#[derive(Parser)]
#[command(name = "vela")]
#[command(about = "A functional infrastructure management tool", long_about = None)]
struct Cli {
    /// Path to read state from
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Path to write state to (defaults to --state)
    #[arg(long, global = true)]
    state_out: Option<PathBuf>,

    /// Backup path for overwritten state; "-" disables backups
    #[arg(long, global = true)]
    backup: Option<PathBuf>,

    /// Disable interactive prompts
    #[arg(long, global = true)]
    no_input: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a working directory, resolving and migrating the backend
    Init {
        /// Copy the configuration from this directory first
        source: Option<PathBuf>,

        /// Directory to initialize (defaults to the current directory)
        path: Option<PathBuf>,

        /// Configure this backend type instead of reading the config file
        #[arg(long)]
        backend: Option<String>,

        /// Backend attribute as key=value; repeatable
        #[arg(long = "backend-config")]
        backend_config: Vec<String>,
    },
    /// Show what an operation would observe in the current state
    Plan,
    /// Run an apply operation against the resolved backend
    Apply,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let prompter: Arc<dyn Prompter> = if cli.no_input {
        Arc::new(DisabledPrompter)
    } else {
        Arc::new(TerminalPrompter)
    };

    let mut session = Session::new(prompter);
    session.state_path = cli.state;
    session.state_out_path = cli.state_out;
    session.backup_path = cli.backup;

    let result = match cli.command {
        Commands::Init {
            source,
            path,
            backend,
            backend_config,
        } => {
            session.backend_type_override = backend;
            session.backend_config_overrides = backend_config;
            run_init(&session, source, path).await
        }
        Commands::Plan => run_operation(&session, OperationKind::Plan).await,
        Commands::Apply => run_operation(&session, OperationKind::Apply).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_init(
    session: &Session,
    source: Option<PathBuf>,
    path: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(source) = &source {
        let dest = path.clone().unwrap_or_else(|| PathBuf::from("."));
        copy_source(source, &dest)?;
        println!(
            "{}",
            format!("Copied configuration from {}.", source.display()).cyan()
        );
    }

    if let Some(path) = &path {
        std::env::set_current_dir(path)
            .with_context(|| format!("failed to enter {}", path.display()))?;
    }

    let backend = session.backend(BackendOpts::default()).await?;

    // Prove the resolved backend can serve state before declaring success.
    let mut mgr = backend.state()?;
    mgr.refresh_state().await?;

    println!(
        "{}",
        "Vela has been initialized and the backend is ready."
            .green()
            .bold()
    );
    Ok(())
}

/// Copy the top-level configuration files from `source` into `dest`. The
/// destination must not already hold a configuration.
fn copy_source(source: &Path, dest: &Path) -> anyhow::Result<()> {
    if dest.join(DEFAULT_CONFIG_FILENAME).exists() {
        bail!(
            "destination {} already contains {}; refusing to overwrite it",
            dest.display(),
            DEFAULT_CONFIG_FILENAME
        );
    }
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;

    let entries = fs::read_dir(source)
        .with_context(|| format!("failed to read source {}", source.display()))?;
    for entry in entries {
        let entry = entry?;
        let from = entry.path();
        if from.is_file() {
            let to = dest.join(entry.file_name());
            fs::copy(&from, &to)
                .with_context(|| format!("failed to copy {}", from.display()))?;
        }
    }
    Ok(())
}

async fn run_operation(session: &Session, kind: OperationKind) -> anyhow::Result<()> {
    let backend = session.backend(BackendOpts::default()).await?;
    let summary = backend.operation(Operation { kind }).await?;

    match summary.lineage {
        Some(lineage) => println!(
            "State serial {} (lineage {}): {} resources, {} outputs.",
            summary.serial,
            lineage,
            summary.resources.to_string().cyan(),
            summary.outputs.to_string().cyan()
        ),
        None => println!("{}", "No state has been written yet.".yellow()),
    }
    Ok(())
}
