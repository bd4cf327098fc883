//! scopestore - save and reconcile component state of a project tree.
//!
//! # Usage
//!
//! ```bash
//! # Storage files a save would touch
//! scopestore files ./demo
//!
//! # Update one component and save
//! scopestore set ./demo core output '{"dir": "/work/demo/core/target"}'
//!
//! # Reload components when their files are edited elsewhere
//! scopestore watch ./demo
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scopestore_cli::{OutputFormat, commands, output};
use scopestore_core::StoreConfig;
use std::path::{Path, PathBuf};
use std::process;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "scopestore")]
#[command(about = "Save and reconcile component state across project scopes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SCOPESTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format (human, json)
    #[arg(long, global = true, default_value = "human")]
    format: OutputFormatArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormatArg {
    Human,
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the storage files of the project
    Files {
        /// Project directory
        project: PathBuf,

        /// Only files of the project scope itself, not of its modules
        #[arg(long)]
        own: bool,
    },

    /// Show scopes, components and their storage files
    Show {
        /// Project directory
        project: PathBuf,
    },

    /// Set a component's state (JSON) and save
    Set {
        /// Project directory
        project: PathBuf,

        /// Scope name (the project name or a module name)
        scope: String,

        /// Component name
        component: String,

        /// New state as JSON
        value: String,
    },

    /// Save every scope of the project
    Save {
        /// Project directory
        project: PathBuf,
    },

    /// Watch for external edits and reload changed components
    Watch {
        /// Project directory
        project: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::error(format!("{:#}", e));
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let _guard = init_logging(cli.verbose, &config)?;

    let format = OutputFormat::from(cli.format);

    match cli.command {
        Commands::Files { project, own } => {
            commands::list_files(&project, own, &config, format)?;
        }
        Commands::Show { project } => {
            commands::show(&project, &config, format)?;
        }
        Commands::Set {
            project,
            scope,
            component,
            value,
        } => {
            commands::set(&project, &scope, &component, &value, &config)?;
        }
        Commands::Save { project } => {
            commands::save(&project, &config, format)?;
        }
        Commands::Watch { project } => {
            commands::watch(&project, &config).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<StoreConfig> {
    match path {
        Some(path) => StoreConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let mut config = StoreConfig::default();
            config.merge_env_vars()?;
            config.validate()?;
            Ok(config)
        }
    }
}

/// Filter directives giving our crates `level` and everything else `fallback`
fn directives(level: &str, fallback: &str) -> String {
    const CRATES: [&str; 5] = [
        "scopestore",
        "scopestore_cli",
        "scopestore_store",
        "scopestore_vfs",
        "scopestore_core",
    ];
    let mut parts: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    parts.push(fallback.to_string());
    parts.join(",")
}

/// Initialize logging based on verbosity level and the optional log sink
fn init_logging(verbose: bool, config: &StoreConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new(directives("debug", "info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(directives(&config.general.log_level, "warn")))
    };

    let (sink, guard) = match &config.logging.sink {
        Some(path) => {
            let file_name = path.file_name().context("Log sink must name a file")?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            let layer = if config.logging.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(sink)
        .init();

    Ok(guard)
}
