//! tilestore command-line tool
//!
//! # Examples
//!
//! ```bash
//! tilestore workspace-create /data/ws1
//! tilestore group-create /data/ws1/g1
//! tilestore classify /data/ws1/g1
//! tilestore schema-show /data/ws1/g1/temperature
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tilestore::{NodeKind, StorageManager};
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

/// Manage tilestore workspaces, groups, arrays and metadata
#[derive(Parser, Debug)]
#[command(name = "tilestore")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "TILESTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a workspace
    WorkspaceCreate { path: PathBuf },

    /// Create a group inside a workspace or group
    GroupCreate { path: PathBuf },

    /// Print the kind of a directory
    Classify { path: PathBuf },

    /// Print the stored schema of an array or metadata object as JSON
    SchemaShow { path: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let manager = StorageManager::new(cli.config.as_deref());

    match cli.command {
        Commands::WorkspaceCreate { path } => {
            manager
                .workspace_create(&path)
                .with_context(|| format!("creating workspace {}", path.display()))?;
            println!("created workspace {}", path.display());
        }
        Commands::GroupCreate { path } => {
            manager
                .group_create(&path)
                .with_context(|| format!("creating group {}", path.display()))?;
            println!("created group {}", path.display());
        }
        Commands::Classify { path } => {
            let kind = manager
                .classify(&path)
                .with_context(|| format!("classifying {}", path.display()))?;
            match kind {
                Some(kind) => println!("{}", kind),
                None => println!("none"),
            }
        }
        Commands::SchemaShow { path } => {
            let schema = match manager.classify(&path)? {
                Some(NodeKind::Array) => manager.array_load_schema(&path)?,
                Some(NodeKind::Metadata) => manager.metadata_load_schema(&path)?,
                Some(kind) => bail!("{} is a {}, which has no schema", path.display(), kind),
                None => bail!("{} is not a tilestore container", path.display()),
            };
            println!("{}", schema.to_json()?);
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let directive: Directive = level
        .parse()
        .with_context(|| format!("invalid log level '{}'", level))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(directive))
        .init();
    Ok(())
}
