//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Git-backed environment catalog with a live WebSocket index
#[derive(Parser, Debug)]
#[command(name = "softpack-frontend")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (defaults to <config dir>/softpack/config.toml)
    #[arg(short, long, env = "SOFTPACK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Artefact repository URL or path, overrides artefacts.repo
    #[arg(long, global = true)]
    pub repo: Option<String>,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve the HTTP API and socket (default)
    Serve(ServeArgs),

    /// Build the index once and print it as JSON
    Index,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Host to bind to, overrides server.host
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on, overrides server.port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Mount every route under this prefix, overrides server.path_prefix
    #[arg(long)]
    pub path_prefix: Option<String>,
}

impl Cli {
    /// The command to run; no subcommand means serve
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Serve(ServeArgs::default()))
    }

    /// Apply command-line overrides on top of the loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(repo) = &self.repo {
            config.artefacts.repo = repo.clone();
        }

        if self.verbose {
            config.logging.level = "debug".to_string();
        }

        if let Some(Commands::Serve(args)) = &self.command {
            if let Some(host) = &args.host {
                config.server.host = host.clone();
            }
            if let Some(port) = args.port {
                config.server.port = port;
            }
            if let Some(prefix) = &args.path_prefix {
                config.server.path_prefix = prefix.clone();
            }
        }
    }
}
