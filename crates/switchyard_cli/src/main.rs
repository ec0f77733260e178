//! SWITCHYARD CLI
//!
//! Inspect the backend registry and see which backend a stack of scopes
//! resolves to.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod stack;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde::Serialize;
use std::path::PathBuf;
use switchyard_backend::{BackendCapabilities, BackendParams, registry};
use switchyard_core::{Prefer, Require, Setting};
use switchyard_scope::{NJobsKey, SnapshotView, resolve_active_backend};

use crate::stack::ScopeStack;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "SWITCHYARD - Parallel backend selection", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered backends
    Backends,
    /// Resolve the active backend
    Resolve {
        /// JSON file describing nested scopes, outermost first
        #[arg(short, long)]
        scopes: Option<PathBuf>,
        /// Soft backend hint for the call
        #[arg(long)]
        prefer: Option<Prefer>,
        /// Hard backend constraint for the call
        #[arg(long)]
        require: Option<Require>,
        /// Verbosity for the call
        #[arg(short, long)]
        verbose: Option<u32>,
    },
}

#[derive(Serialize)]
struct BackendEntry {
    name: String,
    default: bool,
    capabilities: BackendCapabilities,
}

#[derive(Serialize)]
struct BackendListing {
    default: String,
    backends: Vec<BackendEntry>,
    external: Vec<String>,
}

#[derive(Serialize)]
struct Resolution {
    backend: String,
    nesting_level: usize,
    n_jobs: Option<i32>,
    effective_n_jobs: usize,
    capabilities: BackendCapabilities,
    config: SnapshotView,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Backends => list_backends(),
        Commands::Resolve {
            scopes,
            prefer,
            require,
            verbose,
        } => resolve(scopes, prefer, require, verbose),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn list_backends() -> Result<()> {
    let registry = registry::global();
    let default = registry.default_name();

    let mut backends = Vec::new();
    for name in registry.list() {
        let descriptor = registry.create(&name, BackendParams::new())?;
        backends.push(BackendEntry {
            default: name == default,
            capabilities: descriptor.finalize(0).capabilities(),
            name,
        });
    }

    let listing = BackendListing {
        default,
        backends,
        external: registry.list_external(),
    };
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

fn resolve(
    scopes: Option<PathBuf>,
    prefer: Option<Prefer>,
    require: Option<Require>,
    verbose: Option<u32>,
) -> Result<()> {
    let specs = match &scopes {
        Some(path) => stack::load(path)?,
        None => Vec::new(),
    };
    let stack = ScopeStack::enter(&specs, registry::global())?;
    if !stack.is_empty() {
        tracing::debug!(scopes = stack.len(), "scopes entered");
    }

    let (backend, config) = resolve_active_backend(
        prefer.map_or(Setting::Unset, |p| Setting::Explicit(Some(p))),
        require.map_or(Setting::Unset, |r| Setting::Explicit(Some(r))),
        verbose.map_or(Setting::Unset, Setting::Explicit),
    )?;
    let n_jobs = config.get::<NJobsKey>();

    let resolution = Resolution {
        backend: backend.name().to_string(),
        nesting_level: backend.nesting_level(),
        n_jobs,
        effective_n_jobs: backend.effective_n_jobs(n_jobs)?,
        capabilities: backend.capabilities(),
        config: config.view(),
    };
    println!("{}", serde_json::to_string_pretty(&resolution)?);

    drop(stack);
    Ok(())
}
