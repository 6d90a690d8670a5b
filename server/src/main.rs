//! relais: HTTP server and CLI.
//!
//! Usage:
//!   relais serve [--bind ADDR] [--reference]
//!   relais tools [--reference]
//!   relais check-config
//!   relais scenarios
//!
//! The configuration file is given with `--config` or `RELAIS_CONFIG`.
//! Logging honours `RUST_LOG` (default `info`).

mod app;
mod backend;
mod config;
mod model;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use relais_contracts::error::{RelaisError, RelaisResult};
use relais_core::traits::CallValidator;
use relais_verify::ToolRegistry;

use crate::{
    app::{build_orchestrator, Components},
    config::RelaisConfig,
    routes::{router, AppState},
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// relais: validation-gated tool calling for a conversational assistant.
#[derive(Parser)]
#[command(name = "relais", version, about = "relais orchestration server")]
struct Cli {
    /// Configuration file (TOML). Defaults apply when absent.
    #[arg(long, env = "RELAIS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server.
    Serve {
        /// Listen address, overriding `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Use the in-memory CRM and the keyword model instead of live services.
        #[arg(long)]
        reference: bool,
    },
    /// Print the tool catalogue.
    Tools {
        /// Print the embedded reference catalogue.
        #[arg(long)]
        reference: bool,
    },
    /// Load and validate the configuration and the catalogue it names.
    CheckConfig,
    /// Run the end-to-end reference scenarios.
    Scenarios,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for pipeline-level output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve { bind, reference } => serve(cli.config, bind, reference).await,
        Command::Tools { reference } => print_tools(cli.config, reference),
        Command::CheckConfig => check_config(cli.config),
        Command::Scenarios => relais_ref_crm::scenarios::run_all().await,
    };

    if let Err(e) = result {
        eprintln!("relais: {e}");
        std::process::exit(1);
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn serve(config: Option<PathBuf>, bind: Option<String>, reference: bool) -> RelaisResult<()> {
    let mut config = RelaisConfig::load(config.as_deref())?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    let addr = config.bind_addr()?;

    let components = if reference {
        Components::reference(&config)?
    } else {
        Components::live(&config)?
    };
    let orchestrator = build_orchestrator(&config, components)?;
    let app = router(AppState { orchestrator: Arc::new(orchestrator) });

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| RelaisError::ConfigError {
        reason: format!("cannot listen on {addr}: {e}"),
    })?;
    info!(%addr, reference, "relais listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RelaisError::Internal { reason: format!("server error: {e}") })
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

fn load_catalogue(config: &RelaisConfig, reference: bool) -> RelaisResult<ToolRegistry> {
    if reference {
        ToolRegistry::from_toml_str(relais_ref_crm::REFERENCE_CATALOGUE)
    } else {
        ToolRegistry::from_file(&config.tools.catalogue)
    }
}

fn print_tools(config: Option<PathBuf>, reference: bool) -> RelaisResult<()> {
    let config = RelaisConfig::load(config.as_deref())?;
    let registry = load_catalogue(&config, reference)?;

    for definition in registry.definitions() {
        let kind = match (definition.mutates, definition.destructive) {
            (false, _) => "read",
            (true, false) => "write",
            (true, true) => "destructive",
        };
        println!("{:<20} {:<12} {}", definition.name, kind, definition.description);
    }
    Ok(())
}

fn check_config(config: Option<PathBuf>) -> RelaisResult<()> {
    let config = RelaisConfig::load(config.as_deref())?;
    let registry = load_catalogue(&config, false)?;

    println!("configuration:  OK");
    println!("listen address: {}", config.bind_addr()?);
    println!("catalogue:      {} tool(s) from {}", registry.len(), config.tools.catalogue.display());
    println!(
        "tool backend:   {}",
        config.tools.backend_url.as_deref().unwrap_or("(not set, reference mode only)")
    );
    println!(
        "model API key:  {}",
        if config.model_api_key().is_some() { "set" } else { "not set" }
    );
    println!(
        "confirmation:   secret {}, ttl {} s",
        if config.confirmation_secret().is_ok() { "set" } else { "NOT SET" },
        config.confirmation.ttl_secs
    );
    Ok(())
}
