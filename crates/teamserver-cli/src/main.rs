mod config;

use clap::{Parser, Subcommand};
use config::{LogFormat, StorageBackend, TeamserverConfig};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teamserver_core::TriggerRule;
use teamserver_gateway::{GatewayServer, RateLimiter};
use teamserver_orchestrator::Orchestrator;
use teamserver_store::{FileStore, MemoryStore, Store};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "teamserver", about = "Teamserver: multi-agent command and control plane")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "teamserver.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Inspect the seed trigger rules in the config file
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Validate every [[rules]] entry and print a summary
    Check,
}

fn init_logging(format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = TeamserverConfig::load(&cli.config).await?;
    init_logging(config.logging.format);

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await?,
        Commands::Rules { action } => match action {
            RulesAction::Check => check_rules(&config)?,
        },
    }

    Ok(())
}

async fn serve(
    config: TeamserverConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let store: Arc<dyn Store> = match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::File => {
            info!(data_dir = %config.storage.data_dir.display(), "Using file storage");
            Arc::new(FileStore::new(config.storage.data_dir.clone()).await?)
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(store, config.orchestrator())?);
    seed_rules(&orchestrator, &config).await?;
    spawn_ledger_pruning(orchestrator.clone());

    let rate_limiter = Arc::new(RateLimiter::new(
        config.security.agents,
        config.security.operators,
    )?);
    spawn_rate_limit_cleanup(rate_limiter.clone());

    let app = GatewayServer::build_with_middleware(orchestrator.clone(), Some(rate_limiter));

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Teamserver listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        pending = orchestrator.pending_triggers(),
        "Shutting down, draining trigger queue"
    );
    orchestrator.flush().await;
    Ok(())
}

/// Create configured rules whose names are not taken yet, so restarts on a
/// persistent store do not duplicate them.
async fn seed_rules(orchestrator: &Orchestrator, config: &TeamserverConfig) -> anyhow::Result<()> {
    let existing: HashSet<String> = orchestrator
        .list_rules()
        .await?
        .into_iter()
        .map(|r| r.name)
        .collect();

    for definition in &config.rules {
        if existing.contains(&definition.name) {
            info!(rule = %definition.name, "Seed rule already present");
            continue;
        }
        orchestrator.create_rule(definition.clone()).await?;
    }
    Ok(())
}

fn spawn_rate_limit_cleanup(rate_limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let removed = rate_limiter.cleanup();
            if removed > 0 {
                tracing::debug!(removed, "Dropped idle rate limit clients");
            }
        }
    });
}

fn spawn_ledger_pruning(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(600));
        loop {
            tick.tick().await;
            if let Err(e) = orchestrator.prune_firings().await {
                warn!(error = %e, "Failed to prune rule firing ledger");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn check_rules(config: &TeamserverConfig) -> anyhow::Result<()> {
    if config.rules.is_empty() {
        println!("No rules configured.");
        println!("Define seed rules in teamserver.toml under [[rules]]");
        return Ok(());
    }

    let mut failures = 0;
    for definition in &config.rules {
        let mut rule = TriggerRule::new(
            definition.name.clone(),
            definition.predicate.clone(),
            definition.actions.clone(),
        );
        rule.enabled = definition.enabled;
        match rule.validate() {
            Ok(()) => {
                let state = if rule.enabled { "enabled" } else { "disabled" };
                println!(
                    "  ok    {} ({state}, {} action(s))",
                    rule.name,
                    rule.actions.len()
                );
            }
            Err(e) => {
                failures += 1;
                println!("  FAIL  {}: {e}", rule.name);
            }
        }
    }
    println!("\nTotal: {} rule(s), {failures} invalid", config.rules.len());

    if failures > 0 {
        anyhow::bail!("{failures} rule(s) failed validation");
    }
    Ok(())
}
