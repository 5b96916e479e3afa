//! # neonvend server
//!
//! Serves the kiosk and hardware API for a fleet of coin-operated voucher
//! machines.
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - PostgreSQL (or an in-memory store for development) for machine state and
//!   voucher inventory
//! - An in-process session directory for bearer tokens
//! - HMAC-SHA-256 to authenticate coin pulses from hardware

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use neonvend_core::{PostgresLedgerStore, SystemClock, TimestampMode};
use neonvend_server::{
    infra::{
        config::{Config, ConfigLoad, ConfigLoader, ConfigWarnings, StoreBackend},
        startup::{apply_seed, build_state, open_store, spawn_session_sweeper},
    },
    routes,
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "neonvend-server")]
#[command(about = "Lease and credit ledger for coin-operated voucher machines")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Path to a neonvend.toml configuration file
    #[arg(short, long, env = "NEONVEND_CONFIG")]
    config: Option<PathBuf>,

    /// Alternate .env file to load before reading the environment
    #[arg(long, env = "NEONVEND_ENV_FILE")]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_runtime_config(&cli.serve)?;

    if let Some(Command::Db(DbCommand::Migrate)) = cli.command {
        return run_db_migrate(&config).await;
    }

    run_server(config).await
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Arc<Config>> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }

    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    log_warnings(&warnings);

    info!(
        store = %config.store,
        lease_ttl = %humantime::format_duration(config.ledger.lease_ttl),
        store_timeout = %humantime::format_duration(config.ledger.store_timeout),
        session_ttl = %humantime::format_duration(config.sessions.ttl),
        key_scope = ?config.hardware.key_scope,
        timestamp_mode = ?config.hardware.timestamp_mode,
        replay_tolerance = %humantime::format_duration(config.hardware.replay_tolerance),
        dev_mode = config.dev_mode,
        "ledger configuration in effect"
    );

    Ok(Arc::new(config))
}

fn log_warnings(warnings: &ConfigWarnings) {
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }
}

async fn run_db_migrate(config: &Config) -> anyhow::Result<()> {
    if config.store != StoreBackend::Postgres {
        anyhow::bail!("db migrate needs the postgres store; set DATABASE_URL");
    }
    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL must be provided for migrations")?;
    let store = PostgresLedgerStore::connect(url, &config.database.pool)
        .await
        .context("failed to connect to PostgreSQL for migration")?;
    store.migrate().await.context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    if !config.seed.is_empty() {
        let summary = apply_seed(store.as_ref(), &config.seed, config.ledger.store_timeout).await?;
        info!(
            machines = summary.machines,
            vouchers = summary.vouchers_inserted,
            "seed data applied"
        );
    }

    if config.hardware.timestamp_mode == TimestampMode::Auto {
        warn!(
            cutoff = config.hardware.uptime_cutoff,
            "timestamp mode auto: pulses below the cutoff are treated as device uptime without replay checks"
        );
    }

    let state = build_state(Arc::clone(&config), store, Arc::new(SystemClock))?;

    let sweeper = config
        .sessions
        .sweep_interval
        .map(|every| spawn_session_sweeper(Arc::clone(&state.sessions), every));

    let router = routes::create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting neonvend server on {}", addr);
    if config.dev_mode {
        warn!("dev mode enabled: permissive CORS and development defaults are active");
    }

    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
