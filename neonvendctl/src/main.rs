//! `neonvendctl`: operator CLI for the neonvend ledger.

mod cli;
mod inventory;
mod sign;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Loaded before clap so env-backed flags such as DATABASE_URL see it.
    let env_file = std::env::var_os("NEONVEND_ENV_FILE").map(std::path::PathBuf::from);
    load_env(env_file.as_deref())?;

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,neonvendctl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Sign(args) => {
            let signed = sign::sign(&args, chrono::Utc::now().timestamp())?;
            if args.json {
                println!("{}", signed.payload);
            } else {
                println!("message:   {}", signed.message);
                println!("signature: {}", signed.signature);
                println!("payload:   {}", signed.payload);
            }
        }
        Command::Machine(command) => emit(inventory::run_machine(command).await?)?,
        Command::Vouchers(command) => emit(inventory::run_vouchers(command).await?)?,
    }
    Ok(())
}

fn load_env(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(path) => dotenvy::from_path(path)
            .with_context(|| format!("failed to load env file {}", path.display())),
        None => match dotenvy::dotenv() {
            Ok(_) => Ok(()),
            Err(err) if err.not_found() => Ok(()),
            Err(err) => Err(err).context("failed to load .env"),
        },
    }
}

fn emit(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
