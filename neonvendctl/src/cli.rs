use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

/// Operator tooling for a neonvend deployment.
#[derive(Debug, Parser)]
#[command(name = "neonvendctl", version)]
#[command(about = "Sign coin pulses and manage machines and voucher inventory")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign a coin pulse the way machine hardware does
    Sign(SignArgs),
    /// Provision, inspect or release machines
    #[command(subcommand)]
    Machine(MachineCommand),
    /// Manage voucher inventory
    #[command(subcommand)]
    Vouchers(VoucherCommand),
}

#[derive(Debug, Clone, Args)]
pub struct SignArgs {
    /// Shared HMAC secret (deployment-wide or the machine's own key)
    #[arg(long, env = "NEONVEND_HMAC_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Machine identifier, e.g. VM001
    #[arg(long)]
    pub machine: String,

    /// Number of coin pulses
    #[arg(long, default_value_t = 1)]
    pub pulses: u32,

    /// Unix timestamp in seconds (defaults to now)
    #[arg(long, conflicts_with = "uptime")]
    pub timestamp: Option<String>,

    /// Device uptime in seconds, for machines without a real-time clock
    #[arg(long)]
    pub uptime: Option<u64>,

    /// Print only the JSON payload
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DatabaseArgs {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Deadline for each store call
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    pub store_timeout: std::time::Duration,
}

#[derive(Debug, Subcommand)]
pub enum MachineCommand {
    /// Insert a machine or update its pulse rate and key
    Add {
        #[command(flatten)]
        db: DatabaseArgs,
        /// Machine identifier
        #[arg(long)]
        id: String,
        /// Credit added per coin pulse, e.g. 0.50
        #[arg(long)]
        rate: Decimal,
        /// Per-machine HMAC key
        #[arg(long)]
        secret: Option<String>,
    },
    /// Show lease and credit state
    Show {
        #[command(flatten)]
        db: DatabaseArgs,
        #[arg(long)]
        id: String,
    },
    /// Clear a stuck lease. Accrued credit is kept.
    Release {
        #[command(flatten)]
        db: DatabaseArgs,
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum VoucherCommand {
    /// Add voucher codes to a machine's inventory
    Add {
        #[command(flatten)]
        db: DatabaseArgs,
        /// Machine the vouchers belong to
        #[arg(long)]
        machine: String,
        /// Voucher validity in minutes (1 to 10080)
        #[arg(long)]
        duration: i64,
        /// Voucher codes
        #[arg(required = true)]
        codes: Vec<String>,
    },
}
