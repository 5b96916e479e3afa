use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use neonvend_core::credit::replay::{DEFAULT_REPLAY_TOLERANCE, DEFAULT_UPTIME_CUTOFF};
use neonvend_core::database::DEFAULT_STORE_TIMEOUT;
use neonvend_core::database::postgres::PoolSettings;
use neonvend_core::lease::DEFAULT_LEASE_TTL;
use neonvend_core::redemption::DEFAULT_CLAIM_ATTEMPTS;
use neonvend_core::session::DEFAULT_SESSION_TTL;
use neonvend_core::{KeyScope, MachineState, TimestampMode, Voucher};

/// Fully resolved server configuration.
#[derive(Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub store: StoreBackend,
    pub ledger: LedgerConfig,
    pub sessions: SessionConfig,
    pub hardware: HardwareConfig,
    /// Key for digesting session tokens into lease holders. `None` means a
    /// random per-process key.
    pub token_key: Option<String>,
    pub cors: CorsConfig,
    pub seed: SeedConfig,
    pub dev_mode: bool,
    pub metadata: ConfigMetadata,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("store", &self.store)
            .field("ledger", &self.ledger)
            .field("sessions", &self.sessions)
            .field("hardware", &self.hardware)
            .field("token_key", &self.token_key.as_ref().map(|_| "<redacted>"))
            .field("cors", &self.cors)
            .field("dev_mode", &self.dev_mode)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub run_migrations: bool,
    pub pool: PoolSettings,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("run_migrations", &self.run_migrations)
            .field("pool", &self.pool)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(StoreBackend::Postgres),
            "memory" | "in-memory" | "in_memory" | "mem" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub lease_ttl: Duration,
    pub store_timeout: Duration,
    pub claim_attempts: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lease_ttl: DEFAULT_LEASE_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            claim_attempts: DEFAULT_CLAIM_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub ttl: Duration,
    /// Background purge period; `None` disables the sweep.
    pub sweep_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            sweep_interval: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct HardwareConfig {
    pub hmac_secret: Option<String>,
    pub key_scope: KeyScope,
    pub timestamp_mode: TimestampMode,
    pub replay_tolerance: Duration,
    pub uptime_cutoff: i64,
    /// How far a credited pulse pushes the lease expiry out.
    pub renewal_window: Duration,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            hmac_secret: None,
            key_scope: KeyScope::Deployment,
            timestamp_mode: TimestampMode::WallClock,
            replay_tolerance: DEFAULT_REPLAY_TOLERANCE,
            uptime_cutoff: DEFAULT_UPTIME_CUTOFF,
            renewal_window: DEFAULT_LEASE_TTL,
        }
    }
}

impl fmt::Debug for HardwareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareConfig")
            .field("hmac_secret", &self.hmac_secret.as_ref().map(|_| "<redacted>"))
            .field("key_scope", &self.key_scope)
            .field("timestamp_mode", &self.timestamp_mode)
            .field("replay_tolerance", &self.replay_tolerance)
            .field("uptime_cutoff", &self.uptime_cutoff)
            .field("renewal_window", &self.renewal_window)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
}

/// Machines and voucher inventory loaded into the store at startup.
#[derive(Debug, Clone, Default)]
pub struct SeedConfig {
    pub machines: Vec<MachineState>,
    pub vouchers: Vec<Voucher>,
}

impl SeedConfig {
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty() && self.vouchers.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
