use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use neonvend_core::{KeyScope, TimestampMode};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(default)]
    pub ledger: FileLedgerConfig,
    #[serde(default)]
    pub sessions: FileSessionConfig,
    #[serde(default)]
    pub hardware: FileHardwareConfig,
    #[serde(default)]
    pub auth: FileAuthConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
    #[serde(default)]
    pub seed: FileSeedConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_migrations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLedgerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_ttl_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_attempts: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// `0` disables the background sweep.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileHardwareConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_scope: Option<KeyScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_mode: Option<TimestampMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_tolerance_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_cutoff: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewal_window_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_key: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_headers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSeedConfig {
    #[serde(default)]
    pub machines: Vec<FileSeedMachine>,
    #[serde(default)]
    pub vouchers: Vec<FileSeedVouchers>,
}

/// `[[seed.machines]]` entry. Write `pulse_rate` as a string (`"1.00"`) to
/// keep it exact.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileSeedMachine {
    pub id: String,
    pub pulse_rate: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

/// `[[seed.vouchers]]` entry: a batch of codes sharing machine and duration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileSeedVouchers {
    pub machine_id: String,
    pub duration_minutes: i64,
    pub codes: Vec<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub run_migrations: Option<bool>,
    pub store: Option<String>,
    pub lease_ttl: Option<Duration>,
    pub store_timeout: Option<Duration>,
    pub session_ttl: Option<Duration>,
    pub session_sweep_interval: Option<Duration>,
    pub hmac_secret: Option<String>,
    pub key_scope: Option<String>,
    pub timestamp_mode: Option<String>,
    pub replay_tolerance: Option<Duration>,
    pub auth_token_key: Option<String>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub cors_allowed_methods: Option<Vec<String>>,
    pub cors_allowed_headers: Option<Vec<String>>,
    pub cors_allow_credentials: Option<bool>,
    pub dev_mode: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Durations accept humantime
    /// syntax (`90s`, `5m`, `1h 30m`).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let duration = |name: &str| non_empty(name).and_then(|raw| parse_duration(&raw));
        let csv = |name: &str| lookup(name).map(|raw| parse_csv(&raw));
        let flag = |name: &str| lookup(name).and_then(|raw| parse_bool(&raw));

        Self {
            config_path: non_empty("NEONVEND_CONFIG").map(PathBuf::from),
            server_host: non_empty("SERVER_HOST"),
            server_port: non_empty("SERVER_PORT").and_then(|s| s.trim().parse().ok()),
            database_url: non_empty("DATABASE_URL"),
            run_migrations: flag("NEONVEND_RUN_MIGRATIONS"),
            store: non_empty("NEONVEND_STORE"),
            lease_ttl: duration("NEONVEND_LEASE_TTL"),
            store_timeout: duration("NEONVEND_STORE_TIMEOUT"),
            session_ttl: duration("NEONVEND_SESSION_TTL"),
            session_sweep_interval: duration("NEONVEND_SESSION_SWEEP_INTERVAL"),
            hmac_secret: non_empty("NEONVEND_HMAC_SECRET"),
            key_scope: non_empty("NEONVEND_KEY_SCOPE"),
            timestamp_mode: non_empty("NEONVEND_TIMESTAMP_MODE"),
            replay_tolerance: duration("NEONVEND_REPLAY_TOLERANCE"),
            auth_token_key: non_empty("AUTH_TOKEN_KEY"),
            cors_allowed_origins: csv("CORS_ALLOWED_ORIGINS"),
            cors_allowed_methods: csv("CORS_ALLOWED_METHODS"),
            cors_allowed_headers: csv("CORS_ALLOWED_HEADERS"),
            cors_allow_credentials: flag("CORS_ALLOW_CREDENTIALS"),
            dev_mode: flag("DEV_MODE"),
        }
    }
}

pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Bare integers are seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).ok()
}
