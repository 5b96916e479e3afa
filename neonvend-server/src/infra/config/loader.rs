use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::{HeaderName, Method};
use thiserror::Error;

use neonvend_core::database::postgres::PoolSettings;
use neonvend_core::{KeyScope, MachineId, MachineState, TimestampMode, Voucher, VoucherDuration};

use super::models::{
    Config, ConfigMetadata, CorsConfig, DatabaseConfig, HardwareConfig, LedgerConfig,
    SeedConfig, ServerConfig, SessionConfig, StoreBackend,
};
use super::sources::{EnvConfig, FileConfig, FileCorsConfig, FileHardwareConfig, FileSeedConfig};
use super::validation::ConfigWarnings;

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["neonvend.toml", "config/neonvend.toml"];

/// Secret used for coin pulses when `dev_mode` is on and none is configured.
pub const DEV_HMAC_SECRET: &str = "neonvend-dev-hmac-secret";

const MIN_SECRET_LEN: usize = 16;

const HOUR: Duration = Duration::from_secs(60 * 60);
const MAX_LEASE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_STORE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MAX_SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const MAX_REPLAY_TOLERANCE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to load .env file")]
    EnvFile(#[from] dotenvy::Error),
    #[error(
        "hardware HMAC secret is not configured (set NEONVEND_HMAC_SECRET or hardware.hmac_secret)"
    )]
    MissingHmacSecret,
    #[error("store backend is postgres but no database URL is configured (set DATABASE_URL)")]
    MissingDatabaseUrl,
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("invalid seed data: {0}")]
    InvalidSeed(String),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigLoadError {
    ConfigLoadError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Reject zero and anything above `max`; expiry arithmetic downstream
/// assumes both.
fn check_span(field: &'static str, value: Duration, max: Duration) -> Result<(), ConfigLoadError> {
    if value.is_zero() {
        return Err(invalid(field, "must be greater than zero"));
    }
    if value > max {
        return Err(invalid(
            field,
            format!("must be at most {}", humantime::format_duration(max)),
        ));
    }
    Ok(())
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let env = EnvConfig::gather();
        let (file, config_path) = self.load_file_config(&env)?;

        compose(
            file,
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => return Err(ConfigLoadError::MissingConfig { path }),
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let file = read_file_config(&path)?;
        Ok((Some(file), Some(path)))
    }
}

/// Parse one TOML configuration file.
pub fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge file and environment layers. Environment values win.
pub fn compose(
    file: Option<FileConfig>,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<ConfigLoad, ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if file.is_none() {
        warnings.push_with_hint(
            "No neonvend.toml detected; using environment variables only",
            "Pass --config or set NEONVEND_CONFIG to load a configuration file",
        );
    }

    let FileConfig {
        server: file_server,
        database: file_database,
        store: file_store,
        ledger: file_ledger,
        sessions: file_sessions,
        hardware: file_hardware,
        auth: file_auth,
        cors: file_cors,
        seed: file_seed,
        dev_mode: file_dev_mode,
    } = file.unwrap_or_default();

    let dev_mode = env.dev_mode.or(file_dev_mode).unwrap_or(false);

    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| "0.0.0.0".to_string()),
        port: env.server_port.or(file_server.port).unwrap_or(3000),
    };

    let pool_defaults = PoolSettings::default();
    let database = DatabaseConfig {
        url: env.database_url.clone().or(file_database.url),
        run_migrations: env
            .run_migrations
            .or(file_database.run_migrations)
            .unwrap_or(true),
        pool: PoolSettings {
            max_connections: file_database
                .max_connections
                .unwrap_or(pool_defaults.max_connections),
            min_connections: file_database
                .min_connections
                .unwrap_or(pool_defaults.min_connections),
            acquire_timeout: file_database
                .acquire_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(pool_defaults.acquire_timeout),
            statement_timeout: file_database
                .statement_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(pool_defaults.statement_timeout),
        },
    };

    let store = match env.store.as_deref().or(file_store.as_deref()) {
        Some(raw) => StoreBackend::parse(raw)
            .ok_or_else(|| invalid("store", format!("{raw:?} (expected postgres or memory)")))?,
        None if database.url.is_some() => StoreBackend::Postgres,
        None => StoreBackend::Memory,
    };
    if store == StoreBackend::Postgres && database.url.is_none() {
        return Err(ConfigLoadError::MissingDatabaseUrl);
    }
    if store == StoreBackend::Memory && !dev_mode {
        warnings.push_with_hint(
            "Using the in-memory ledger store; leases, credit and vouchers are lost on restart",
            "Set DATABASE_URL (or store = \"postgres\") for a durable ledger",
        );
    }

    let ledger_defaults = LedgerConfig::default();
    let ledger = LedgerConfig {
        lease_ttl: env
            .lease_ttl
            .or(file_ledger.lease_ttl_secs.map(Duration::from_secs))
            .unwrap_or(ledger_defaults.lease_ttl),
        store_timeout: env
            .store_timeout
            .or(file_ledger.store_timeout_ms.map(Duration::from_millis))
            .unwrap_or(ledger_defaults.store_timeout),
        claim_attempts: file_ledger
            .claim_attempts
            .unwrap_or(ledger_defaults.claim_attempts),
    };
    check_span("ledger.lease_ttl_secs", ledger.lease_ttl, MAX_LEASE_TTL)?;
    check_span("ledger.store_timeout_ms", ledger.store_timeout, MAX_STORE_TIMEOUT)?;
    if ledger.claim_attempts == 0 {
        return Err(invalid("ledger.claim_attempts", "must be at least 1"));
    }

    let session_defaults = SessionConfig::default();
    let sessions = SessionConfig {
        ttl: env
            .session_ttl
            .or(file_sessions.ttl_secs.map(Duration::from_secs))
            .unwrap_or(session_defaults.ttl),
        sweep_interval: match env
            .session_sweep_interval
            .or(file_sessions.sweep_interval_secs.map(Duration::from_secs))
        {
            Some(interval) if interval.is_zero() => None,
            Some(interval) => Some(interval),
            None => session_defaults.sweep_interval,
        },
    };
    check_span("sessions.ttl_secs", sessions.ttl, MAX_SESSION_TTL)?;
    if let Some(interval) = sessions.sweep_interval {
        check_span("sessions.sweep_interval_secs", interval, HOUR)?;
    }

    let hardware = compose_hardware(&env, file_hardware, &ledger, dev_mode, &mut warnings)?;

    let cors = compose_cors(&env, file_cors, dev_mode, &mut warnings)?;

    let seed = compose_seed(file_seed)?;
    if !seed.is_empty() && store == StoreBackend::Postgres {
        warnings.push(format!(
            "Seeding {} machine(s) and {} voucher(s) into PostgreSQL; existing vouchers are left untouched",
            seed.machines.len(),
            seed.vouchers.len()
        ));
    }

    let config = Config {
        server,
        database,
        store,
        ledger,
        sessions,
        hardware,
        token_key: env.auth_token_key.clone().or(file_auth.token_key),
        cors,
        seed,
        dev_mode,
        metadata,
    };

    Ok(ConfigLoad { config, warnings })
}

fn compose_hardware(
    env: &EnvConfig,
    file: FileHardwareConfig,
    ledger: &LedgerConfig,
    dev_mode: bool,
    warnings: &mut ConfigWarnings,
) -> Result<HardwareConfig, ConfigLoadError> {
    let defaults = HardwareConfig::default();

    let key_scope = match env.key_scope.as_deref() {
        Some(raw) => raw
            .parse::<KeyScope>()
            .map_err(|reason| invalid("hardware.key_scope", reason))?,
        None => file.key_scope.unwrap_or(defaults.key_scope),
    };
    let timestamp_mode = match env.timestamp_mode.as_deref() {
        Some(raw) => raw
            .parse::<TimestampMode>()
            .map_err(|reason| invalid("hardware.timestamp_mode", reason))?,
        None => file.timestamp_mode.unwrap_or(defaults.timestamp_mode),
    };

    let hmac_secret = match (key_scope, env.hmac_secret.clone().or(file.hmac_secret)) {
        (KeyScope::Deployment, None) if dev_mode => {
            warnings.push_with_hint(
                "No hardware HMAC secret configured; using the built-in development secret",
                "Set NEONVEND_HMAC_SECRET before exposing /hardware/coin",
            );
            Some(DEV_HMAC_SECRET.to_string())
        }
        (KeyScope::Deployment, None) => return Err(ConfigLoadError::MissingHmacSecret),
        (KeyScope::Deployment, Some(secret)) => {
            if secret.len() < MIN_SECRET_LEN {
                warnings.push(format!(
                    "Hardware HMAC secret is shorter than {MIN_SECRET_LEN} bytes"
                ));
            }
            Some(secret)
        }
        (KeyScope::Machine, secret) => {
            if secret.is_some() {
                warnings.push("hardware.hmac_secret is ignored when key_scope = \"machine\"");
            }
            secret
        }
    };

    match timestamp_mode {
        TimestampMode::Auto => warnings.push_with_hint(
            "Timestamp mode \"auto\" guesses wall clock versus device uptime from the value; small timestamps skip replay checks",
            "Pick wall_clock or device_uptime to match the fleet firmware",
        ),
        TimestampMode::DeviceUptime => warnings.push(
            "Timestamp mode \"device_uptime\" accepts any non-negative timestamp; coin pulses have no replay protection",
        ),
        TimestampMode::WallClock => {}
    }

    let hardware = HardwareConfig {
        hmac_secret,
        key_scope,
        timestamp_mode,
        replay_tolerance: env
            .replay_tolerance
            .or(file.replay_tolerance_secs.map(Duration::from_secs))
            .unwrap_or(defaults.replay_tolerance),
        uptime_cutoff: file.uptime_cutoff.unwrap_or(defaults.uptime_cutoff),
        renewal_window: file
            .renewal_window_secs
            .map(Duration::from_secs)
            .unwrap_or(ledger.lease_ttl),
    };
    if hardware.uptime_cutoff <= 0 {
        return Err(invalid("hardware.uptime_cutoff", "must be positive"));
    }
    check_span(
        "hardware.replay_tolerance_secs",
        hardware.replay_tolerance,
        MAX_REPLAY_TOLERANCE,
    )?;
    check_span("hardware.renewal_window_secs", hardware.renewal_window, MAX_LEASE_TTL)?;
    Ok(hardware)
}

fn compose_cors(
    env: &EnvConfig,
    file: FileCorsConfig,
    dev_mode: bool,
    warnings: &mut ConfigWarnings,
) -> Result<CorsConfig, ConfigLoadError> {
    let cors = CorsConfig {
        allowed_origins: env
            .cors_allowed_origins
            .clone()
            .or(file.allowed_origins)
            .unwrap_or_default(),
        allowed_methods: env
            .cors_allowed_methods
            .clone()
            .or(file.allowed_methods)
            .unwrap_or_else(|| vec!["GET".into(), "POST".into(), "OPTIONS".into()]),
        allowed_headers: env
            .cors_allowed_headers
            .clone()
            .or(file.allowed_headers)
            .unwrap_or_else(|| vec!["content-type".into(), "x-session-token".into()]),
        allow_credentials: env
            .cors_allow_credentials
            .or(file.allow_credentials)
            .unwrap_or(false),
    };

    for method in &cors.allowed_methods {
        Method::from_bytes(method.as_bytes())
            .map_err(|_| invalid("cors.allowed_methods", format!("{method:?}")))?;
    }
    for header in &cors.allowed_headers {
        HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| invalid("cors.allowed_headers", format!("{header:?}")))?;
    }

    if cors.allow_credentials && cors.allowed_origins.is_empty() && !dev_mode {
        return Err(invalid(
            "cors.allow_credentials",
            "credentials require an explicit origin allow-list",
        ));
    }
    if !dev_mode && cors.allowed_origins.is_empty() {
        warnings.push_with_hint(
            "CORS allow-list is empty; any origin may call the API",
            "Set CORS_ALLOWED_ORIGINS to the kiosk front-end origin",
        );
    }
    Ok(cors)
}

fn compose_seed(file: FileSeedConfig) -> Result<SeedConfig, ConfigLoadError> {
    let mut seed = SeedConfig::default();

    for entry in file.machines {
        let id = MachineId::parse(&entry.id)
            .map_err(|err| ConfigLoadError::InvalidSeed(format!("machine {:?}: {err}", entry.id)))?;
        if entry.pulse_rate.is_sign_negative() {
            return Err(ConfigLoadError::InvalidSeed(format!(
                "machine {id}: pulse_rate must not be negative"
            )));
        }
        let mut machine = MachineState::new(id, entry.pulse_rate);
        if let Some(secret) = entry.secret_key {
            machine = machine.with_secret_key(secret);
        }
        seed.machines.push(machine);
    }

    for batch in file.vouchers {
        let machine_id = MachineId::parse(&batch.machine_id).map_err(|err| {
            ConfigLoadError::InvalidSeed(format!("vouchers for {:?}: {err}", batch.machine_id))
        })?;
        let duration = VoucherDuration::from_minutes(batch.duration_minutes)
            .map_err(|err| ConfigLoadError::InvalidSeed(format!("vouchers for {machine_id}: {err}")))?;
        for code in batch.codes {
            let code = code.trim().to_string();
            if code.is_empty() {
                return Err(ConfigLoadError::InvalidSeed(format!(
                    "vouchers for {machine_id}: empty code"
                )));
            }
            seed.vouchers
                .push(Voucher::unused(code, machine_id.clone(), duration));
        }
    }

    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::io::Write;

    fn env() -> EnvConfig {
        EnvConfig {
            hmac_secret: Some("a-sufficiently-long-secret".into()),
            ..EnvConfig::default()
        }
    }

    fn file(toml: &str) -> FileConfig {
        toml::from_str(toml).expect("valid toml")
    }

    #[test]
    fn defaults_without_file_use_memory_store_and_wall_clock() {
        let ConfigLoad { config, warnings } =
            compose(None, env(), ConfigMetadata::default()).unwrap();

        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.ledger.lease_ttl, Duration::from_secs(60));
        assert_eq!(config.sessions.ttl, Duration::from_secs(3600));
        assert_eq!(config.sessions.sweep_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.hardware.timestamp_mode, TimestampMode::WallClock);
        assert_eq!(config.hardware.key_scope, KeyScope::Deployment);
        assert!(warnings.mentions("in-memory"));
        assert!(warnings.mentions("No neonvend.toml"));
    }

    #[test]
    fn database_url_selects_postgres() {
        let env = EnvConfig {
            database_url: Some("postgres://localhost/neonvend".into()),
            ..env()
        };
        let load = compose(None, env, ConfigMetadata::default()).unwrap();
        assert_eq!(load.config.store, StoreBackend::Postgres);
        assert!(!load.warnings.mentions("in-memory"));
    }

    #[test]
    fn postgres_without_url_is_rejected() {
        let env = EnvConfig {
            store: Some("postgres".into()),
            ..env()
        };
        let err = compose(None, env, ConfigMetadata::default()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingDatabaseUrl));
    }

    #[test]
    fn missing_hmac_secret_is_fatal_outside_dev_mode() {
        let err = compose(None, EnvConfig::default(), ConfigMetadata::default()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingHmacSecret));

        let dev = EnvConfig {
            dev_mode: Some(true),
            ..EnvConfig::default()
        };
        let load = compose(None, dev, ConfigMetadata::default()).unwrap();
        assert_eq!(load.config.hardware.hmac_secret.as_deref(), Some(DEV_HMAC_SECRET));
        assert!(load.warnings.mentions("development secret"));
    }

    #[test]
    fn per_machine_scope_needs_no_deployment_secret() {
        let toml = file(
            r#"
            [hardware]
            key_scope = "machine"
            "#,
        );
        let load = compose(Some(toml), EnvConfig::default(), ConfigMetadata::default()).unwrap();
        assert_eq!(load.config.hardware.key_scope, KeyScope::Machine);
        assert_eq!(load.config.hardware.hmac_secret, None);
    }

    #[test]
    fn environment_overrides_file_values() {
        let toml = file(
            r#"
            [server]
            port = 8080

            [ledger]
            lease_ttl_secs = 30

            [hardware]
            timestamp_mode = "device_uptime"
            "#,
        );
        let env = EnvConfig {
            server_port: Some(9090),
            timestamp_mode: Some("auto".into()),
            ..env()
        };
        let load = compose(Some(toml), env, ConfigMetadata::default()).unwrap();

        assert_eq!(load.config.server.port, 9090);
        assert_eq!(load.config.ledger.lease_ttl, Duration::from_secs(30));
        assert_eq!(load.config.hardware.renewal_window, Duration::from_secs(30));
        assert_eq!(load.config.hardware.timestamp_mode, TimestampMode::Auto);
        assert!(load.warnings.mentions("auto"));
    }

    #[test]
    fn zero_sweep_interval_disables_the_sweep() {
        let toml = file(
            r#"
            [sessions]
            sweep_interval_secs = 0
            "#,
        );
        let load = compose(Some(toml), env(), ConfigMetadata::default()).unwrap();
        assert_eq!(load.config.sessions.sweep_interval, None);
    }

    #[test]
    fn bad_enum_values_are_reported_by_field() {
        let env = EnvConfig {
            timestamp_mode: Some("sundial".into()),
            ..env()
        };
        let err = compose(None, env, ConfigMetadata::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidValue {
                field: "hardware.timestamp_mode",
                ..
            }
        ));

        let env = EnvConfig {
            cors_allowed_methods: Some(vec!["GET POST".into()]),
            ..self::env()
        };
        assert!(compose(None, env, ConfigMetadata::default()).is_err());
    }

    #[test]
    fn seed_entries_become_domain_records() {
        let toml = file(
            r#"
            [[seed.machines]]
            id = "VM001"
            pulse_rate = "1.00"

            [[seed.vouchers]]
            machine_id = "VM001"
            duration_minutes = 60
            codes = ["AAA", " BBB "]
            "#,
        );
        let load = compose(Some(toml), env(), ConfigMetadata::default()).unwrap();

        let seed = &load.config.seed;
        assert_eq!(seed.machines.len(), 1);
        assert_eq!(seed.machines[0].pulse_rate, Decimal::new(100, 2));
        let codes: Vec<_> = seed.vouchers.iter().map(|v| v.code.as_str()).collect();
        assert_eq!(codes, vec!["AAA", "BBB"]);
        assert_eq!(seed.vouchers[0].duration.minutes(), 60);
    }

    #[test]
    fn seed_rejects_out_of_range_durations() {
        let toml = file(
            r#"
            [[seed.vouchers]]
            machine_id = "VM001"
            duration_minutes = 10081
            codes = ["AAA"]
            "#,
        );
        let err = compose(Some(toml), env(), ConfigMetadata::default()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::InvalidSeed(_)));
    }

    #[test]
    fn oversized_lease_ttl_is_rejected_before_startup() {
        let env = EnvConfig {
            lease_ttl: Some(Duration::from_secs(100_000_000_000_000)),
            ..env()
        };
        let err = compose(None, env, ConfigMetadata::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidValue {
                field: "ledger.lease_ttl_secs",
                ..
            }
        ));
    }

    #[test]
    fn renewal_window_and_session_ttl_are_bounded() {
        let renewal = file(
            r#"
            [hardware]
            renewal_window_secs = 100000000000000
            "#,
        );
        let err = compose(Some(renewal), env(), ConfigMetadata::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidValue {
                field: "hardware.renewal_window_secs",
                ..
            }
        ));

        let zero_renewal = file(
            r#"
            [hardware]
            renewal_window_secs = 0
            "#,
        );
        assert!(compose(Some(zero_renewal), env(), ConfigMetadata::default()).is_err());

        let env = EnvConfig {
            session_ttl: Some(MAX_SESSION_TTL + Duration::from_secs(1)),
            ..env()
        };
        let err = compose(None, env, ConfigMetadata::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidValue {
                field: "sessions.ttl_secs",
                ..
            }
        ));
    }

    #[test]
    fn largest_allowed_spans_compose() {
        let env = EnvConfig {
            lease_ttl: Some(MAX_LEASE_TTL),
            session_ttl: Some(MAX_SESSION_TTL),
            replay_tolerance: Some(MAX_REPLAY_TOLERANCE),
            ..env()
        };
        let load = compose(None, env, ConfigMetadata::default()).unwrap();
        assert_eq!(load.config.hardware.renewal_window, MAX_LEASE_TTL);
    }

    #[test]
    fn explicit_config_file_is_read_from_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "dev_mode = true\n[server]\nhost = \"127.0.0.1\"").unwrap();

        let parsed = read_file_config(tmp.path()).unwrap();
        assert_eq!(parsed.dev_mode, Some(true));
        assert_eq!(parsed.server.host.as_deref(), Some("127.0.0.1"));

        let missing = ConfigLoader::new()
            .with_config_path(tmp.path().with_extension("absent"))
            .load_file_config(&EnvConfig::default())
            .unwrap_err();
        assert!(matches!(missing, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn unparsable_file_reports_its_path() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[server\nport = ").unwrap();
        let err = read_file_config(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }
}
