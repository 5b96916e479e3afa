//! Layered configuration: `.env`, an optional TOML file, then environment
//! variables. CLI flags are applied on top by the binary.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader};
pub use models::{
    Config, ConfigMetadata, CorsConfig, DatabaseConfig, HardwareConfig, LedgerConfig,
    SeedConfig, ServerConfig, SessionConfig, StoreBackend,
};
pub use validation::{ConfigWarning, ConfigWarnings};
