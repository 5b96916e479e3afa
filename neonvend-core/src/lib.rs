//! # neonvend core
//!
//! Lease and credit ledger for coin-operated voucher machines.
//!
//! ## Overview
//!
//! A fleet of vending machines accepts coin pulses from hardware and hands out
//! a time-bounded voucher once enough credit has accrued. Clients contend for a
//! machine; exactly one of them may use it at a time. This crate owns the
//! protocol around that shared machine state:
//!
//! - **Sessions**: opaque bearer tokens bound to a machine ([`session`])
//! - **Leases**: atomic acquire / renew / release of exclusive use ([`lease`])
//! - **Credit**: HMAC-authenticated coin pulses with replay limits ([`credit`])
//! - **Redemption**: credit traded for an inventory voucher in one transaction
//!   ([`redemption`])
//!
//! All four operate on [`domain::MachineState`] rows held behind the
//! [`database::ports::LedgerStore`] port. Serialization of concurrent writers is
//! delegated to the store's row atomicity; nothing here holds an in-process
//! lock over machine state.
//!
//! ## Feature Flags
//!
//! - `database` (default): PostgreSQL adapter and embedded migrations (SQLx)
//! - `postgres-tests`: adapter tests that need a live database
//!
//! ## Time
//!
//! Every component reads time through an injected [`clock::Clock`]. Tests drive
//! lease and session expiry with [`clock::ManualClock`].

pub mod api;
pub mod clock;
pub mod credit;
pub mod database;
pub mod domain;
pub mod error;
pub mod lease;
pub mod redemption;
pub mod session;

pub use clock::{Clock, ExpiryOverflow, ManualClock, SystemClock};
pub use credit::{
    CoinPulse, CreditIngestor, CreditReceipt, KeyScope, PulseKey, PulseKeys, ReplayPolicy,
    TimestampMode, sign_pulse,
};
pub use database::memory::InMemoryLedgerStore;
#[cfg(feature = "database")]
pub use database::postgres::PostgresLedgerStore;
pub use domain::{LeaseHolder, LeaseView, MachineId, MachineState, Voucher, VoucherDuration};
pub use error::{
    CreditError, ErrorKind, LeaseError, RedemptionError, SessionError, StoreError,
};
pub use lease::{AcquireOutcome, Lease, LeaseManager};
pub use redemption::{Redemption, RedemptionEngine};
pub use session::{SessionDirectory, SessionRecord, SessionToken, TokenDigester};

/// Embedded schema migrations for the PostgreSQL ledger store.
#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
