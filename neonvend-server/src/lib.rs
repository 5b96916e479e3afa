//! # neonvend server
//!
//! HTTP surface over the lease and credit ledger in `neonvend-core`.
//!
//! Kiosk clients create a session, lock a machine, poll its status and buy a
//! voucher; machine hardware posts signed coin pulses. All state changes go
//! through the core components held in [`AppState`].

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use infra::errors::{AppError, AppResult};
