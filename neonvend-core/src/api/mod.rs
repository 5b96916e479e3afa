//! Wire types and route constants for the JSON API.

pub mod routes;
pub mod types;

pub use types::*;
