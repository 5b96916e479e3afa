//! Ledger storage: the [`ports::LedgerStore`] port and its adapters.

pub mod memory;
pub mod ports;
#[cfg(feature = "database")]
pub mod postgres;

use std::future::Future;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a store call under a deadline. An elapsed deadline surfaces as
/// [`StoreError::Timeout`]; the call is not retried.
pub async fn bounded<T, F>(deadline: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}
