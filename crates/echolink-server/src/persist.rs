//! Bounded-retry wrapper for durable-store writes.
//!
//! Store writes run after in-memory locks are released; on exhausted
//! retries the caller rolls back its in-memory mutation and surfaces
//! [`SignalError::Persistence`].

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use echolink_shared::error::{SignalError, SignalResult};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 50;

/// Run `op` up to [`MAX_ATTEMPTS`] times with exponential backoff.
pub(crate) async fn with_retry<T, E, F, Fut>(what: &'static str, mut op: F) -> SignalResult<T>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                warn!(what, attempt, error = %e, "Store write failed, retrying");
                tokio::time::sleep(Duration::from_millis(BASE_BACKOFF_MS << attempt)).await;
            }
            Err(e) => {
                error!(what, error = %e, "Store write failed after retries");
                return Err(SignalError::Persistence(format!("{what}: {e}")));
            }
        }
    }
}
