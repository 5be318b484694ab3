// SPDX-License-Identifier: GPL-3.0-only

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Run `op` up to `attempts` times, sleeping `backoff` between failures.
/// The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(attempts: u32, backoff: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(attempt, attempts, error = %err, "attempt failed, retrying");
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
