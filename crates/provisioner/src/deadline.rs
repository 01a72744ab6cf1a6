use std::future::Future;
use std::time::Duration;

use crate::error::{ProvisionError, Result};

/// Awaits an external call for at most `limit`.
///
/// Expiry is reported as [`ProvisionError::DeadlineExceeded`], so callers
/// unwind through their normal error path and scoped resources are released.
pub(crate) async fn bounded<T, E, F>(limit: Duration, operation: &'static str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<ProvisionError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(operation, ?limit, "external call timed out");
            Err(ProvisionError::DeadlineExceeded { operation })
        }
    }
}
