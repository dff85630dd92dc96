//! Timeout utilities for outbound calls
//!
//! Every fetch (HTTP request or page navigation) runs under a fixed timeout so a
//! hung socket or a page with an infinite long-poll cannot pin a worker.

use std::future::Future;
use std::time::Duration;

/// An operation did not finish within its allotted time
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation} timed out after {timeout:?}")]
pub struct CallTimedOut {
    pub operation: String,
    pub timeout: Duration,
}

/// Wrap an async operation with an explicit timeout
///
/// The inner future is dropped when the timeout fires; callers that own
/// pooled resources must rely on RAII guards to return them.
///
/// # Arguments
/// * `operation` - The future to drive
/// * `timeout` - Maximum time to wait
/// * `operation_name` - Human-readable name for error messages
pub async fn with_call_timeout<F, T>(
    operation: F,
    timeout: Duration,
    operation_name: &str,
) -> Result<T, CallTimedOut>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(output) => Ok(output),
        Err(_) => Err(CallTimedOut {
            operation: operation_name.to_string(),
            timeout,
        }),
    }
}
