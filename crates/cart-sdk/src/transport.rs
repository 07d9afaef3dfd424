use std::time::Duration;

use reqwest::{Client, Request, Response};
use thiserror::Error;
use tracing::{debug, warn};

/// Per-call deadlines. Every request carries one; nothing waits unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub default: Duration,
    pub camera_start: Duration,
    pub camera_stop: Duration,
    pub prompt: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_millis(10_000),
            camera_start: Duration::from_millis(25_000),
            camera_stop: Duration::from_millis(30_000),
            prompt: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
}

/// Sends `request`, abandoning it once `timeout` elapses.
///
/// The in-flight future is dropped when the deadline fires, which aborts the
/// connection attempt or exchange. No retries happen here.
pub async fn fetch_with_timeout(
    client: &Client,
    request: Request,
    timeout: Duration,
) -> Result<Response, TransportError> {
    let method = request.method().clone();
    let url = request.url().clone();
    debug!(
        target = "cart_sdk::transport",
        %method,
        %url,
        timeout_ms = timeout.as_millis() as u64,
        "sending request"
    );

    match tokio::time::timeout(timeout, client.execute(request)).await {
        Ok(Ok(response)) => {
            debug!(
                target = "cart_sdk::transport",
                %method,
                %url,
                status = %response.status(),
                "request completed"
            );
            Ok(response)
        }
        Ok(Err(err)) if err.is_timeout() => {
            warn!(target = "cart_sdk::transport", %method, %url, "request timed out in client");
            Err(TransportError::Timeout { after: timeout })
        }
        Ok(Err(err)) => {
            warn!(target = "cart_sdk::transport", %method, %url, error = %err, "request failed");
            Err(TransportError::Network(err))
        }
        Err(_) => {
            warn!(
                target = "cart_sdk::transport",
                %method,
                %url,
                timeout_ms = timeout.as_millis() as u64,
                "request aborted at deadline"
            );
            Err(TransportError::Timeout { after: timeout })
        }
    }
}
