//! Resilient HTTP transport used by every provider.
//!
//! - [`client`] -- Single-attempt `reqwest` client with timeout, user agent,
//!   proxy and cookie injection.
//! - [`retry`] -- Linear-backoff retry decorator for transient failures.

pub mod client;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tunebridge_common::{Error, Result};

use crate::config::ProviderConfig;
use crate::context::RequestContext;

pub use client::{HttpClient, TransportConfig};
pub use retry::{RetryPolicy, RetryingTransport};

/// An HTTP GET capability.
///
/// Implementations must map failures onto the common error taxonomy so the
/// retry decorator can tell transient failures from permanent ones.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET with the given query parameters and return the body of a
    /// 2xx response.
    async fn get(&self, ctx: &RequestContext, url: &str, query: &[(&str, String)]) -> Result<Bytes>;
}

/// Build the transport stack for a provider: a basic client, wrapped in the
/// retry decorator when `retry_count > 0`.
pub fn build_transport(config: &ProviderConfig) -> Result<Arc<dyn Transport>> {
    let client = HttpClient::new(&TransportConfig::from(config))?;
    if config.retry_count == 0 {
        return Ok(Arc::new(client));
    }
    let policy = RetryPolicy::new(config.retry_count, config.retry_delay());
    Ok(Arc::new(RetryingTransport::new(client, policy)))
}

/// GET `url` and decode the body as JSON.
pub async fn get_json<T: DeserializeOwned>(
    transport: &dyn Transport,
    ctx: &RequestContext,
    url: &str,
    query: &[(&str, String)],
) -> Result<T> {
    let body = transport.get(ctx, url, query).await?;
    serde_json::from_slice(&body)
        .map_err(|e| Error::provider(format!("failed to decode response from {url}: {e}")))
}
