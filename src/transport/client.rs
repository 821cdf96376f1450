//! Single-attempt HTTP client built on `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{Client, StatusCode};
use tracing::debug;
use tunebridge_common::{Error, Result};

use super::Transport;
use crate::config::ProviderConfig;
use crate::context::RequestContext;

/// Header carrying the provider API key, when one is configured.
const API_KEY_HEADER: &str = "X-Api-Key";

/// Connection-level settings for one upstream.
#[derive(Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub cookie: Option<String>,
    pub api_key: Option<String>,
    pub proxy: Option<String>,
}

impl From<&ProviderConfig> for TransportConfig {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            timeout: config.timeout(),
            user_agent: config.user_agent.clone(),
            cookie: config.cookie.clone(),
            api_key: config.api_key.clone(),
            proxy: config.proxy.clone(),
        }
    }
}

/// Basic transport: one request per call, no retries.
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Build a client with the configured timeout, user agent, proxy and
    /// default headers.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &config.cookie {
            headers.insert(COOKIE, sensitive_header(cookie, "cookie")?);
        }
        if let Some(key) = &config.api_key {
            headers.insert(API_KEY_HEADER, sensitive_header(key, "api_key")?);
        }

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| Error::configuration(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    async fn send(&self, url: &str, query: &[(&str, String)]) -> Result<Bytes> {
        debug!(url = %url, "Upstream request");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(classify_error)?;

        check_status(response.status())?;

        response.bytes().await.map_err(classify_error)
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(&self, ctx: &RequestContext, url: &str, query: &[(&str, String)]) -> Result<Bytes> {
        ctx.run(self.send(url, query)).await
    }
}

fn sensitive_header(value: &str, field: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|e| Error::configuration(format!("invalid {field} header value: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Map a response status to the error taxonomy.
///
/// 5xx and 429 are transient; every other non-2xx status is final.
pub fn check_status(status: StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let reason = status.canonical_reason().unwrap_or("Unknown");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::transient_status(
            status.as_u16(),
            format!("HTTP {}: {reason}", status.as_u16()),
        ));
    }
    Err(Error::provider(format!("HTTP {}: {reason}", status.as_u16())))
}

/// Map a `reqwest` failure to the error taxonomy.
fn classify_error(err: reqwest::Error) -> Error {
    if let Some(status) = err.status() {
        if let Err(mapped) = check_status(status) {
            return mapped;
        }
    }
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return Error::transient(err.to_string());
    }
    Error::provider(err.to_string())
}
