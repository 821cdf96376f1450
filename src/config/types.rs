use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tunebridge_common::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

/// Wire contract spoken by an upstream provider.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Single-endpoint `types=search|url|lyric|pic` API.
    Gdstudio,
    /// REST API with `{code, message, data, timestamp}` envelopes.
    Unm,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gdstudio => write!(f, "gdstudio"),
            Self::Unm => write!(f, "unm"),
        }
    }
}

#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ProviderKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Lower values are tried first during match fallback.
    #[serde(default)]
    pub priority: i32,

    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Extra attempts the transport makes on transient failures.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Base delay for linear retry backoff.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Upstream pacing; unset means no pacing.
    #[serde(default)]
    pub rate_limit_per_second: Option<u32>,

    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub cookie: Option<String>,

    /// Quality requested when the caller does not specify one.
    #[serde(default)]
    pub default_quality: Option<String>,
}

/// Fields masked by the `Debug` impl of [`ProviderConfig`].
pub const REDACTED_FIELDS: &[&str] = &["api_key", "cookie"];

const REDACTED: &str = "***";

fn default_enabled() -> bool {
    true
}
fn default_user_agent() -> String {
    concat!("tunebridge/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_timeout() -> u64 {
    10
}
fn default_retry_count() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    500
}

impl ProviderConfig {
    /// Create a config with default transport settings.
    pub fn new(name: impl Into<String>, kind: ProviderKind, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: default_enabled(),
            priority: 0,
            base_url: base_url.into(),
            api_key: None,
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay(),
            rate_limit_per_second: None,
            proxy: None,
            cookie: None,
            default_quality: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Check every field a provider relies on.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration("provider name cannot be empty"));
        }

        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            Error::configuration(format!(
                "provider '{}' has invalid base_url '{}': {e}",
                self.name, self.base_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::configuration(format!(
                "provider '{}' base_url must be http or https",
                self.name
            )));
        }

        if self.timeout_secs == 0 {
            return Err(Error::configuration(format!(
                "provider '{}' timeout_secs cannot be 0",
                self.name
            )));
        }

        if self.rate_limit_per_second == Some(0) {
            return Err(Error::configuration(format!(
                "provider '{}' rate_limit_per_second cannot be 0",
                self.name
            )));
        }

        if let Some(proxy) = &self.proxy {
            reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                Error::configuration(format!(
                    "provider '{}' has invalid proxy: {e}",
                    self.name
                ))
            })?;
        }

        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .field("user_agent", &self.user_agent)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_count", &self.retry_count)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("rate_limit_per_second", &self.rate_limit_per_second)
            .field("proxy", &self.proxy)
            .field("cookie", &self.cookie.as_ref().map(|_| REDACTED))
            .field("default_quality", &self.default_quality)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// TTL applied to match, search and info entries. 0 means "never".
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_cache_cleanup")]
    pub cleanup_interval_secs: u64,

    /// Evict the oldest entry once this many are stored.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_cleanup() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: default_cache_ttl(),
            cleanup_interval_secs: default_cache_cleanup(),
            max_entries: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LimiterAlgorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub algorithm: LimiterAlgorithm,

    /// Token bucket size.
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens added per second.
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64,

    #[serde(default = "default_window")]
    pub window_secs: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_limiter_cleanup")]
    pub cleanup_interval_secs: u64,

    /// Idle time after which a full bucket is dropped.
    #[serde(default = "default_idle")]
    pub idle_secs: u64,
}

fn default_capacity() -> u32 {
    60
}
fn default_refill_rate() -> f64 {
    1.0
}
fn default_window() -> u64 {
    60
}
fn default_max_requests() -> u32 {
    60
}
fn default_limiter_cleanup() -> u64 {
    600
}
fn default_idle() -> u64 {
    3600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: LimiterAlgorithm::default(),
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
            window_secs: default_window(),
            max_requests: default_max_requests(),
            cleanup_interval_secs: default_limiter_cleanup(),
            idle_secs: default_idle(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Fall back to generic seed keywords when the id search finds nothing.
    #[serde(default)]
    pub keyword_fallback: bool,

    #[serde(default)]
    pub seed_keywords: Vec<String>,

    /// Upper bound on seed keywords tried per resolution.
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,

    #[serde(default = "default_resolver_limit")]
    pub search_limit: usize,
}

fn default_max_keywords() -> usize {
    3
}
fn default_resolver_limit() -> usize {
    10
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keyword_fallback: false,
            seed_keywords: Vec::new(),
            max_keywords: default_max_keywords(),
            search_limit: default_resolver_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Hits requested from each provider.
    #[serde(default = "default_search_limit")]
    pub limit: usize,

    /// Timeout applied by the CLI to each request.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_search_limit() -> usize {
    20
}
fn default_request_timeout() -> u64 {
    15
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_search_limit(),
            timeout_secs: default_request_timeout(),
        }
    }
}
