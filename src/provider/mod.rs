//! Upstream music-data providers.
//!
//! This module defines the [`Provider`] trait and the state every concrete
//! adapter shares. Two adapters are available:
//!
//! - [`gdstudio`] -- single-endpoint `types=search|url|lyric|pic` API.
//! - [`unm`] -- REST API wrapping every payload in a `{code, message, data}`
//!   envelope.
//!
//! Adapters are built from configuration by [`build_provider`], keyed on the
//! declared [`ProviderKind`].

pub mod gdstudio;
pub mod unm;

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tunebridge_common::{Error, Lyric, MusicInfo, MusicUrl, ProviderStats, Result, SearchResult};

use crate::config::{ProviderConfig, ProviderKind};
use crate::context::RequestContext;
use crate::transport::{self, build_transport, Transport};

pub use gdstudio::GdStudioProvider;
pub use unm::UnmProvider;

/// Quality requested when neither the caller nor the config names one.
pub const DEFAULT_QUALITY: &str = "320";

/// An adapter to one upstream music-data API.
///
/// Every operation fails with [`Error::Configuration`] without touching the
/// network when the provider is disabled.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique name the provider was registered under.
    fn name(&self) -> &str;

    /// Current configuration snapshot.
    fn config(&self) -> Arc<ProviderConfig>;

    fn is_enabled(&self) -> bool {
        self.config().enabled
    }

    /// Lower values are tried first during match fallback.
    fn priority(&self) -> i32 {
        self.config().priority
    }

    /// Keyword search returning at most `limit` hits.
    async fn search(&self, ctx: &RequestContext, keyword: &str, limit: usize)
        -> Result<Vec<SearchResult>>;

    /// Resolve a playable URL. `quality` falls back to the configured default.
    async fn get_music(&self, ctx: &RequestContext, id: &str, quality: Option<&str>)
        -> Result<MusicUrl>;

    /// Best-effort metadata lookup.
    async fn get_music_info(&self, ctx: &RequestContext, id: &str) -> Result<MusicInfo>;

    async fn get_lyric(&self, ctx: &RequestContext, id: &str) -> Result<Lyric>;

    /// Lightweight liveness check.
    async fn health_check(&self, ctx: &RequestContext) -> Result<()>;

    /// Snapshot of the provider's request counters.
    fn stats(&self) -> ProviderStats;

    /// Validate `config` and swap it in atomically.
    fn update_config(&self, config: ProviderConfig) -> Result<()>;
}

/// Build the adapter matching `config.kind`.
pub fn build_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match config.kind {
        ProviderKind::Gdstudio => Arc::new(GdStudioProvider::new(config)?),
        ProviderKind::Unm => Arc::new(UnmProvider::new(config)?),
    };
    Ok(provider)
}

// ---------------------------------------------------------------------------
// Shared provider state
// ---------------------------------------------------------------------------

/// Everything derived from one config snapshot, swapped as a unit.
struct Snapshot {
    config: Arc<ProviderConfig>,
    transport: Arc<dyn Transport>,
    pacer: Option<Arc<DefaultDirectRateLimiter>>,
}

impl Snapshot {
    fn build(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let transport = build_transport(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    fn with_transport(config: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        let pacer = config
            .rate_limit_per_second
            .and_then(NonZeroU32::new)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));
        Self {
            config: Arc::new(config),
            transport,
            pacer,
        }
    }
}

/// State shared by the concrete adapters: the swappable config and
/// transport, optional upstream pacing, and request counters.
pub struct ProviderCore {
    name: String,
    snapshot: RwLock<Arc<Snapshot>>,
    stats: Mutex<ProviderStats>,
}

impl ProviderCore {
    /// Validate `config` and build its transport stack.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let name = config.name.clone();
        let snapshot = Snapshot::build(config)?;
        Ok(Self {
            name,
            snapshot: RwLock::new(Arc::new(snapshot)),
            stats: Mutex::new(ProviderStats::default()),
        })
    }

    /// Use a caller-supplied transport instead of building one.
    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let name = config.name.clone();
        Ok(Self {
            name,
            snapshot: RwLock::new(Arc::new(Snapshot::with_transport(config, transport))),
            stats: Mutex::new(ProviderStats::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<ProviderConfig> {
        Arc::clone(&self.snapshot.read().config)
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Fail fast when the provider is disabled.
    pub fn ensure_enabled(&self) -> Result<()> {
        if self.config().enabled {
            Ok(())
        } else {
            Err(Error::configuration(format!(
                "provider '{}' is disabled",
                self.name
            )))
        }
    }

    /// Quality to request: the caller's, else the configured default.
    pub fn quality(&self, requested: Option<&str>) -> String {
        requested
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .or_else(|| self.config().default_quality.clone())
            .unwrap_or_else(|| DEFAULT_QUALITY.to_string())
    }

    /// Absolute URL for `path` under the configured base URL.
    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.config().base_url, path)
    }

    /// Paced GET of `path`, decoded as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let snapshot = self.current();
        if let Some(pacer) = &snapshot.pacer {
            ctx.run(async {
                pacer.until_ready().await;
                Ok(())
            })
            .await?;
        }
        let url = join_url(&snapshot.config.base_url, path);
        transport::get_json(snapshot.transport.as_ref(), ctx, &url, query).await
    }

    /// Run one provider operation and record its outcome in the counters.
    pub async fn track<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.stats.lock().last_request_at = Some(Utc::now());
        let result = fut.await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => {
                tracing::debug!(provider = %self.name, op, error = %e, "Provider call failed");
                self.record_error(e);
            }
        }
        result
    }

    pub fn record_success(&self) {
        self.stats.lock().success_count += 1;
    }

    pub fn record_error(&self, error: &Error) {
        let mut stats = self.stats.lock();
        stats.error_count += 1;
        stats.last_error = Some(error.to_string());
        stats.last_error_at = Some(Utc::now());
    }

    pub fn stats(&self) -> ProviderStats {
        self.stats.lock().clone()
    }

    /// Swap in a new config after validating it. The provider name is fixed.
    pub fn update_config(&self, config: ProviderConfig) -> Result<()> {
        if config.name != self.name {
            return Err(Error::configuration(format!(
                "cannot rename provider '{}' to '{}'",
                self.name, config.name
            )));
        }
        let current = self.current();
        if config.kind != current.config.kind {
            return Err(Error::configuration(format!(
                "cannot change kind of provider '{}' from {} to {}",
                self.name, current.config.kind, config.kind
            )));
        }

        let snapshot = Snapshot::build(config)?;
        *self.snapshot.write() = Arc::new(snapshot);
        tracing::info!(provider = %self.name, "Provider configuration updated");
        Ok(())
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{}", path.trim_start_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// Text and wire helpers
// ---------------------------------------------------------------------------

/// Undo UTF-8 text that was decoded as Latin-1 upstream.
///
/// A string made only of code points <= U+00FF that contains non-ASCII
/// characters is reinterpreted as raw bytes; if those bytes form valid UTF-8
/// the decoded text is returned. Anything else is returned unchanged.
pub fn repair_text(text: &str) -> String {
    if text.is_ascii() || text.chars().any(|c| c as u32 > 0xFF) {
        return text.to_string();
    }
    let bytes: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
    match String::from_utf8(bytes) {
        Ok(repaired) => repaired,
        Err(_) => text.to_string(),
    }
}

/// Relevance of a hit to the search keyword (0.0 - 1.0).
pub fn relevance(keyword: &str, name: &str, artist: &str) -> f64 {
    let keyword = keyword.trim();
    let folded = keyword.to_lowercase();
    let name_folded = name.to_lowercase();

    // Title scoring
    let base = if name == keyword {
        0.7
    } else if name_folded == folded {
        0.6
    } else if !name_folded.is_empty()
        && (name_folded.contains(&folded) || folded.contains(&name_folded))
    {
        0.4
    } else {
        0.1
    };

    // Artist scoring
    let artist_folded = artist.to_lowercase();
    let artist_bonus = if !artist_folded.is_empty() && folded.contains(&artist_folded) {
        0.3
    } else if !artist_folded.is_empty() && artist_folded.contains(&folded) {
        0.2
    } else {
        0.0
    };

    f64::min(base + artist_bonus, 1.0)
}

/// A JSON scalar upstreams use interchangeably for ids, bitrates and sizes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub(crate) fn into_string(self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s,
        }
    }

    pub(crate) fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(i) => u64::try_from(*i).ok(),
            Self::Float(f) if *f >= 0.0 => Some(*f as u64),
            Self::Float(_) => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Treat blank strings from the upstream as absent.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
