//! Metadata resolution for playable URLs that arrive without metadata.
//!
//! The [`MetadataResolver`] runs a chain of [`ResolveStrategy`] values in
//! order and stops at the first one that produces a [`MusicInfo`]. Results
//! are cached per `(provider, id)` for the lifetime of the resolver; entries
//! are never expired or invalidated.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use tunebridge_common::{MusicInfo, Result};

use crate::config::ResolverConfig;
use crate::context::RequestContext;
use crate::provider::Provider;

/// One way of finding metadata for a track id.
#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &'static str;

    /// `Ok(None)` means this strategy has nothing; the chain moves on.
    async fn resolve(
        &self,
        ctx: &RequestContext,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<MusicInfo>>;
}

/// Search with the id itself as keyword and keep the exact-id hit.
pub struct IdSearch {
    limit: usize,
}

impl IdSearch {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl ResolveStrategy for IdSearch {
    fn name(&self) -> &'static str {
        "id_search"
    }

    async fn resolve(
        &self,
        ctx: &RequestContext,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<MusicInfo>> {
        let hits = provider.search(ctx, id, self.limit).await?;
        Ok(hits.iter().find(|hit| hit.id == id).map(MusicInfo::from))
    }
}

/// Search generic seed keywords and accept the first hit.
///
/// The hit is an approximation, not a match for the requested track. The
/// returned info carries the requested id.
pub struct KeywordFallback {
    keywords: Vec<String>,
    limit: usize,
}

impl KeywordFallback {
    /// Keep at most `max_keywords` of `keywords`.
    pub fn new(keywords: &[String], max_keywords: usize, limit: usize) -> Self {
        Self {
            keywords: keywords
                .iter()
                .filter(|k| !k.trim().is_empty())
                .take(max_keywords)
                .cloned()
                .collect(),
            limit,
        }
    }
}

#[async_trait]
impl ResolveStrategy for KeywordFallback {
    fn name(&self) -> &'static str {
        "keyword_fallback"
    }

    async fn resolve(
        &self,
        ctx: &RequestContext,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<MusicInfo>> {
        for keyword in &self.keywords {
            match provider.search(ctx, keyword, self.limit).await {
                Ok(hits) => {
                    if let Some(hit) = hits.first() {
                        let mut info = MusicInfo::from(hit);
                        info.id = id.to_string();
                        return Ok(Some(info));
                    }
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => debug!(keyword = %keyword, error = %e, "Seed keyword search failed"),
            }
        }
        Ok(None)
    }
}

/// Strategy chain with a process-lifetime cache.
pub struct MetadataResolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
    cache: DashMap<String, MusicInfo>,
}

impl MetadataResolver {
    pub fn new(strategies: Vec<Box<dyn ResolveStrategy>>) -> Self {
        Self {
            strategies,
            cache: DashMap::new(),
        }
    }

    /// Build the chain described by `config`, or `None` when disabled.
    pub fn from_config(config: &ResolverConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let mut strategies: Vec<Box<dyn ResolveStrategy>> =
            vec![Box::new(IdSearch::new(config.search_limit))];
        if config.keyword_fallback {
            strategies.push(Box::new(KeywordFallback::new(
                &config.seed_keywords,
                config.max_keywords,
                config.search_limit,
            )));
        }
        Some(Self::new(strategies))
    }

    /// Run the chain for `id` on `provider`.
    ///
    /// Strategy failures are logged and skipped; only cancellation of `ctx`
    /// is returned as an error.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<MusicInfo>> {
        let key = cache_key(provider.name(), id);
        if let Some(info) = self.cache.get(&key) {
            return Ok(Some(info.clone()));
        }

        for strategy in &self.strategies {
            match strategy.resolve(ctx, provider, id).await {
                Ok(Some(info)) => {
                    debug!(
                        provider = %provider.name(),
                        strategy = strategy.name(),
                        id,
                        "Metadata resolved"
                    );
                    self.cache.insert(key, info.clone());
                    return Ok(Some(info));
                }
                Ok(None) => {}
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => debug!(
                    provider = %provider.name(),
                    strategy = strategy.name(),
                    error = %e,
                    "Metadata strategy failed"
                ),
            }
        }
        Ok(None)
    }

    /// Number of cached entries.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

fn cache_key(provider: &str, id: &str) -> String {
    format!("{provider}:{id}")
}
