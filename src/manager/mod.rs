//! Source manager: the orchestration core.
//!
//! The [`SourceManager`] owns the provider registry, the admission
//! controller, the response cache and the metadata resolver, and exposes the
//! operations the service layer calls:
//!
//! - [`SourceManager::match_music`] -- sequential, priority-ordered fallback;
//!   the first provider returning a URL wins.
//! - [`SourceManager::search_music`] -- concurrent fan-out to every eligible
//!   provider, merged by [`dedup_and_rank`].
//! - [`SourceManager::get_music_info`], [`SourceManager::get_lyric`] --
//!   single-provider lookups, cached.
//! - [`SourceManager::get_sources_status`] -- concurrent health checks.
//! - [`SourceManager::refresh_sources`] -- recompute dispatch order and drop
//!   stale cached answers.

pub mod dedup;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use tunebridge_common::{
    Error, Lyric, MatchResult, MusicInfo, Result, SearchResult, SourceStatus,
};

use crate::cache::{spawn_cache_sweeper, CacheStats, TtlCache};
use crate::config::{Config, ProviderConfig};
use crate::context::RequestContext;
use crate::provider::{build_provider, Provider};
use crate::ratelimit::{build_limiter, spawn_limiter_sweeper, Limiter};
use crate::resolver::MetadataResolver;

pub use dedup::dedup_and_rank;

const MATCH_PREFIX: &str = "match:";
const SEARCH_PREFIX: &str = "search:";
const INFO_PREFIX: &str = "info:";
const LYRIC_PREFIX: &str = "lyric:";

const DEFAULT_SEARCH_LIMIT: usize = 20;
const DEFAULT_CACHE_SWEEP: Duration = Duration::from_secs(300);
const DEFAULT_LIMITER_SWEEP: Duration = Duration::from_secs(600);

/// Values stored in the manager's response cache.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Match(MatchResult),
    Search(Arc<Vec<SearchResult>>),
    Info(MusicInfo),
    Lyric(Lyric),
}

/// A provider that failed to produce a URL during one match.
struct Tried {
    provider: Arc<dyn Provider>,
    /// Answered with a miss rather than an error; may be asked for metadata.
    reachable: bool,
}

impl Tried {
    fn miss(provider: &Arc<dyn Provider>) -> Self {
        Self {
            provider: Arc::clone(provider),
            reachable: true,
        }
    }
}

#[derive(Default)]
struct Registry {
    /// Registration order.
    providers: Vec<Arc<dyn Provider>>,
    /// Dispatch order: ascending priority, ties in registration order.
    ordered: Vec<Arc<dyn Provider>>,
}

impl Registry {
    fn reorder(&mut self) {
        let mut ordered = self.providers.clone();
        // Stable sort keeps registration order between equal priorities.
        ordered.sort_by_key(|p| p.priority());
        self.ordered = ordered;
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }
}

/// Orchestrates match, search and lookup requests across providers.
pub struct SourceManager {
    registry: RwLock<Registry>,
    limiter: Option<Arc<dyn Limiter>>,
    cache: Option<Arc<TtlCache<CacheValue>>>,
    resolver: Option<MetadataResolver>,
    search_limit: usize,
    cache_sweep: Duration,
    limiter_sweep: Duration,
}

impl SourceManager {
    /// An empty manager with no admission control, cache or resolver.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            limiter: None,
            cache: None,
            resolver: None,
            search_limit: DEFAULT_SEARCH_LIMIT,
            cache_sweep: DEFAULT_CACHE_SWEEP,
            limiter_sweep: DEFAULT_LIMITER_SWEEP,
        }
    }

    /// Build a manager and every configured provider.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut manager = Self::new()
            .with_search_limit(config.search.limit)
            .with_sweep_intervals(
                Duration::from_secs(config.cache.cleanup_interval_secs),
                Duration::from_secs(config.rate_limit.cleanup_interval_secs),
            );

        if let Some(limiter) = build_limiter(&config.rate_limit)? {
            manager = manager.with_limiter(limiter);
        }
        if config.cache.enabled {
            manager = manager.with_cache(Arc::new(TtlCache::from_config(&config.cache)));
        }
        if let Some(resolver) = MetadataResolver::from_config(&config.resolver) {
            manager = manager.with_resolver(resolver);
        }

        for provider_config in &config.providers {
            manager.register(build_provider(provider_config.clone())?)?;
        }

        info!(
            providers = manager.provider_names().len(),
            cache = manager.cache.is_some(),
            rate_limit = manager.limiter.is_some(),
            resolver = manager.resolver.is_some(),
            "Source manager ready"
        );
        Ok(manager)
    }

    /// Builder: gate every request through `limiter`.
    pub fn with_limiter(mut self, limiter: Arc<dyn Limiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Builder: memoize answers in `cache`.
    pub fn with_cache(mut self, cache: Arc<TtlCache<CacheValue>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Builder: fill in metadata missing from match results.
    pub fn with_resolver(mut self, resolver: MetadataResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Builder: hits requested from each provider during search.
    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    /// Builder: background sweep intervals for the cache and the limiter.
    pub fn with_sweep_intervals(mut self, cache: Duration, limiter: Duration) -> Self {
        self.cache_sweep = cache;
        self.limiter_sweep = limiter;
        self
    }

    /// Start the cache and limiter sweepers. They stop when `cancel` fires
    /// or the manager is dropped.
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(cache) = &self.cache {
            if !self.cache_sweep.is_zero() {
                handles.push(spawn_cache_sweeper(cache, self.cache_sweep, cancel.child_token()));
            }
        }
        if let Some(limiter) = &self.limiter {
            if !self.limiter_sweep.is_zero() {
                handles.push(spawn_limiter_sweeper(
                    limiter,
                    self.limiter_sweep,
                    cancel.child_token(),
                ));
            }
        }
        handles
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Add a provider. Names must be unique.
    pub fn register(&self, provider: Arc<dyn Provider>) -> Result<()> {
        let mut registry = self.registry.write();
        if registry.get(provider.name()).is_some() {
            return Err(Error::configuration(format!(
                "provider '{}' is already registered",
                provider.name()
            )));
        }
        info!(
            provider = %provider.name(),
            priority = provider.priority(),
            enabled = provider.is_enabled(),
            "Registered provider"
        );
        registry.providers.push(provider);
        registry.reorder();
        Ok(())
    }

    /// Remove a provider and every cached answer that may mention it.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Provider>> {
        let removed = {
            let mut registry = self.registry.write();
            let idx = registry.providers.iter().position(|p| p.name() == name)?;
            let removed = registry.providers.remove(idx);
            registry.reorder();
            removed
        };

        if let Some(cache) = &self.cache {
            cache.delete_prefix(&format!("{INFO_PREFIX}{name}:"));
            cache.delete_prefix(&format!("{LYRIC_PREFIX}{name}:"));
        }
        self.drop_dispatch_cache();
        info!(provider = %name, "Unregistered provider");
        Some(removed)
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.registry.read().get(name)
    }

    /// Registered provider names, in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.registry
            .read()
            .providers
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Swap a provider's config and recompute dispatch order.
    pub fn update_provider_config(&self, name: &str, config: ProviderConfig) -> Result<()> {
        let provider = self
            .provider(name)
            .ok_or_else(|| Error::configuration(format!("unknown provider '{name}'")))?;
        provider.update_config(config)?;
        self.registry.write().reorder();
        self.drop_dispatch_cache();
        Ok(())
    }

    /// Re-read every provider's config snapshot, recompute dispatch order
    /// and drop cached match and search answers.
    pub fn refresh_sources(&self) -> Result<()> {
        let count = {
            let mut registry = self.registry.write();
            for provider in &registry.providers {
                provider.config().validate()?;
            }
            registry.reorder();
            registry.providers.len()
        };
        let dropped = self.drop_dispatch_cache();
        info!(providers = count, dropped, "Sources refreshed");
        Ok(())
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    fn drop_dispatch_cache(&self) -> usize {
        match &self.cache {
            Some(cache) => cache.delete_prefix(MATCH_PREFIX) + cache.delete_prefix(SEARCH_PREFIX),
            None => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    fn admit(&self, ctx: &RequestContext) -> Result<()> {
        if let Some(limiter) = &self.limiter {
            let key = ctx.admission_key();
            if !limiter.allow(key) {
                warn!(key, "Request rejected by admission control");
                return Err(Error::rate_limited(key));
            }
        }
        Ok(())
    }

    /// Providers eligible for a request, in dispatch order.
    ///
    /// An empty `sources` selects every registered provider; unknown names
    /// are logged and skipped.
    fn candidates(&self, sources: &[String]) -> Result<Vec<Arc<dyn Provider>>> {
        let registry = self.registry.read();
        if registry.providers.is_empty() {
            return Err(Error::configuration("no providers registered"));
        }
        if sources.is_empty() {
            return Ok(registry.ordered.clone());
        }

        for name in sources {
            if registry.get(name).is_none() {
                warn!(provider = %name, "Unknown provider requested");
            }
        }
        let selected: Vec<_> = registry
            .ordered
            .iter()
            .filter(|p| sources.iter().any(|s| s == p.name()))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(Error::configuration(format!(
                "none of the requested providers are registered: {}",
                sources.join(", ")
            )));
        }
        Ok(selected)
    }

    /// A registered, enabled provider.
    fn enabled_provider(&self, name: &str) -> Result<Arc<dyn Provider>> {
        let provider = self
            .provider(name)
            .ok_or_else(|| Error::configuration(format!("unknown provider '{name}'")))?;
        if !provider.is_enabled() {
            return Err(Error::configuration(format!("provider '{name}' is disabled")));
        }
        Ok(provider)
    }

    fn cache_get(&self, key: &str) -> Option<CacheValue> {
        self.cache.as_ref()?.get(key)
    }

    fn cache_put(&self, key: String, value: CacheValue) {
        if let Some(cache) = &self.cache {
            cache.set_default(key, value);
        }
    }

    // -----------------------------------------------------------------------
    // Match
    // -----------------------------------------------------------------------

    /// Resolve `id` to a playable URL.
    ///
    /// Providers are tried one at a time in dispatch order; the first one
    /// returning a non-empty URL wins and no further provider is called.
    /// When every provider fails the last error is wrapped in
    /// [`Error::AllProvidersExhausted`].
    pub async fn match_music(
        &self,
        ctx: &RequestContext,
        id: &str,
        sources: &[String],
        quality: Option<&str>,
    ) -> Result<MatchResult> {
        let span = info_span!("match_music", request_id = %ctx.request_id, id);
        async move {
            let id = id.trim();
            if id.is_empty() {
                return Err(Error::validation("id cannot be empty"));
            }
            ctx.check()?;
            self.admit(ctx)?;
            let providers = self.candidates(sources)?;

            let key = match_key(id, sources, quality);
            if let Some(CacheValue::Match(hit)) = self.cache_get(&key) {
                debug!("Match served from cache");
                return Ok(hit);
            }

            let mut last_error = None;
            let mut tried: Vec<Tried> = Vec::new();

            for provider in &providers {
                if !provider.is_enabled() {
                    debug!(provider = %provider.name(), "Skipping disabled provider");
                    last_error = Some(Error::configuration(format!(
                        "provider '{}' is disabled",
                        provider.name()
                    )));
                    continue;
                }

                match provider.get_music(ctx, id, quality).await {
                    Ok(url) if !url.url.trim().is_empty() => {
                        info!(provider = %provider.name(), quality = %url.quality, "Match found");
                        let mut result = MatchResult::from(url);
                        result.id = id.to_string();
                        result.source = provider.name().to_string();
                        if result.info.is_none() {
                            match self
                                .resolve_metadata(ctx, provider.as_ref(), &tried, id)
                                .await
                            {
                                Ok(info) => result.info = info,
                                // Not cached; a later call may fill in the metadata.
                                Err(e) => {
                                    warn!(error = %e, "Metadata lookup interrupted, returning match without it");
                                    return Ok(result);
                                }
                            }
                        }
                        self.cache_put(key, CacheValue::Match(result.clone()));
                        return Ok(result);
                    }
                    Ok(_) => {
                        warn!(provider = %provider.name(), "Provider returned an empty URL, trying next");
                        last_error = Some(Error::not_found(format!(
                            "{} returned no URL for {id}",
                            provider.name()
                        )));
                        tried.push(Tried::miss(provider));
                    }
                    Err(e) if e.is_cancellation() => return Err(e),
                    Err(e) => {
                        warn!(provider = %provider.name(), error = %e, "Provider failed, trying next");
                        tried.push(Tried {
                            provider: Arc::clone(provider),
                            reachable: matches!(e, Error::NotFound(_)),
                        });
                        last_error = Some(e);
                    }
                }
            }

            let last = last_error
                .unwrap_or_else(|| Error::not_found(format!("no provider could match {id}")));
            Err(Error::exhausted(providers.len(), last))
        }
        .instrument(span)
        .await
    }

    /// Metadata for a winning match that carried none.
    ///
    /// Tries the resolver on the winner, then info from the providers that
    /// already failed in this call, then the winner's own info. Providers
    /// that failed with anything other than a miss are only looked up in the
    /// cache. Finding nothing is not an error; an ended context is.
    async fn resolve_metadata(
        &self,
        ctx: &RequestContext,
        winner: &dyn Provider,
        tried: &[Tried],
        id: &str,
    ) -> Result<Option<MusicInfo>> {
        if let Some(resolver) = &self.resolver {
            if let Some(info) = resolver.resolve(ctx, winner, id).await? {
                return Ok(Some(info));
            }
        }

        for entry in tried {
            let provider = entry.provider.as_ref();
            if !entry.reachable {
                if let Some(info) = self.cached_only_info(provider, id) {
                    return Ok(Some(info));
                }
                continue;
            }
            match self.cached_info(ctx, provider, id).await {
                Ok(info) => return Ok(Some(info)),
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => debug!(provider = %provider.name(), error = %e, "No metadata"),
            }
        }
        match self.cached_info(ctx, winner, id).await {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => {
                debug!(provider = %winner.name(), error = %e, "No metadata");
                Ok(None)
            }
        }
    }

    fn cached_only_info(&self, provider: &dyn Provider, id: &str) -> Option<MusicInfo> {
        match self.cache_get(&info_key(provider, id)) {
            Some(CacheValue::Info(info)) => Some(info),
            _ => None,
        }
    }

    async fn cached_info(
        &self,
        ctx: &RequestContext,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<MusicInfo> {
        let key = info_key(provider, id);
        if let Some(CacheValue::Info(info)) = self.cache_get(&key) {
            return Ok(info);
        }
        let info = provider.get_music_info(ctx, id).await?;
        self.cache_put(key, CacheValue::Info(info.clone()));
        Ok(info)
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Search every enabled (or selected) provider concurrently.
    ///
    /// Individual provider failures are logged and ignored. If the context
    /// ends before every provider reports, whatever arrived is returned.
    pub async fn search_music(
        &self,
        ctx: &RequestContext,
        keyword: &str,
        sources: &[String],
    ) -> Result<Vec<SearchResult>> {
        let span = info_span!("search_music", request_id = %ctx.request_id, keyword);
        async move {
            let keyword = keyword.trim();
            if keyword.is_empty() {
                return Err(Error::validation("keyword cannot be empty"));
            }
            ctx.check()?;
            self.admit(ctx)?;

            let providers: Vec<_> = self
                .candidates(sources)?
                .into_iter()
                .filter(|p| p.is_enabled())
                .collect();
            if providers.is_empty() {
                return Err(Error::configuration("no enabled providers to search"));
            }

            let key = search_key(keyword, sources);
            if let Some(CacheValue::Search(hits)) = self.cache_get(&key) {
                debug!("Search served from cache");
                return Ok(hits.as_ref().clone());
            }

            let (results, complete) = self.fan_out(ctx, keyword, &providers).await?;
            if complete {
                self.cache_put(key, CacheValue::Search(Arc::new(results.clone())));
            }
            Ok(results)
        }
        .instrument(span)
        .await
    }

    /// Query `providers` concurrently and merge what they return.
    ///
    /// Returns the merged hits and whether every provider reported.
    async fn fan_out(
        &self,
        ctx: &RequestContext,
        keyword: &str,
        providers: &[Arc<dyn Provider>],
    ) -> Result<(Vec<SearchResult>, bool)> {
        let count = providers.len();
        let task_ctx = ctx.child();
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, Vec<SearchResult>)>(count);
        let (error_tx, mut error_rx) = mpsc::channel::<(usize, Error)>(count);

        let mut tasks = JoinSet::new();
        for (slot, provider) in providers.iter().enumerate() {
            let provider = Arc::clone(provider);
            let ctx = task_ctx.clone();
            let keyword = keyword.to_string();
            let limit = self.search_limit;
            let result_tx = result_tx.clone();
            let error_tx = error_tx.clone();

            tasks.spawn(
                async move {
                    match provider.search(&ctx, &keyword, limit).await {
                        Ok(hits) => {
                            let _ = result_tx.send((slot, hits)).await;
                        }
                        Err(e) => {
                            let _ = error_tx.send((slot, e)).await;
                        }
                    }
                }
                .in_current_span(),
            );
        }
        // Channels close once every task has reported, failed or panicked.
        drop(result_tx);
        drop(error_tx);

        let mut slots: Vec<Option<Vec<SearchResult>>> = vec![None; count];
        let mut last_error = None;
        let mut interrupted = None;
        let mut results_open = true;
        let mut errors_open = true;

        while results_open || errors_open {
            tokio::select! {
                err = ctx.done() => {
                    interrupted = Some(err);
                    break;
                }
                msg = result_rx.recv(), if results_open => match msg {
                    Some((slot, hits)) => {
                        debug!(provider = %providers[slot].name(), hits = hits.len(), "Provider answered");
                        slots[slot] = Some(hits);
                    }
                    None => results_open = false,
                },
                msg = error_rx.recv(), if errors_open => match msg {
                    Some((slot, e)) => {
                        warn!(provider = %providers[slot].name(), error = %e, "Provider search failed");
                        last_error = Some(e);
                    }
                    None => errors_open = false,
                },
            }
        }

        task_ctx.cancel();
        tasks.abort_all();

        let answered = slots.iter().filter(|s| s.is_some()).count();
        let complete = interrupted.is_none();
        match interrupted {
            Some(err) if answered == 0 => return Err(err),
            Some(_) => warn!(answered, total = count, "Search interrupted, returning partial results"),
            None if answered == 0 => {
                let last = last_error
                    .unwrap_or_else(|| Error::provider("every search task ended without a result"));
                return Err(Error::exhausted(count, last));
            }
            None => {}
        }

        let merged: Vec<SearchResult> = slots.into_iter().flatten().flatten().collect();
        Ok((dedup_and_rank(merged), complete))
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Metadata for `id` from one named provider.
    pub async fn get_music_info(
        &self,
        ctx: &RequestContext,
        source: &str,
        id: &str,
    ) -> Result<MusicInfo> {
        let span = info_span!("get_music_info", request_id = %ctx.request_id, source, id);
        async move {
            let id = id.trim();
            if id.is_empty() {
                return Err(Error::validation("id cannot be empty"));
            }
            ctx.check()?;
            self.admit(ctx)?;
            let provider = self.enabled_provider(source)?;
            self.cached_info(ctx, provider.as_ref(), id).await
        }
        .instrument(span)
        .await
    }

    /// Lyrics for `id` from one named provider.
    pub async fn get_lyric(&self, ctx: &RequestContext, source: &str, id: &str) -> Result<Lyric> {
        let span = info_span!("get_lyric", request_id = %ctx.request_id, source, id);
        async move {
            let id = id.trim();
            if id.is_empty() {
                return Err(Error::validation("id cannot be empty"));
            }
            ctx.check()?;
            self.admit(ctx)?;
            let provider = self.enabled_provider(source)?;

            let key = format!("{LYRIC_PREFIX}{source}:{id}");
            if let Some(CacheValue::Lyric(lyric)) = self.cache_get(&key) {
                return Ok(lyric);
            }
            let lyric = provider.get_lyric(ctx, id).await?;
            self.cache_put(key, CacheValue::Lyric(lyric.clone()));
            Ok(lyric)
        }
        .instrument(span)
        .await
    }

    /// Probe every registered provider concurrently.
    ///
    /// Statuses come back in dispatch order. Disabled providers are reported
    /// unavailable without a network call.
    pub async fn get_sources_status(&self, ctx: &RequestContext) -> Vec<SourceStatus> {
        let span = info_span!("get_sources_status", request_id = %ctx.request_id);
        let providers = self.registry.read().ordered.clone();

        let checks = providers.iter().map(|provider| async move {
            let started = Instant::now();
            let result = provider.health_check(ctx).await;
            let elapsed = started.elapsed();
            let stats = provider.stats();

            SourceStatus {
                name: provider.name().to_string(),
                enabled: provider.is_enabled(),
                available: result.is_ok(),
                priority: provider.priority(),
                last_check: Utc::now(),
                response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                error_count: stats.error_count,
                last_error: result.err().map(|e| e.to_string()).or(stats.last_error),
            }
        });

        join_all(checks).instrument(span).await
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}

fn sources_fragment(sources: &[String]) -> String {
    let mut sorted: Vec<&str> = sources.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}

fn match_key(id: &str, sources: &[String], quality: Option<&str>) -> String {
    format!(
        "{MATCH_PREFIX}{}:{}:{id}",
        sources_fragment(sources),
        quality.unwrap_or_default()
    )
}

fn search_key(keyword: &str, sources: &[String]) -> String {
    format!("{SEARCH_PREFIX}{}:{keyword}", sources_fragment(sources))
}

fn info_key(provider: &dyn Provider, id: &str) -> String {
    format!("{INFO_PREFIX}{}:{id}", provider.name())
}
