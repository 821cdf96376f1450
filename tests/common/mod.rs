//! Shared helpers for integration tests.
//!
//! Provides [`StubProvider`], a scriptable in-process [`Provider`], and
//! config constructors pointing real providers at a `wiremock` server.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use tunebridge::config::{ProviderConfig, ProviderKind};
use tunebridge::provider::Provider;
use tunebridge::RequestContext;
use tunebridge_common::{
    Error, Lyric, MusicInfo, MusicUrl, ProviderStats, Result, SearchResult,
};

/// How a [`StubProvider`] answers `search`.
#[derive(Clone)]
pub enum SearchBehavior {
    Hits(Vec<SearchResult>),
    Fail,
    Panic,
    /// Never completes; only cancellation ends the call.
    Hang,
}

/// A provider whose answers are fixed at construction time.
pub struct StubProvider {
    name: String,
    config: RwLock<Arc<ProviderConfig>>,
    url: Option<(String, String)>,
    info: Option<MusicInfo>,
    search: SearchBehavior,
    music_down: bool,
    info_hangs: bool,
    pub music_calls: AtomicUsize,
    pub info_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(name: &str, priority: i32) -> Self {
        let mut config = ProviderConfig::new(name, ProviderKind::Gdstudio, "http://stub.invalid");
        config.priority = priority;
        Self {
            name: name.to_string(),
            config: RwLock::new(Arc::new(config)),
            url: None,
            info: None,
            search: SearchBehavior::Hits(Vec::new()),
            music_down: false,
            info_hangs: false,
            music_calls: AtomicUsize::new(0),
            info_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
        }
    }

    pub fn disabled(self) -> Self {
        let mut config = (**self.config.read()).clone();
        config.enabled = false;
        *self.config.write() = Arc::new(config);
        self
    }

    /// Answer `get_music` with `url` at `quality`.
    pub fn with_url(mut self, url: &str, quality: &str) -> Self {
        self.url = Some((url.to_string(), quality.to_string()));
        self
    }

    pub fn with_info(mut self, info: MusicInfo) -> Self {
        self.info = Some(info);
        self
    }

    pub fn with_search(mut self, search: SearchBehavior) -> Self {
        self.search = search;
        self
    }

    /// Fail `get_music` with an upstream 503.
    pub fn music_down(mut self) -> Self {
        self.music_down = true;
        self
    }

    /// Make `get_music_info` block until the context ends.
    pub fn info_hangs(mut self) -> Self {
        self.info_hangs = true;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn music_calls(&self) -> usize {
        self.music_calls.load(Ordering::SeqCst)
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    fn check_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(Error::configuration(format!("provider '{}' is disabled", self.name)))
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> Arc<ProviderConfig> {
        Arc::clone(&self.config.read())
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        _keyword: &str,
        _limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.check_enabled()?;
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        match &self.search {
            SearchBehavior::Hits(hits) => Ok(hits.clone()),
            SearchBehavior::Fail => Err(Error::transient_status(503, "HTTP 503")),
            SearchBehavior::Panic => panic!("provider {} blew up", self.name),
            SearchBehavior::Hang => ctx.run(std::future::pending()).await,
        }
    }

    async fn get_music(
        &self,
        _ctx: &RequestContext,
        id: &str,
        _quality: Option<&str>,
    ) -> Result<MusicUrl> {
        self.check_enabled()?;
        self.music_calls.fetch_add(1, Ordering::SeqCst);
        if self.music_down {
            return Err(Error::transient_status(503, "HTTP 503"));
        }
        match &self.url {
            Some((url, quality)) => Ok(MusicUrl {
                id: id.to_string(),
                url: url.clone(),
                quality: quality.clone(),
                size: None,
                source: self.name.clone(),
                info: None,
            }),
            None => Err(Error::not_found(format!("{} has no URL for {id}", self.name))),
        }
    }

    async fn get_music_info(&self, ctx: &RequestContext, id: &str) -> Result<MusicInfo> {
        self.check_enabled()?;
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        if self.info_hangs {
            return ctx.run(std::future::pending()).await;
        }
        self.info
            .clone()
            .ok_or_else(|| Error::not_found(format!("{} has no info for {id}", self.name)))
    }

    async fn get_lyric(&self, _ctx: &RequestContext, id: &str) -> Result<Lyric> {
        self.check_enabled()?;
        Ok(Lyric {
            lyric: format!("[00:00.00]{id}"),
            translated: None,
        })
    }

    async fn health_check(&self, _ctx: &RequestContext) -> Result<()> {
        self.check_enabled()
    }

    fn stats(&self) -> ProviderStats {
        ProviderStats::default()
    }

    fn update_config(&self, config: ProviderConfig) -> Result<()> {
        config.validate()?;
        *self.config.write() = Arc::new(config);
        Ok(())
    }
}

/// A search hit with the given score.
pub fn hit(source: &str, name: &str, score: f64) -> SearchResult {
    SearchResult::new(format!("{source}-{name}"), name, "Artist", "Album", source).with_score(score)
}

pub fn info(id: &str, name: &str) -> MusicInfo {
    MusicInfo {
        id: id.to_string(),
        name: name.to_string(),
        artist: "Artist".to_string(),
        album: "Album".to_string(),
        duration: Some(200),
        cover_url: None,
    }
}

/// Owned source list from string literals.
pub fn sources(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// GDStudio provider config pointing at a mock server, with fast retries.
pub fn gdstudio_config(name: &str, server_uri: &str) -> ProviderConfig {
    let mut config = ProviderConfig::new(
        name,
        ProviderKind::Gdstudio,
        format!("{server_uri}/api.php"),
    );
    config.retry_delay_ms = 10;
    config
}

/// UNM provider config pointing at a mock server, with fast retries.
pub fn unm_config(name: &str, server_uri: &str) -> ProviderConfig {
    let mut config = ProviderConfig::new(name, ProviderKind::Unm, server_uri);
    config.retry_delay_ms = 10;
    config
}

/// A UNM `{code, message, data, timestamp}` envelope.
pub fn envelope(code: i64, data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "code": code,
        "message": if code == 200 { "success" } else { "error" },
        "data": data,
        "timestamp": 1_700_000_000_000i64,
    })
}
