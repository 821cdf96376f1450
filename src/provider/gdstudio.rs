//! GDStudio-style provider.
//!
//! The upstream exposes one endpoint and selects the operation with the
//! `types` query parameter:
//!
//! | `types`  | extra params           | response                                   |
//! |----------|------------------------|--------------------------------------------|
//! | `search` | `name`, `count`, `pages` | `[{id, name, artist[], album, pic_id, ...}]` |
//! | `url`    | `id`, `br`             | `{url, br, size, from}`                    |
//! | `lyric`  | `id`                   | `{lyric, tlyric}`                          |
//! | `pic`    | `id`, `size`           | `{url}`                                    |
//!
//! There is no info endpoint; metadata is found by searching for the id and
//! keeping the exact-id match.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use tunebridge_common::{Error, Lyric, MusicInfo, MusicUrl, ProviderStats, Result, SearchResult};

use super::{non_empty, relevance, repair_text, Provider, ProviderCore, Scalar};
use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MUSIC_SOURCE: &str = "netease";
const COVER_SIZE: &str = "300";
const INFO_SEARCH_LIMIT: usize = 20;
const HEALTH_KEYWORD: &str = "hello";

// ---------------------------------------------------------------------------
// Wire types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GdSearchItem {
    id: Scalar,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artist: Vec<String>,
    #[serde(default)]
    album: String,
    #[serde(default)]
    pic_id: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct GdUrl {
    #[serde(default)]
    url: String,
    #[serde(default)]
    br: Option<Scalar>,
    #[serde(default)]
    size: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct GdLyric {
    #[serde(default)]
    lyric: String,
    #[serde(default)]
    tlyric: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GdPic {
    #[serde(default)]
    url: String,
}

// ---------------------------------------------------------------------------
// Provider implementation
// ---------------------------------------------------------------------------

pub struct GdStudioProvider {
    core: ProviderCore,
}

impl GdStudioProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            core: ProviderCore::new(config)?,
        })
    }

    /// Build the provider on top of an existing transport.
    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            core: ProviderCore::with_transport(config, transport)?,
        })
    }

    fn query(types: &str, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("types", types.to_string()),
            ("source", MUSIC_SOURCE.to_string()),
        ];
        query.extend(extra.iter().cloned());
        query
    }

    fn to_result(&self, keyword: &str, item: GdSearchItem) -> SearchResult {
        let name = repair_text(&item.name);
        let artist = item
            .artist
            .iter()
            .map(|a| repair_text(a))
            .collect::<Vec<_>>()
            .join(", ");
        let score = relevance(keyword, &name, &artist);

        let mut result = SearchResult::new(
            item.id.into_string(),
            name,
            artist,
            repair_text(&item.album),
            self.core.name(),
        );
        result.score = score;
        result.cover_id = item.pic_id.map(Scalar::into_string).filter(|p| !p.is_empty());
        result
    }

    async fn search_raw(
        &self,
        ctx: &RequestContext,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let query = Self::query(
            "search",
            &[
                ("name", keyword.to_string()),
                ("count", limit.to_string()),
                ("pages", "1".to_string()),
            ],
        );
        let items: Vec<GdSearchItem> = self.core.get_json(ctx, "", &query).await?;

        let mut results: Vec<SearchResult> = items
            .into_iter()
            .take(limit)
            .map(|item| self.to_result(keyword, item))
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }

    async fn cover_url(&self, ctx: &RequestContext, pic_id: &str) -> Result<Option<String>> {
        let query = Self::query(
            "pic",
            &[("id", pic_id.to_string()), ("size", COVER_SIZE.to_string())],
        );
        let pic: GdPic = self.core.get_json(ctx, "", &query).await?;
        Ok(non_empty(Some(pic.url)))
    }
}

#[async_trait]
impl Provider for GdStudioProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn config(&self) -> Arc<ProviderConfig> {
        self.core.config()
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.core.ensure_enabled()?;
        if keyword.trim().is_empty() {
            return Err(Error::validation("keyword cannot be empty"));
        }
        debug!(provider = %self.core.name(), keyword, "GDStudio search");
        self.core
            .track("search", self.search_raw(ctx, keyword, limit))
            .await
    }

    async fn get_music(
        &self,
        ctx: &RequestContext,
        id: &str,
        quality: Option<&str>,
    ) -> Result<MusicUrl> {
        self.core.ensure_enabled()?;
        let br = self.core.quality(quality);

        self.core
            .track("get_music", async {
                let query = Self::query("url", &[("id", id.to_string()), ("br", br.clone())]);
                let body: GdUrl = self.core.get_json(ctx, "", &query).await?;
                if body.url.trim().is_empty() {
                    return Err(Error::not_found(format!(
                        "{} has no URL for track {id}",
                        self.core.name()
                    )));
                }

                Ok(MusicUrl {
                    id: id.to_string(),
                    url: body.url,
                    quality: body.br.map(Scalar::into_string).unwrap_or(br),
                    size: body.size.as_ref().and_then(Scalar::as_u64),
                    source: self.core.name().to_string(),
                    info: None,
                })
            })
            .await
    }

    async fn get_music_info(&self, ctx: &RequestContext, id: &str) -> Result<MusicInfo> {
        self.core.ensure_enabled()?;

        self.core
            .track("get_music_info", async {
                let hit = self
                    .search_raw(ctx, id, INFO_SEARCH_LIMIT)
                    .await?
                    .into_iter()
                    .find(|hit| hit.id == id)
                    .ok_or_else(|| {
                        Error::not_found(format!("{} has no metadata for {id}", self.core.name()))
                    })?;

                let mut info = MusicInfo::from(&hit);
                if let Some(pic_id) = &hit.cover_id {
                    match self.cover_url(ctx, pic_id).await {
                        Ok(url) => info.cover_url = url,
                        Err(e) if e.is_cancellation() => return Err(e),
                        Err(e) => debug!(error = %e, "Cover lookup failed"),
                    }
                }
                Ok(info)
            })
            .await
    }

    async fn get_lyric(&self, ctx: &RequestContext, id: &str) -> Result<Lyric> {
        self.core.ensure_enabled()?;

        self.core
            .track("get_lyric", async {
                let query = Self::query("lyric", &[("id", id.to_string())]);
                let body: GdLyric = self.core.get_json(ctx, "", &query).await?;
                if body.lyric.trim().is_empty() {
                    return Err(Error::not_found(format!("no lyrics for track {id}")));
                }
                Ok(Lyric {
                    lyric: body.lyric,
                    translated: non_empty(body.tlyric),
                })
            })
            .await
    }

    async fn health_check(&self, ctx: &RequestContext) -> Result<()> {
        self.core.ensure_enabled()?;
        self.core
            .track("health_check", async {
                self.search_raw(ctx, HEALTH_KEYWORD, 1).await.map(|_| ())
            })
            .await
    }

    fn stats(&self) -> ProviderStats {
        self.core.stats()
    }

    fn update_config(&self, config: ProviderConfig) -> Result<()> {
        self.core.update_config(config)
    }
}
