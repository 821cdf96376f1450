//! UNM-style provider.
//!
//! REST endpoints, each answering with a `{code, message, data, timestamp}`
//! envelope where `code == 200` means success:
//!
//! - `GET /search?name=&limit=`
//! - `GET /ncmget?id=&quality=`
//! - `GET /info?id=`
//! - `GET /lyric?id=`
//! - `GET /picture?id=`

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use tunebridge_common::{Error, Lyric, MusicInfo, MusicUrl, ProviderStats, Result, SearchResult};

use super::{non_empty, relevance, repair_text, Provider, ProviderCore, Scalar};
use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::transport::Transport;

const CODE_OK: i64 = 200;
const CODE_NOT_FOUND: i64 = 404;
const HEALTH_KEYWORD: &str = "hello";

// ---------------------------------------------------------------------------
// Wire types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UnmSong {
    id: Scalar,
    #[serde(default)]
    name: String,
    #[serde(default, alias = "artist")]
    artists: Vec<String>,
    #[serde(default)]
    album: String,
    /// Seconds.
    #[serde(default)]
    duration: Option<u32>,
    #[serde(default)]
    pic_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnmUrl {
    #[serde(default)]
    url: String,
    #[serde(default, alias = "br")]
    quality: Option<Scalar>,
    #[serde(default)]
    size: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct UnmLyric {
    #[serde(default)]
    lyric: String,
    #[serde(default)]
    tlyric: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnmPicture {
    #[serde(default)]
    url: String,
}

impl UnmSong {
    fn artist(&self) -> String {
        self.artists
            .iter()
            .map(|a| repair_text(a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn into_info(self) -> MusicInfo {
        let artist = self.artist();
        MusicInfo {
            id: self.id.into_string(),
            name: repair_text(&self.name),
            artist,
            album: repair_text(&self.album),
            duration: self.duration,
            cover_url: non_empty(self.pic_url),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider implementation
// ---------------------------------------------------------------------------

pub struct UnmProvider {
    core: ProviderCore,
}

impl UnmProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            core: ProviderCore::new(config)?,
        })
    }

    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            core: ProviderCore::with_transport(config, transport)?,
        })
    }

    /// GET `path` and unwrap the envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let envelope: Envelope<T> = self.core.get_json(ctx, path, query).await?;
        match envelope.code {
            CODE_OK => envelope.data.ok_or_else(|| {
                Error::not_found(format!("{} returned no data for {path}", self.core.name()))
            }),
            CODE_NOT_FOUND => Err(Error::not_found(envelope.message)),
            code => Err(Error::provider(format!(
                "{} returned code {code}: {}",
                self.core.name(),
                envelope.message
            ))),
        }
    }

    async fn search_raw(
        &self,
        ctx: &RequestContext,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let songs: Vec<UnmSong> = self
            .call(
                ctx,
                "search",
                &[("name", keyword.to_string()), ("limit", limit.to_string())],
            )
            .await?;

        let mut results: Vec<SearchResult> = songs
            .into_iter()
            .take(limit)
            .map(|song| {
                let artist = song.artist();
                let name = repair_text(&song.name);
                let mut result = SearchResult::new(
                    song.id.into_string(),
                    name,
                    artist,
                    repair_text(&song.album),
                    self.core.name(),
                );
                result.duration = song.duration;
                result.score = relevance(keyword, &result.name, &result.artist);
                result
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }
}

#[async_trait]
impl Provider for UnmProvider {
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
        debug!(provider = %self.core.name(), keyword, "UNM search");
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
        let quality = self.core.quality(quality);

        self.core
            .track("get_music", async {
                let body: UnmUrl = self
                    .call(
                        ctx,
                        "ncmget",
                        &[("id", id.to_string()), ("quality", quality.clone())],
                    )
                    .await?;
                if body.url.trim().is_empty() {
                    return Err(Error::not_found(format!(
                        "{} has no URL for track {id}",
                        self.core.name()
                    )));
                }

                Ok(MusicUrl {
                    id: id.to_string(),
                    url: body.url,
                    quality: body.quality.map(Scalar::into_string).unwrap_or(quality),
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
                let song: UnmSong = self.call(ctx, "info", &[("id", id.to_string())]).await?;
                let mut info = song.into_info();

                if info.cover_url.is_none() {
                    match self
                        .call::<UnmPicture>(ctx, "picture", &[("id", id.to_string())])
                        .await
                    {
                        Ok(picture) => info.cover_url = non_empty(Some(picture.url)),
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
                let body: UnmLyric = self.call(ctx, "lyric", &[("id", id.to_string())]).await?;
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
