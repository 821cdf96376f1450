//! Track and status types exchanged between providers, the source manager
//! and callers.
//!
//! Everything here is plain data: values are produced once by a provider and
//! never mutated afterwards. Code that needs an adjusted copy (for example a
//! rescored search hit) builds a new value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// A single hit returned from a provider keyword search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Provider-specific track identifier.
    pub id: String,
    /// Track title.
    pub name: String,
    /// Artist names joined for display.
    pub artist: String,
    /// Album title, empty when unknown.
    pub album: String,
    /// Duration in seconds, if the provider reports one.
    pub duration: Option<u32>,
    /// Name of the provider that produced this hit.
    pub source: String,
    /// Relevance of this hit to the query (0.0 - 1.0).
    pub score: f64,
    /// Provider-specific cover identifier, resolved later into a URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_id: Option<String>,
}

impl SearchResult {
    /// Create a hit with a zero score and no duration or cover.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            artist: artist.into(),
            album: album.into(),
            duration: None,
            source: source.into(),
            score: 0.0,
            cover_id: None,
        }
    }

    /// Return a copy carrying a different score.
    pub fn with_score(&self, score: f64) -> Self {
        Self {
            score,
            ..self.clone()
        }
    }

    /// Key used to collapse duplicates across providers.
    ///
    /// Exact, case-sensitive comparison of title, artist and album.
    pub fn dedup_key(&self) -> (&str, &str, &str) {
        (&self.name, &self.artist, &self.album)
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Descriptive metadata for one track.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MusicInfo {
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    /// Duration in seconds.
    pub duration: Option<u32>,
    /// Fully-qualified URL of the cover art.
    pub cover_url: Option<String>,
}

impl From<&SearchResult> for MusicInfo {
    fn from(hit: &SearchResult) -> Self {
        Self {
            id: hit.id.clone(),
            name: hit.name.clone(),
            artist: hit.artist.clone(),
            album: hit.album.clone(),
            duration: hit.duration,
            cover_url: None,
        }
    }
}

/// Lyrics for a track, with an optional translation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Lyric {
    /// Original lyrics, usually LRC formatted.
    pub lyric: String,
    /// Translated lyrics, when the upstream provides them.
    pub translated: Option<String>,
}

// ---------------------------------------------------------------------------
// Playable URLs
// ---------------------------------------------------------------------------

/// A playable URL returned by a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicUrl {
    pub id: String,
    pub url: String,
    /// Quality actually served (bitrate in kbps or a provider label).
    pub quality: String,
    /// File size in bytes, if known.
    pub size: Option<u64>,
    pub source: String,
    /// Metadata embedded in the upstream response, if any.
    pub info: Option<MusicInfo>,
}

/// Outcome of a successful match-by-id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: String,
    pub url: String,
    pub quality: String,
    pub size: Option<u64>,
    /// Provider that produced the URL.
    pub source: String,
    /// Track metadata; absent when no strategy could resolve it.
    pub info: Option<MusicInfo>,
}

impl From<MusicUrl> for MatchResult {
    fn from(url: MusicUrl) -> Self {
        Self {
            id: url.id,
            url: url.url,
            quality: url.quality,
            size: url.size,
            source: url.source,
            info: url.info,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Counters kept by each provider for observability.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    pub success_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
}

/// Health snapshot of one provider, derived on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    /// Whether the last health check succeeded.
    pub available: bool,
    pub priority: i32,
    pub last_check: DateTime<Utc>,
    /// Health check round-trip time in milliseconds.
    pub response_time_ms: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}
