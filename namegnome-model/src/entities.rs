use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Metadata provider identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Tvdb,
    Tmdb,
    Musicbrainz,
    Omdb,
    Tvmaze,
    Fanarttv,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Tvdb => "tvdb",
            ProviderKind::Tmdb => "tmdb",
            ProviderKind::Musicbrainz => "musicbrainz",
            ProviderKind::Omdb => "omdb",
            ProviderKind::Tvmaze => "tvmaze",
            ProviderKind::Fanarttv => "fanarttv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tvdb" => Some(ProviderKind::Tvdb),
            "tmdb" => Some(ProviderKind::Tmdb),
            "musicbrainz" => Some(ProviderKind::Musicbrainz),
            "omdb" => Some(ProviderKind::Omdb),
            "tvmaze" => Some(ProviderKind::Tvmaze),
            "fanarttv" => Some(ProviderKind::Fanarttv),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an external id refers to inside a provider's catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Series,
    Movie,
    Artist,
    Album,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Series => "series",
            EntityKind::Movie => "movie",
            EntityKind::Artist => "artist",
            EntityKind::Album => "album",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "series" => Some(EntityKind::Series),
            "movie" => Some(EntityKind::Movie),
            "artist" => Some(EntityKind::Artist),
            "album" => Some(EntityKind::Album),
            _ => None,
        }
    }
}

/// `(provider, kind, ext_id)` — the unique key of a provider entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderRef {
    pub provider: ProviderKind,
    pub kind: EntityKind,
    pub ext_id: String,
}

impl ProviderRef {
    pub fn new(provider: ProviderKind, kind: EntityKind, ext_id: impl Into<String>) -> Self {
        Self {
            provider,
            kind,
            ext_id: ext_id.into(),
        }
    }
}

impl std::fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.kind.as_str(), self.ext_id)
    }
}

/// A search hit, light enough to show in a disambiguation prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub provider: ProviderKind,
    pub kind: EntityKind,
    pub ext_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// Canonical provider record, cached with a soft TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntity {
    pub provider: ProviderKind,
    pub kind: EntityKind,
    pub ext_id: String,
    /// Raw provider title.
    pub title: String,
    /// NFC-normalized, lowercase, punctuation-stripped.
    pub title_norm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub metadata: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl ProviderEntity {
    pub fn entity_ref(&self) -> ProviderRef {
        ProviderRef::new(self.provider, self.kind, self.ext_id.clone())
    }
}

/// Canonical episode keyed `(provider, series_id, season, episode)`.
///
/// Episode numbers are unique within a season but need not be contiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub provider: ProviderKind,
    pub series_id: String,
    pub season: u32,
    pub episode: u32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_date: Option<NaiveDate>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Canonical track keyed `(provider, album_id, disc, track)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub provider: ProviderKind,
    pub album_id: String,
    pub disc: u32,
    pub track: u32,
    pub title: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Children of an entity: a series lists episodes, an album lists tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Children {
    Episodes(Vec<EpisodeRecord>),
    Tracks(Vec<TrackRecord>),
}

impl Children {
    pub fn is_empty(&self) -> bool {
        match self {
            Children::Episodes(eps) => eps.is_empty(),
            Children::Tracks(tracks) => tracks.is_empty(),
        }
    }
}
