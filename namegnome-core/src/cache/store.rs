use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use tracing::{debug, warn};

use namegnome_model::{
    Decision, EntityKind, EpisodeRecord, ProviderEntity, ProviderKind, ProviderRef, TrackRecord,
};

use crate::error::{CoreError, Result};

/// A cached value with its soft-TTL verdict. Stale rows are still returned;
/// the caller may refresh in the background.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub stale: bool,
}

/// Advisory lock row, surfaced when an apply hits a held root.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRow {
    pub name: String,
    pub owner: String,
    pub pid: Option<i64>,
    pub acquired_at: DateTime<Utc>,
}

/// Handle over the SQLite cache database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    /// Open (creating if missing) and migrate the cache database.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. Single connection: every connection of an
    /// in-memory SQLite database is its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ----- entities -----

    pub async fn put_entity(&self, entity: &ProviderEntity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (provider, kind, ext_id, title, title_norm, year, metadata, fetched_at, ttl_seconds)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (provider, kind, ext_id) DO UPDATE SET
                title = excluded.title,
                title_norm = excluded.title_norm,
                year = excluded.year,
                metadata = excluded.metadata,
                fetched_at = excluded.fetched_at,
                ttl_seconds = excluded.ttl_seconds
            "#,
        )
        .bind(entity.provider.as_str())
        .bind(entity.kind.as_str())
        .bind(&entity.ext_id)
        .bind(&entity.title)
        .bind(&entity.title_norm)
        .bind(entity.year)
        .bind(entity.metadata.to_string())
        .bind(entity.fetched_at.timestamp())
        .bind(entity.ttl_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_entity(&self, entity_ref: &ProviderRef) -> Result<Option<Cached<ProviderEntity>>> {
        let row = sqlx::query(
            "SELECT provider, kind, ext_id, title, title_norm, year, metadata, fetched_at, ttl_seconds
             FROM entities WHERE provider = ?1 AND kind = ?2 AND ext_id = ?3",
        )
        .bind(entity_ref.provider.as_str())
        .bind(entity_ref.kind.as_str())
        .bind(&entity_ref.ext_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entity = decode_entity(&row)?;
        let stale = Utc::now().timestamp() >= entity.fetched_at.timestamp() + entity.ttl_seconds;
        Ok(Some(Cached { value: entity, stale }))
    }

    pub async fn entity_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM entities")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    // ----- episodes -----

    pub async fn put_episodes(&self, episodes: &[EpisodeRecord]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for episode in episodes {
            sqlx::query(
                r#"
                INSERT INTO episodes (provider, series_id, season, episode, title, air_date, metadata, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (provider, series_id, season, episode) DO UPDATE SET
                    title = excluded.title,
                    air_date = excluded.air_date,
                    metadata = excluded.metadata,
                    fetched_at = excluded.fetched_at
                "#,
            )
            .bind(episode.provider.as_str())
            .bind(&episode.series_id)
            .bind(episode.season)
            .bind(episode.episode)
            .bind(&episode.title)
            .bind(episode.air_date.map(|d| d.to_string()))
            .bind(episode.metadata.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_episodes(
        &self,
        provider: ProviderKind,
        series_id: &str,
        season: Option<u32>,
    ) -> Result<Vec<EpisodeRecord>> {
        let rows = match season {
            Some(season) => {
                sqlx::query(
                    "SELECT provider, series_id, season, episode, title, air_date, metadata
                     FROM episodes
                     WHERE provider = ?1 AND series_id = ?2 AND season = ?3
                     ORDER BY season, episode",
                )
                .bind(provider.as_str())
                .bind(series_id)
                .bind(season)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT provider, series_id, season, episode, title, air_date, metadata
                     FROM episodes
                     WHERE provider = ?1 AND series_id = ?2
                     ORDER BY season, episode",
                )
                .bind(provider.as_str())
                .bind(series_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(decode_episode).collect()
    }

    // ----- tracks -----

    pub async fn put_tracks(&self, tracks: &[TrackRecord]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for track in tracks {
            sqlx::query(
                r#"
                INSERT INTO tracks (provider, album_id, disc, track, title, metadata, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (provider, album_id, disc, track) DO UPDATE SET
                    title = excluded.title,
                    metadata = excluded.metadata,
                    fetched_at = excluded.fetched_at
                "#,
            )
            .bind(track.provider.as_str())
            .bind(&track.album_id)
            .bind(track.disc)
            .bind(track.track)
            .bind(&track.title)
            .bind(track.metadata.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_tracks(&self, provider: ProviderKind, album_id: &str) -> Result<Vec<TrackRecord>> {
        let rows = sqlx::query(
            "SELECT provider, album_id, disc, track, title, metadata
             FROM tracks WHERE provider = ?1 AND album_id = ?2
             ORDER BY disc, track",
        )
        .bind(provider.as_str())
        .bind(album_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_track).collect()
    }

    // ----- decisions -----

    pub async fn put_decision(&self, decision: &Decision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decisions (scope, title_norm, year, provider, ext_id, decided_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (scope, title_norm, year) DO UPDATE SET
                provider = excluded.provider,
                ext_id = excluded.ext_id,
                decided_at = excluded.decided_at
            "#,
        )
        .bind(&decision.scope)
        .bind(&decision.title_norm)
        .bind(decision.year)
        .bind(decision.provider.as_str())
        .bind(&decision.ext_id)
        .bind(decision.decided_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_decision(
        &self,
        scope: &str,
        title_norm: &str,
        year: i32,
    ) -> Result<Option<Decision>> {
        let row = sqlx::query(
            "SELECT scope, title_norm, year, provider, ext_id, decided_at
             FROM decisions WHERE scope = ?1 AND title_norm = ?2 AND year = ?3",
        )
        .bind(scope)
        .bind(title_norm)
        .bind(year)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let provider = decode_provider(&row)?;
            Ok(Decision {
                scope: row.try_get("scope")?,
                title_norm: row.try_get("title_norm")?,
                year: row.try_get("year")?,
                provider,
                ext_id: row.try_get("ext_id")?,
                decided_at: timestamp(row.try_get("decided_at")?),
            })
        })
        .transpose()
    }

    // ----- opaque blobs -----

    pub async fn put_cache_blob(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO cache_entries (cache_key, payload, expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (cache_key) DO UPDATE SET
                payload = excluded.payload,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at
            "#,
        )
        .bind(key)
        .bind(payload)
        .bind(now + ttl.as_secs() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_cache_blob(&self, key: &str) -> Result<Option<Cached<Vec<u8>>>> {
        let row = sqlx::query("SELECT payload, expires_at FROM cache_entries WHERE cache_key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let payload: Vec<u8> = row.try_get("payload")?;
        let expires_at: i64 = row.try_get("expires_at")?;
        Ok(Some(Cached {
            value: payload,
            stale: Utc::now().timestamp() >= expires_at,
        }))
    }

    pub async fn delete_cache_blob(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Parse a cached JSON blob; corrupt payloads are evicted so the caller
    /// refetches instead of failing forever.
    pub async fn get_cache_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Cached<T>>> {
        let Some(cached) = self.get_cache_blob(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&cached.value) {
            Ok(value) => Ok(Some(Cached {
                value,
                stale: cached.stale,
            })),
            Err(err) => {
                warn!(key, error = %err, "evicting corrupt cache blob");
                self.delete_cache_blob(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn put_cache_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.put_cache_blob(key, &payload, ttl).await
    }

    // ----- kv -----

    pub async fn kv_put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl.map(|t| now + t.as_secs() as i64))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<Cached<String>>> {
        let row = sqlx::query("SELECT value, expires_at FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let value: String = row.try_get("value")?;
        let expires_at: Option<i64> = row.try_get("expires_at")?;
        let stale = expires_at.is_some_and(|at| Utc::now().timestamp() >= at);
        Ok(Some(Cached { value, stale }))
    }

    pub async fn kv_put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        self.kv_put(key, &serde_json::to_string(value)?, ttl).await
    }

    pub async fn kv_get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Cached<T>>> {
        let Some(cached) = self.kv_get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&cached.value) {
            Ok(value) => Ok(Some(Cached {
                value,
                stale: cached.stale,
            })),
            Err(err) => {
                warn!(key, error = %err, "evicting corrupt kv row");
                sqlx::query("DELETE FROM kv WHERE key = ?1")
                    .bind(key)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
        }
    }

    // ----- locks -----

    /// Cooperative advisory lock. Returns false when another owner holds it.
    pub async fn acquire_lock(&self, name: &str, owner: &str, pid: Option<i64>) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO locks (name, owner, pid, acquired_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(owner)
        .bind(pid)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_lock(&self, name: &str, owner: &str) -> Result<()> {
        sqlx::query("DELETE FROM locks WHERE name = ?1 AND owner = ?2")
            .bind(name)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Unconditional removal, used for orphaned lock recovery.
    pub async fn force_release_lock(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM locks WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_lock(&self, name: &str) -> Result<Option<LockRow>> {
        let row = sqlx::query("SELECT name, owner, pid, acquired_at FROM locks WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(LockRow {
                name: row.try_get("name")?,
                owner: row.try_get("owner")?,
                pid: row.try_get("pid")?,
                acquired_at: timestamp(row.try_get("acquired_at")?),
            })
        })
        .transpose()
    }

    pub async fn is_lock_held(&self, name: &str) -> Result<bool> {
        Ok(self.get_lock(name).await?.is_some())
    }

    // ----- maintenance -----

    /// Drop hard-expired blob and kv rows. TTL on entity rows stays soft.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp();
        let blobs = sqlx::query("DELETE FROM cache_entries WHERE expires_at < ?1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let kv = sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at < ?1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        debug!(blobs, kv, "purged expired cache rows");
        Ok(blobs + kv)
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn decode_provider(row: &SqliteRow) -> Result<ProviderKind> {
    let raw: String = row.try_get("provider")?;
    ProviderKind::parse(&raw)
        .ok_or_else(|| CoreError::Fatal(format!("unknown provider in cache row: {raw}")))
}

fn decode_entity(row: &SqliteRow) -> Result<ProviderEntity> {
    let provider = decode_provider(row)?;
    let kind_raw: String = row.try_get("kind")?;
    let kind = EntityKind::parse(&kind_raw)
        .ok_or_else(|| CoreError::Fatal(format!("unknown entity kind in cache row: {kind_raw}")))?;
    let metadata_raw: String = row.try_get("metadata")?;
    let metadata = serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null);
    Ok(ProviderEntity {
        provider,
        kind,
        ext_id: row.try_get("ext_id")?,
        title: row.try_get("title")?,
        title_norm: row.try_get("title_norm")?,
        year: row.try_get("year")?,
        metadata,
        fetched_at: timestamp(row.try_get("fetched_at")?),
        ttl_seconds: row.try_get("ttl_seconds")?,
    })
}

fn decode_episode(row: &SqliteRow) -> Result<EpisodeRecord> {
    let provider = decode_provider(row)?;
    let air_date: Option<String> = row.try_get("air_date")?;
    let metadata_raw: String = row.try_get("metadata")?;
    Ok(EpisodeRecord {
        provider,
        series_id: row.try_get("series_id")?,
        season: row.try_get("season")?,
        episode: row.try_get("episode")?,
        title: row.try_get("title")?,
        air_date: air_date.and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok()),
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
    })
}

fn decode_track(row: &SqliteRow) -> Result<TrackRecord> {
    let provider = decode_provider(row)?;
    let metadata_raw: String = row.try_get("metadata")?;
    Ok(TrackRecord {
        provider,
        album_id: row.try_get("album_id")?,
        disc: row.try_get("disc")?,
        track: row.try_get("track")?,
        title: row.try_get("title")?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use namegnome_model::EntityKind;

    fn sample_entity() -> ProviderEntity {
        ProviderEntity {
            provider: ProviderKind::Tvdb,
            kind: EntityKind::Series,
            ext_id: "78874".to_string(),
            title: "Danger Mouse (2015)".to_string(),
            title_norm: "danger mouse 2015".to_string(),
            year: Some(2015),
            metadata: serde_json::json!({"status": "Ended"}),
            fetched_at: Utc::now(),
            ttl_seconds: 3600,
        }
    }

    #[tokio::test]
    async fn entity_roundtrip_and_uniqueness() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let entity = sample_entity();
        store.put_entity(&entity).await.unwrap();
        // Upsert on the same key replaces, never duplicates.
        store.put_entity(&entity).await.unwrap();
        assert_eq!(store.entity_count().await.unwrap(), 1);

        let cached = store
            .get_entity(&entity.entity_ref())
            .await
            .unwrap()
            .unwrap();
        assert!(!cached.stale);
        assert_eq!(cached.value.title_norm, "danger mouse 2015");
    }

    #[tokio::test]
    async fn expired_blob_is_flagged_stale_not_dropped() {
        let store = CacheStore::open_in_memory().await.unwrap();
        store
            .put_cache_blob("k", b"payload", Duration::from_secs(0))
            .await
            .unwrap();
        let cached = store.get_cache_blob("k").await.unwrap().unwrap();
        assert!(cached.stale);
        assert_eq!(cached.value, b"payload");
    }

    #[tokio::test]
    async fn corrupt_json_blob_is_evicted() {
        let store = CacheStore::open_in_memory().await.unwrap();
        store
            .put_cache_blob("bad", b"{not json", Duration::from_secs(60))
            .await
            .unwrap();
        let parsed: Option<Cached<serde_json::Value>> =
            store.get_cache_json("bad").await.unwrap();
        assert!(parsed.is_none());
        assert!(store.get_cache_blob("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn decisions_persist() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let decision = Decision {
            scope: "tv".to_string(),
            title_norm: "danger mouse".to_string(),
            year: -1,
            provider: ProviderKind::Tvdb,
            ext_id: "299921".to_string(),
            decided_at: Utc::now(),
        };
        store.put_decision(&decision).await.unwrap();
        let loaded = store
            .get_decision("tv", "danger mouse", -1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.ext_id, "299921");
        assert_eq!(loaded.provider, ProviderKind::Tvdb);
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = CacheStore::open_in_memory().await.unwrap();
        assert!(store.acquire_lock("root:/media", "job-a", Some(1)).await.unwrap());
        assert!(!store.acquire_lock("root:/media", "job-b", Some(2)).await.unwrap());

        let held = store.get_lock("root:/media").await.unwrap().unwrap();
        assert_eq!(held.owner, "job-a");

        // Releasing with the wrong owner is a no-op.
        store.release_lock("root:/media", "job-b").await.unwrap();
        assert!(store.is_lock_held("root:/media").await.unwrap());

        store.release_lock("root:/media", "job-a").await.unwrap();
        assert!(store.acquire_lock("root:/media", "job-b", Some(2)).await.unwrap());
    }

    #[tokio::test]
    async fn episodes_roundtrip_ordered() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let eps: Vec<EpisodeRecord> = [(1, 2, "Two"), (1, 1, "One")]
            .iter()
            .map(|(season, episode, title)| EpisodeRecord {
                provider: ProviderKind::Tvdb,
                series_id: "42".to_string(),
                season: *season,
                episode: *episode,
                title: (*title).to_string(),
                air_date: None,
                metadata: serde_json::Value::Null,
            })
            .collect();
        store.put_episodes(&eps).await.unwrap();
        let loaded = store
            .get_episodes(ProviderKind::Tvdb, "42", Some(1))
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].episode, 1);
        assert_eq!(loaded[1].title, "Two");
    }
}
