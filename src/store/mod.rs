//! System of record for scraped entities
//!
//! Entities are upserted as JSON keyed by their cache key. The cache may
//! drop an entry at any time; the store keeps the latest snapshot.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;

use crate::cache::CacheKey;
use crate::error::{ScrapeError, ScrapeResult};
use crate::jobs::store::open_pool;

const ENTITY_SCHEMA_SQL: &str = r#"
-- Latest snapshot of every scraped entity
CREATE TABLE IF NOT EXISTS entities (
    cache_key TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    body TEXT NOT NULL,
    scraped_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type, scraped_at);
"#;

/// One persisted entity snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub key: CacheKey,
    pub body: serde_json::Value,
    pub scraped_at: DateTime<Utc>,
}

impl EntityRecord {
    #[must_use]
    pub fn new(key: CacheKey, body: serde_json::Value, scraped_at: DateTime<Utc>) -> Self {
        Self { key, body, scraped_at }
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert or replace the snapshot stored under `record.key`
    async fn upsert(&self, record: &EntityRecord) -> ScrapeResult<()>;
    async fn get(&self, key: &CacheKey) -> ScrapeResult<Option<EntityRecord>>;
    /// Most recently scraped entities of one type
    async fn list(&self, entity_type: &str, limit: usize) -> ScrapeResult<Vec<EntityRecord>>;
}

#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    entities: DashMap<String, EntityRecord>,
}

impl MemoryEntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn upsert(&self, record: &EntityRecord) -> ScrapeResult<()> {
        self.entities.insert(record.key.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, key: &CacheKey) -> ScrapeResult<Option<EntityRecord>> {
        Ok(self.entities.get(&key.to_string()).map(|r| r.clone()))
    }

    async fn list(&self, entity_type: &str, limit: usize) -> ScrapeResult<Vec<EntityRecord>> {
        let mut records: Vec<EntityRecord> = self
            .entities
            .iter()
            .filter(|r| r.key.entity_type == entity_type)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.scraped_at.cmp(&a.scraped_at));
        records.truncate(limit);
        Ok(records)
    }
}

/// SQLite-backed entity store (WAL mode)
pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = open_pool(path).await?;
        sqlx::query(ENTITY_SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("Failed to initialize entity schema")?;
        Ok(Self { pool })
    }

    pub async fn count(&self) -> ScrapeResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode(key: &str, body: &str, scraped_at: i64) -> ScrapeResult<EntityRecord> {
    let key = key.parse::<CacheKey>()?;
    let body = serde_json::from_str(body)
        .map_err(|e| ScrapeError::Storage(format!("corrupt entity record {key}: {e}")))?;
    let scraped_at = DateTime::from_timestamp_millis(scraped_at)
        .ok_or_else(|| ScrapeError::Storage(format!("bad timestamp on entity record {key}")))?;
    Ok(EntityRecord { key, body, scraped_at })
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn upsert(&self, record: &EntityRecord) -> ScrapeResult<()> {
        let body = serde_json::to_string(&record.body).map_err(|e| ScrapeError::Storage(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO entities (cache_key, entity_type, entity_id, body, scraped_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                body = excluded.body,
                scraped_at = excluded.scraped_at
            "#,
        )
        .bind(record.key.to_string())
        .bind(&record.key.entity_type)
        .bind(&record.key.entity_id)
        .bind(body)
        .bind(record.scraped_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &CacheKey) -> ScrapeResult<Option<EntityRecord>> {
        let row: Option<(String, String, i64)> =
            sqlx::query_as("SELECT cache_key, body, scraped_at FROM entities WHERE cache_key = ?")
                .bind(key.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(k, body, at)| decode(&k, &body, at)).transpose()
    }

    async fn list(&self, entity_type: &str, limit: usize) -> ScrapeResult<Vec<EntityRecord>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT cache_key, body, scraped_at FROM entities WHERE entity_type = ? ORDER BY scraped_at DESC LIMIT ?",
        )
        .bind(entity_type)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|(k, body, at)| decode(&k, &body, at)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, views: u64, at: DateTime<Utc>) -> EntityRecord {
        EntityRecord::new(
            CacheKey::new("scrape", "video", id),
            serde_json::json!({ "id": id, "views": views }),
            at,
        )
    }

    #[tokio::test]
    async fn sqlite_upsert_replaces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteEntityStore::open(&dir.path().join("entities.db")).await.unwrap();
        let t0 = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();

        store.upsert(&record("v1", 10, t0)).await.unwrap();
        store.upsert(&record("v1", 25, t0 + Duration::minutes(5))).await.unwrap();

        let key = CacheKey::new("scrape", "video", "v1");
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.body["views"], 25);
        assert_eq!(stored.scraped_at, t0 + Duration::minutes(5));
        assert_eq!(store.count().await.unwrap(), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn sqlite_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteEntityStore::open(&dir.path().join("entities.db")).await.unwrap();
        let t0 = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        store.upsert(&record("a", 1, t0)).await.unwrap();
        store.upsert(&record("b", 2, t0 + Duration::seconds(1))).await.unwrap();
        store
            .upsert(&EntityRecord::new(CacheKey::new("scrape", "user", "u"), serde_json::json!({}), t0))
            .await
            .unwrap();

        let videos = store.list("video", 10).await.unwrap();
        let ids: Vec<_> = videos.iter().map(|r| r.key.entity_id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(store.list("video", 1).await.unwrap().len(), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn memory_store_matches_sqlite_semantics() {
        let store = MemoryEntityStore::new();
        let t0 = Utc::now();
        store.upsert(&record("a", 1, t0)).await.unwrap();
        store.upsert(&record("a", 2, t0)).await.unwrap();
        assert_eq!(store.len(), 1);
        let got = store.get(&CacheKey::new("scrape", "video", "a")).await.unwrap().unwrap();
        assert_eq!(got.body["views"], 2);
        assert!(store.get(&CacheKey::new("scrape", "video", "zz")).await.unwrap().is_none());
    }
}
