//! SQLite-backed credential storage, queried through sqlx's runtime-checked
//! `query`/`query_as` API rather than the `query!` compile-time macros —
//! those require a live `DATABASE_URL` or a checked-in offline cache at
//! build time, neither of which this deployment provisions.

use anyhow::Error;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};

use super::StoreBackend;

pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct UserRow {
    password_hash: String,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = SqlitePoolOptions::new().max_connections(5).connect(database_url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                bare_jid TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StoreBackend for SqliteStore {
    async fn stored_hash(&self, bare_jid: &str) -> Result<Option<String>, Error> {
        let row: Option<UserRow> = sqlx::query_as("SELECT password_hash FROM users WHERE bare_jid = ?")
            .bind(bare_jid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.password_hash))
    }

    async fn upsert(&self, bare_jid: &str, password_hash: &str) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO users (bare_jid, password_hash) VALUES (?, ?)
             ON CONFLICT(bare_jid) DO UPDATE SET password_hash = excluded.password_hash",
        )
        .bind(bare_jid)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, bare_jid: &str) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM users WHERE bare_jid = ?").bind(bare_jid).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn in_memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn upsert_then_lookup_round_trips() {
        let store = in_memory_store().await;
        store.upsert("alice@example.org", "hash-1").await.unwrap();
        assert_eq!(store.stored_hash("alice@example.org").await.unwrap(), Some("hash-1".to_string()));
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_hash() {
        let store = in_memory_store().await;
        store.upsert("alice@example.org", "hash-1").await.unwrap();
        store.upsert("alice@example.org", "hash-2").await.unwrap();
        assert_eq!(store.stored_hash("alice@example.org").await.unwrap(), Some("hash-2".to_string()));
    }

    #[tokio::test]
    async fn remove_reports_whether_a_row_existed() {
        let store = in_memory_store().await;
        store.upsert("alice@example.org", "hash-1").await.unwrap();
        assert!(store.remove("alice@example.org").await.unwrap());
        assert!(!store.remove("alice@example.org").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_user_looks_up_as_none() {
        let store = in_memory_store().await;
        assert_eq!(store.stored_hash("ghost@example.org").await.unwrap(), None);
    }
}
