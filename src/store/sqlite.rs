//! SQLite-backed store.
//!
//! Several processes on one host can share the same database file, which is
//! what lets HTTP handlers and scheduler-triggered workers see one queue.

use std::time::Duration;

use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
        SqlitePoolOptions,
    },
    SqlitePool,
};

use super::{expiry_millis, Store, StoreFuture, StoreResult};

#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SqliteStore {
    /// Opens (creating if missing) the database file at `path` and applies
    /// migrations.
    pub async fn connect(path: impl AsRef<str>) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .locking_mode(SqliteLockingMode::Normal)
            .busy_timeout(Duration::from_secs(5))
            .optimize_on_close(true, None)
            .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        Self::migrate(pool).await
    }

    /// A private in-memory database. Limited to a single connection, since
    /// every SQLite in-memory connection is its own database.
    pub async fn in_memory() -> StoreResult<Self> {
        let opts = SqliteConnectOptions::new().in_memory(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(db: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations").run(&db).await?;

        Ok(Self { db })
    }
}

impl Store for SqliteStore {
    fn lpush<'a>(&'a self, list: &'a str, value: String) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut tx = self.db.begin().await?;

            sqlx::query("INSERT INTO list_items (list, value) VALUES ($1, $2)")
                .bind(list)
                .bind(value)
                .execute(&mut *tx)
                .await?;

            let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM list_items WHERE list = $1")
                .bind(list)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;

            Ok(len as u64)
        })
    }

    fn rpop<'a>(&'a self, list: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let value = sqlx::query_scalar(
                "DELETE FROM list_items WHERE id = (
                    SELECT id FROM list_items WHERE list = $1 ORDER BY id ASC LIMIT 1
                ) RETURNING value",
            )
            .bind(list)
            .fetch_optional(&self.db)
            .await?;

            Ok(value)
        })
    }

    fn lrange<'a>(&'a self, list: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let values =
                sqlx::query_scalar("SELECT value FROM list_items WHERE list = $1 ORDER BY id DESC")
                    .bind(list)
                    .fetch_all(&self.db)
                    .await?;

            Ok(values)
        })
    }

    fn llen<'a>(&'a self, list: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM list_items WHERE list = $1")
                .bind(list)
                .fetch_one(&self.db)
                .await?;

            Ok(len as u64)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let value =
                sqlx::query_scalar("SELECT value FROM kv WHERE key = $1 AND expires_at > $2")
                    .bind(key)
                    .bind(now_millis())
                    .fetch_optional(&self.db)
                    .await?;

            Ok(value)
        })
    }

    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO kv (key, value, expires_at) VALUES ($1, $2, $3)
                ON CONFLICT (key) DO UPDATE SET
                    value = excluded.value,
                    expires_at = excluded.expires_at",
            )
            .bind(key)
            .bind(value)
            .bind(expiry_millis(now_millis(), ttl))
            .execute(&self.db)
            .await?;

            Ok(())
        })
    }

    fn counter<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let value: Option<i64> =
                sqlx::query_scalar("SELECT value FROM counters WHERE key = $1 AND expires_at > $2")
                    .bind(key)
                    .bind(now_millis())
                    .fetch_optional(&self.db)
                    .await?;

            Ok(value.unwrap_or(0))
        })
    }

    fn incr_ex<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let now = now_millis();

            let value = sqlx::query_scalar(
                "INSERT INTO counters (key, value, expires_at) VALUES ($1, 1, $2)
                ON CONFLICT (key) DO UPDATE SET
                    value = CASE WHEN counters.expires_at > $3 THEN counters.value + 1 ELSE 1 END,
                    expires_at = CASE WHEN counters.expires_at > $4
                        THEN counters.expires_at
                        ELSE excluded.expires_at
                    END
                RETURNING value",
            )
            .bind(key)
            .bind(expiry_millis(now, ttl))
            .bind(now)
            .bind(now)
            .fetch_one(&self.db)
            .await?;

            Ok(value)
        })
    }

    fn evict_expired(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let now = now_millis();
            let mut tx = self.db.begin().await?;

            let values = sqlx::query("DELETE FROM kv WHERE expires_at <= $1")
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            let counters = sqlx::query("DELETE FROM counters WHERE expires_at <= $1")
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            tx.commit().await?;

            Ok(values + counters)
        })
    }
}
