use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

pub type DbPool = sqlx::SqlitePool;

/// Transaction that holds the database write lock from its first statement.
/// Deferred transactions that read before writing fail with SQLITE_BUSY under
/// WAL instead of waiting out the busy timeout.
pub async fn begin_write(pool: &DbPool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

/// Opens a pool with foreign keys enforced and a busy timeout matching the
/// acquire timeout, so writers queue on the database lock instead of failing.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let timeout = Duration::from_secs(timeout_secs.max(1));
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(timeout);

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(timeout)
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{begin_write, connect_with_settings};

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let enabled = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("pragma")
            .get::<i64, _>(0);
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn file_databases_are_created_on_first_connect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fresh.db");
        let url = format!("sqlite://{}", path.display());

        let pool = connect_with_settings(&url, 1, 5).await.expect("connect");
        pool.close().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn write_transactions_queue_behind_each_other() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("writers.db").display());
        let pool = connect_with_settings(&url, 2, 5).await.expect("connect");
        sqlx::query("CREATE TABLE counter (value INTEGER NOT NULL)")
            .execute(&pool)
            .await
            .expect("create");
        sqlx::query("INSERT INTO counter (value) VALUES (0)").execute(&pool).await.expect("seed");

        let mut first = begin_write(&pool).await.expect("first writer");
        let read: i64 = sqlx::query_scalar("SELECT value FROM counter")
            .fetch_one(&mut *first)
            .await
            .expect("read");

        let second_pool = pool.clone();
        let second = tokio::spawn(async move {
            let mut tx = begin_write(&second_pool).await.expect("second writer");
            let value: i64 = sqlx::query_scalar("SELECT value FROM counter")
                .fetch_one(&mut *tx)
                .await
                .expect("read");
            sqlx::query("UPDATE counter SET value = ?")
                .bind(value + 1)
                .execute(&mut *tx)
                .await
                .expect("update");
            tx.commit().await.expect("commit");
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        sqlx::query("UPDATE counter SET value = ?")
            .bind(read + 1)
            .execute(&mut *first)
            .await
            .expect("update");
        first.commit().await.expect("commit");
        second.await.expect("join");

        let value: i64 =
            sqlx::query_scalar("SELECT value FROM counter").fetch_one(&pool).await.expect("read");
        assert_eq!(value, 2);
    }
}
