use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteConnectOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::error::AqeResult;

#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: SqlitePool,
}

impl ConnectionPool {
    /// Create a new connection pool from a database URL (e.g. `sqlite://path/to.db`
    /// or `sqlite::memory:`).
    pub async fn new(database_url: &str) -> AqeResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        // WAL + NORMAL synchronous give us concurrent readers without
        // serializing every write behind a full fsync.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the underlying SqlitePool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Test the database connection by executing a simple query
    pub async fn test_connection(&self) -> AqeResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
