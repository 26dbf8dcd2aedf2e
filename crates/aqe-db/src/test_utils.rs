use tempfile::NamedTempFile;

use crate::connection::ConnectionPool;
use crate::error::AqeResult;
use crate::metadata::MetadataStore;

/// A throwaway SQLite database backed by a temp file, with the engine's
/// own metadata schema already applied. The temp file is kept alive for
/// the lifetime of this struct and removed on drop.
pub struct TestDb {
    pool: ConnectionPool,
    _file: NamedTempFile,
}

impl TestDb {
    pub async fn new() -> AqeResult<Self> {
        let file = NamedTempFile::new().expect("create temp db file");
        let url = format!("sqlite://{}", file.path().display());

        let pool = ConnectionPool::new(&url).await?;
        MetadataStore::ensure_schema(pool.pool()).await?;

        Ok(Self { pool, _file: file })
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        self.pool.pool()
    }
}
