use async_trait::async_trait;
use candela_core::cache::error::CacheError;
use candela_core::cache::port::BlobStore;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::Path;

/// # Summary
/// 基于 SQLite 的快照 Blob 存储，写队列与缓存快照跨重启保存于此。
///
/// # Invariants
/// * 单表 `blobs(key, value)`，同名键整体覆盖。
pub struct SqliteBlobStore {
    pool: SqlitePool,
}

fn storage_error(e: sqlx::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

impl SqliteBlobStore {
    /// # Summary
    /// 打开（必要时创建）快照数据库。
    ///
    /// # Arguments
    /// * `path` - 数据库文件路径，父目录须已存在。
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(storage_error)?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn save_blob(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        sqlx::query("INSERT OR REPLACE INTO blobs (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let record = sqlx::query_as::<_, (Vec<u8>,)>("SELECT value FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(record.map(|(value,)| value))
    }

    async fn delete_blob(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM blobs WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}
