use async_trait::async_trait;
use candela_core::common::Interval;
use candela_core::store::entity::CandleRow;
use candela_core::store::error::StoreError;
use candela_core::store::port::{RowStore, RowStoreFactory};
use dashmap::DashMap;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// RowStore 的 SQLite 实现，对应一个 (资产对, 周期) 数据库文件。
///
/// # Summary
/// 行以 JSON 文本存放在 `candle_rows` 表中，主键为 (partition_key, row_key)。
pub struct SqliteRowStore {
    pool: SqlitePool,
}

impl SqliteRowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn decode_row(data: &str) -> Result<CandleRow, StoreError> {
    serde_json::from_str(data).map_err(|e| StoreError::Serialize(e.to_string()))
}

#[async_trait]
impl RowStore for SqliteRowStore {
    /// # Summary
    /// 批量读取指定行键。
    ///
    /// # Logic
    /// 1. 按行键数量拼接 `IN (?, ?, ...)` 占位符。
    /// 2. 逐个绑定行键并解码 JSON。
    async fn multi_get(
        &self,
        partition_key: &str,
        row_keys: &[String],
    ) -> Result<Vec<CandleRow>, StoreError> {
        if row_keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; row_keys.len()].join(", ");
        let sql = format!(
            "SELECT data FROM candle_rows WHERE partition_key = ? AND row_key IN ({}) ORDER BY row_key ASC",
            placeholders
        );

        let mut query = sqlx::query_as::<_, (String,)>(&sql).bind(partition_key);
        for key in row_keys {
            query = query.bind(key);
        }
        let records = query.fetch_all(&self.pool).await.map_err(db_error)?;

        records.iter().map(|(data,)| decode_row(data)).collect()
    }

    /// # Summary
    /// 批量写入行。
    ///
    /// # Logic
    /// 1. 开启事务。
    /// 2. 对每行执行 `INSERT OR REPLACE`。
    /// 3. 提交事务，任何一行失败则整体回滚。
    async fn upsert_batch(&self, rows: &[CandleRow]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for row in rows {
            let data =
                serde_json::to_string(row).map_err(|e| StoreError::Serialize(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO candle_rows (partition_key, row_key, data)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(row.partition_key())
            .bind(row.row_key())
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)
    }

    async fn range_query(
        &self,
        partition_key: &str,
        row_key_from: &str,
        row_key_to: &str,
    ) -> Result<Vec<CandleRow>, StoreError> {
        let records = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT data FROM candle_rows
            WHERE partition_key = ? AND row_key >= ? AND row_key <= ?
            ORDER BY row_key ASC
            "#,
        )
        .bind(partition_key)
        .bind(row_key_from)
        .bind(row_key_to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        records.iter().map(|(data,)| decode_row(data)).collect()
    }
}

/// RowStoreFactory 的 SQLite 实现，采用“一库一序列表”策略。
///
/// # Summary
/// 为每个 (资产对, 周期) 维护一个独立的 SQLite 数据库文件。
///
/// # Invariants
/// * 数据库文件存储在 `base_path` 目录下，文件名为 `{编码后的资产对}_{周期}.db`。
/// * 不同资产对永远映射到不同的文件。
/// * 连接池被缓存以避免频繁的文件打开操作；作废或已关闭的连接池会被重建。
pub struct SqliteRowStoreFactory {
    base_path: PathBuf,
    pools: DashMap<String, SqlitePool>,
}

impl SqliteRowStoreFactory {
    /// 创建新的工厂实例。
    ///
    /// # Logic
    /// 1. 确保 `base_path` 目录存在。
    ///
    /// # Arguments
    /// * `base_path` - 数据库文件目录。
    ///
    /// # Returns
    /// * `Result<Self, StoreError>` - 工厂实例或错误。
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .map_err(|e| StoreError::InitError(e.to_string()))?;
        }
        Ok(Self {
            base_path,
            pools: DashMap::new(),
        })
    }

    /// 数据库文件名。资产对中 ASCII 字母数字以外的字节编码为 `%XX`，
    /// 编码结果不含下划线，分隔符因此无歧义。
    pub fn file_name(asset_pair: &str, interval: Interval) -> String {
        let mut name = String::with_capacity(asset_pair.len() + 12);
        for byte in asset_pair.bytes() {
            if byte.is_ascii_alphanumeric() {
                name.push(char::from(byte));
            } else {
                name.push_str(&format!("%{:02X}", byte));
            }
        }
        format!("{}_{}.db", name, interval)
    }

    /// 获取或初始化连接池。
    ///
    /// # Logic
    /// 1. 命中缓存且连接池未关闭时直接返回。
    /// 2. 否则以 `create_if_missing` 打开数据库并建表。
    async fn get_or_init_pool(
        &self,
        asset_pair: &str,
        interval: Interval,
    ) -> Result<SqlitePool, StoreError> {
        let key = Self::file_name(asset_pair, interval);

        if let Some(pool) = self.pools.get(&key)
            && !pool.is_closed()
        {
            return Ok(pool.clone());
        }

        let options = SqliteConnectOptions::new()
            .filename(self.base_path.join(&key))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(db_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candle_rows (
                partition_key TEXT NOT NULL,
                row_key TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (partition_key, row_key)
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_error)?;

        info!("Opened row store {}", key);
        self.pools.insert(key, pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl RowStoreFactory for SqliteRowStoreFactory {
    async fn open(
        &self,
        asset_pair: &str,
        interval: Interval,
    ) -> Result<Arc<dyn RowStore>, StoreError> {
        let pool = self.get_or_init_pool(asset_pair, interval).await?;
        Ok(Arc::new(SqliteRowStore::new(pool)))
    }

    /// 移除并关闭缓存的连接池，下次 `open` 重新连接数据库文件。
    async fn invalidate(&self, asset_pair: &str, interval: Interval) {
        let key = Self::file_name(asset_pair, interval);
        if let Some((_, pool)) = self.pools.remove(&key) {
            warn!("Closing row store {}", key);
            pool.close().await;
        }
    }
}
