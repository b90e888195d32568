use crate::cache::error::CacheError;
use crate::candle::entity::Candle;
use crate::common::SeriesKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// # Summary
/// 业务无关的快照 Blob 存储接口 (Port)。
///
/// # Invariants
/// - 处理原始字节，确保 Trait 是对象安全的 (Object Safe)。
/// - 用于写队列与缓存在进程重启间的持久化。
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// # Summary
    /// 保存原始字节数据。
    ///
    /// # Logic
    /// 1. 将数据以原子方式写入内存或持久化介质，同名键覆盖。
    ///
    /// # Arguments
    /// * `key`: 唯一键。
    /// * `value`: 原始字节数组。
    ///
    /// # Returns
    /// 成功返回 Ok，失败返回 `CacheError`。
    async fn save_blob(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    /// # Summary
    /// 读取原始字节数据。
    ///
    /// # Arguments
    /// * `key`: 唯一键。
    ///
    /// # Returns
    /// 存在则返回 `Some(Vec<u8>)`，否则返回 `None`。
    async fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// # Summary
    /// 删除指定键，键不存在时同样返回 Ok。
    async fn delete_blob(&self, key: &str) -> Result<(), CacheError>;
}

/// # Summary
/// Blob 存储泛型扩展接口，提供 JSON 序列化支持。
///
/// # Invariants
/// - 自动为所有实现 `BlobStore` 的类型提供支持。
#[async_trait]
pub trait BlobStoreExt: BlobStore {
    /// # Summary
    /// 存入强类型对象。
    ///
    /// # Logic
    /// 1. 使用 JSON 序列化对象。
    /// 2. 调用底层 `save_blob` 写入。
    async fn save_json<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialize(e.to_string()))?;
        self.save_blob(key, bytes).await
    }

    /// # Summary
    /// 取出强类型对象。
    ///
    /// # Logic
    /// 1. 调用底层 `load_blob` 获取字节。
    /// 2. 使用 JSON 反序列化为目标类型。
    async fn load_json<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.load_blob(key).await? {
            Some(bytes) => {
                let val = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::Deserialize(e.to_string()))?;
                Ok(Some(val))
            }
            None => Ok(None),
        }
    }
}

impl<T: BlobStore + ?Sized> BlobStoreExt for T {}

/// # Summary
/// 单个序列的缓存快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub series: SeriesKey,
    // 按时间升序
    pub candles: Vec<Candle>,
}

/// # Summary
/// 整个窗口缓存的快照，用于跨重启恢复。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub series: Vec<SeriesSnapshot>,
}

/// # Summary
/// 最近窗口 K 线缓存接口 (Port)。
///
/// # Invariants
/// - 每个序列最多保留 N 根 K 线，按时间升序。
/// - 窗口只保存“最近”数据，更早的历史须向持久化仓储查询。
/// - 不同序列的写入互不阻塞。
#[async_trait]
pub trait CandleCache: Send + Sync {
    /// # Summary
    /// 使用冷读取的数据初始化一个序列窗口。
    ///
    /// # Logic
    /// 1. 按时间排序，保留最新的 N 根。
    /// 2. 整体替换该序列已有窗口。
    ///
    /// # Arguments
    /// * `series`: 序列键。
    /// * `candles`: 来自持久化仓储的 K 线。
    async fn initialize(&self, series: &SeriesKey, candles: Vec<Candle>) -> Result<(), CacheError>;

    /// # Summary
    /// 插入或替换一根 K 线。
    ///
    /// # Logic
    /// 1. 同时间槽已存在时，仅当新值更新时间更晚才替换。
    /// 2. 否则按时间插入，超出容量从最旧端淘汰。
    /// 3. 比窗口内全部数据都旧且窗口已满时静默丢弃。
    async fn upsert(&self, candle: &Candle) -> Result<(), CacheError>;

    /// # Summary
    /// 查询半开区间 `[from, to)` 内的 K 线，按时间升序。
    async fn query(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, CacheError>;

    /// 序列当前缓存的 K 线数量，未知序列返回 0。
    async fn series_len(&self, series: &SeriesKey) -> Result<usize, CacheError>;

    /// # Summary
    /// 导出全部窗口快照。
    ///
    /// # Returns
    /// 默认返回 `CacheError::NotSupported`，调用方应跳过。
    async fn export_snapshot(&self) -> Result<CacheSnapshot, CacheError> {
        Err(CacheError::NotSupported("export_snapshot"))
    }

    /// # Summary
    /// 从快照恢复窗口。
    ///
    /// # Returns
    /// 默认返回 `CacheError::NotSupported`，调用方应跳过。
    async fn import_snapshot(&self, _snapshot: CacheSnapshot) -> Result<(), CacheError> {
        Err(CacheError::NotSupported("import_snapshot"))
    }
}

/// # Summary
/// 分布式有序集合能力抽象 (Port)，对应 Redis ZSET 一类服务。
///
/// # Invariants
/// - 成员按 `score` 升序排列，排名 (rank) 从 0 开始。
/// - 排名区间与分值区间均为闭区间。
#[async_trait]
pub trait SortedSetStore: Send + Sync {
    /// 添加成员或更新其分值。
    async fn add_or_update(&self, key: &str, member: Vec<u8>, score: i64) -> Result<(), CacheError>;

    /// 返回分值落在 `[lo, hi]` 内的成员，按分值升序。
    async fn range_by_score(&self, key: &str, lo: i64, hi: i64) -> Result<Vec<Vec<u8>>, CacheError>;

    /// 删除排名落在 `[lo_rank, hi_rank]` 内的成员。
    async fn remove_range_by_rank(
        &self,
        key: &str,
        lo_rank: usize,
        hi_rank: usize,
    ) -> Result<(), CacheError>;

    /// 删除分值落在 `[lo, hi]` 内的成员。
    async fn remove_range_by_score(&self, key: &str, lo: i64, hi: i64) -> Result<(), CacheError>;

    /// 集合成员数量。
    async fn cardinality(&self, key: &str) -> Result<usize, CacheError>;
}
