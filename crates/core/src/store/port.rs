use super::entity::CandleRow;
use super::error::StoreError;
use crate::candle::entity::Candle;
use crate::common::{Interval, SeriesKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// # Summary
/// 宽列存储句柄接口，对应一个 (资产对, 周期) 的物理表。
///
/// # Invariants
/// - 行以 (partition_key, row_key) 唯一标识，`row_key` 的字典序与时间序一致。
/// - 实现者可以是宽列、文档或关系型存储。
#[async_trait]
pub trait RowStore: Send + Sync {
    /// # Summary
    /// 按多个行键批量读取同一分区的行。
    ///
    /// # Arguments
    /// * `partition_key`: 分区键（报价类型）。
    /// * `row_keys`: 行键列表。
    ///
    /// # Returns
    /// 已存在的行，不存在的键被忽略。
    async fn multi_get(
        &self,
        partition_key: &str,
        row_keys: &[String],
    ) -> Result<Vec<CandleRow>, StoreError>;

    /// # Summary
    /// 以“插入或替换”语义批量写入行。
    ///
    /// # Logic
    /// 1. 每行以自身的分区键与行键定位。
    /// 2. 同键行整体覆盖。
    async fn upsert_batch(&self, rows: &[CandleRow]) -> Result<(), StoreError>;

    /// # Summary
    /// 读取分区内行键落在 `[row_key_from, row_key_to]` 的行，按行键升序。
    async fn range_query(
        &self,
        partition_key: &str,
        row_key_from: &str,
        row_key_to: &str,
    ) -> Result<Vec<CandleRow>, StoreError>;
}

/// # Summary
/// 存储句柄工厂，负责按需打开物理表。
///
/// # Invariants
/// - 调用方缓存句柄；调用失败后经 `invalidate` 通知工厂，之后的 `open` 必须重新建立连接。
#[async_trait]
pub trait RowStoreFactory: Send + Sync {
    /// 打开 (资产对, 周期) 对应的存储句柄，不存在时创建。
    async fn open(
        &self,
        asset_pair: &str,
        interval: Interval,
    ) -> Result<Arc<dyn RowStore>, StoreError>;

    /// 丢弃 (资产对, 周期) 上可能已损坏的连接资源。
    async fn invalidate(&self, asset_pair: &str, interval: Interval);
}

/// # Summary
/// K 线持久化仓储接口，写队列调度器与缓存预热的唯一依赖。
///
/// # Invariants
/// - 同一序列同一分桶的写入按合并规则收敛，乱序投递不会丢失数据。
/// - 同一序列的写入互斥，并发批次不会互相覆盖。
#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// # Summary
    /// 将一组 K 线合并写入持久化存储。
    ///
    /// # Arguments
    /// * `candles`: 同一序列的 K 线，顺序即到达顺序。
    ///
    /// # Returns
    /// 成功返回 Ok；混入其他序列返回 `StoreError::SeriesMismatch`。
    /// 部分分桶已落盘后失败时返回 `StoreError::PartialWrite`，调用方只能重投尚未落盘的 K 线
    /// （见 `StoreError::unpersisted`）。
    async fn insert_or_merge(&self, candles: &[Candle]) -> Result<(), StoreError>;

    /// # Summary
    /// 查询半开区间 `[from, to)` 内的 K 线，按时间升序。
    async fn query(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError>;

    /// # Summary
    /// 读取时间不晚于 `upper_bound` 的最近 `count` 根 K 线，按时间升序。
    async fn get_recent(
        &self,
        series: &SeriesKey,
        count: usize,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError>;
}
