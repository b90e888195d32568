use crate::gate::MaintenanceGate;
use async_trait::async_trait;
use candela_core::cache::error::CacheError;
use candela_core::cache::port::{CandleCache, SortedSetStore};
use candela_core::candle::entity::Candle;
use candela_core::common::SeriesKey;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// # Summary
/// 基于外部有序集合的窗口缓存，可供多个进程共享。
///
/// # Logic
/// 每个序列对应一个有序集合，分值为 K 线时间戳秒数，成员为 JSON 编码的 K 线。
///
/// # Invariants
/// - 同一序列的读改写由该序列独占的异步锁串行化。
/// - 截断等结构性维护经 `MaintenanceGate` 串行执行。
/// - 不支持快照导出与导入。
pub struct SortedSetCandleCache {
    store: Arc<dyn SortedSetStore>,
    gate: MaintenanceGate,
    capacity: usize,
    // 序列级写锁
    locks: DashMap<SeriesKey, Arc<Mutex<()>>>,
}

impl SortedSetCandleCache {
    pub fn new(store: Arc<dyn SortedSetStore>, gate: MaintenanceGate, capacity: usize) -> Self {
        Self {
            store,
            gate,
            capacity: capacity.max(1),
            locks: DashMap::new(),
        }
    }

    /// 序列在有序集合中的键。
    pub fn set_key(series: &SeriesKey) -> String {
        format!(
            "candela:{}:{}:{}",
            series.asset_pair, series.price_type, series.interval
        )
    }

    fn lock_for(&self, series: &SeriesKey) -> Arc<Mutex<()>> {
        self.locks.entry(series.clone()).or_default().clone()
    }

    fn encode(candle: &Candle) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(candle).map_err(|e| CacheError::Serialize(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Candle, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialize(e.to_string()))
    }

    /// 只保留最新的 `capacity` 个成员。
    async fn trim_key(&self, key: &str) -> Result<(), CacheError> {
        let size = self.store.cardinality(key).await?;
        if size > self.capacity {
            self.store
                .remove_range_by_rank(key, 0, size - self.capacity - 1)
                .await?;
        }
        Ok(())
    }

    /// # Summary
    /// 对全部已知序列执行一次截断。
    ///
    /// # Logic
    /// 1. 获取维护许可，已有维护在执行时等待其结束。
    /// 2. 逐个序列截断到容量以内。
    pub async fn trim(&self) -> Result<(), CacheError> {
        let Some(_permit) = self.gate.enter().await else {
            return Err(CacheError::Unknown("maintenance gate closed".into()));
        };
        let series: Vec<SeriesKey> = self.locks.iter().map(|e| e.key().clone()).collect();
        for key in &series {
            let lock = self.lock_for(key);
            let _guard = lock.lock().await;
            self.trim_key(&Self::set_key(key)).await?;
        }
        info!("Trimmed {} sorted-set series", series.len());
        Ok(())
    }
}

#[async_trait]
impl CandleCache for SortedSetCandleCache {
    async fn initialize(&self, series: &SeriesKey, candles: Vec<Candle>) -> Result<(), CacheError> {
        let lock = self.lock_for(series);
        let _guard = lock.lock().await;
        let key = Self::set_key(series);
        self.store
            .remove_range_by_score(&key, i64::MIN, i64::MAX)
            .await?;
        let mut own: Vec<Candle> = candles.into_iter().filter(|c| c.belongs_to(series)).collect();
        own.sort_by_key(|c| (c.timestamp, c.last_update_timestamp));
        let skip = own.len().saturating_sub(self.capacity);
        for candle in own.iter().skip(skip) {
            let score = candle.timestamp.timestamp();
            // 同一时间槽后写入者更新时间更晚
            self.store.remove_range_by_score(&key, score, score).await?;
            self.store
                .add_or_update(&key, Self::encode(candle)?, score)
                .await?;
        }
        self.trim_key(&key).await
    }

    async fn upsert(&self, candle: &Candle) -> Result<(), CacheError> {
        let series = candle.series_key();
        let lock = self.lock_for(&series);
        let _guard = lock.lock().await;
        let key = Self::set_key(&series);
        let score = candle.timestamp.timestamp();

        for bytes in self.store.range_by_score(&key, score, score).await? {
            let existing = Self::decode(&bytes)?;
            if existing.last_update_timestamp >= candle.last_update_timestamp {
                return Ok(());
            }
        }

        let size = self.store.cardinality(&key).await?;
        if size >= self.capacity {
            let oldest = self.store.range_by_score(&key, i64::MIN, score).await?;
            if oldest.is_empty() {
                debug!(
                    "Discarding {} at {}: older than the cached window",
                    series, candle.timestamp
                );
                return Ok(());
            }
        }

        self.store.remove_range_by_score(&key, score, score).await?;
        self.store
            .add_or_update(&key, Self::encode(candle)?, score)
            .await?;
        self.trim_key(&key).await
    }

    async fn query(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, CacheError> {
        // K 线时间为整秒：ts >= from 即 ts >= ceil(from)，ts < to 即 ts <= ceil(to) - 1
        let lo = ceil_seconds(from);
        let hi = ceil_seconds(to).saturating_sub(1);
        self.store
            .range_by_score(&Self::set_key(series), lo, hi)
            .await?
            .iter()
            .map(|bytes| Self::decode(bytes))
            .collect()
    }

    async fn series_len(&self, series: &SeriesKey) -> Result<usize, CacheError> {
        self.store.cardinality(&Self::set_key(series)).await
    }
}

fn ceil_seconds(t: DateTime<Utc>) -> i64 {
    if t.timestamp_subsec_nanos() > 0 {
        t.timestamp().saturating_add(1)
    } else {
        t.timestamp()
    }
}
