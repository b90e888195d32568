use async_trait::async_trait;
use candela_core::candle::entity::Candle;
use candela_core::common::{Interval, SeriesKey};
use candela_core::config::RepositoryConfig;
use candela_core::store::entity::{CandleRow, partition_key, row_key};
use candela_core::store::error::StoreError;
use candela_core::store::port::{CandleRepository, RowStore, RowStoreFactory};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

type HandleKey = (String, Interval);

/// 句柄槽：同一键每次重新打开都会得到新的代号。
struct HandleSlot {
    generation: u64,
    store: Arc<dyn RowStore>,
}

/// # Summary
/// 按 (资产对, 周期) 分表、按分桶分行的 K 线仓储。
///
/// # Invariants
/// * 句柄按需打开并缓存，任何调用失败都会作废出错的那一代句柄，下次调用重新打开。
/// * 单次物理读写的行键数不超过 `chunk_size`。
/// * 同一序列的“读取-合并-写回”互斥执行。
pub struct PartitionedRepository {
    factory: Arc<dyn RowStoreFactory>,
    handles: DashMap<HandleKey, HandleSlot>,
    next_generation: AtomicU64,
    // 序列写锁
    writers: DashMap<SeriesKey, Arc<Mutex<()>>>,
    config: RepositoryConfig,
}

impl PartitionedRepository {
    pub fn new(factory: Arc<dyn RowStoreFactory>, config: RepositoryConfig) -> Self {
        Self {
            factory,
            handles: DashMap::new(),
            next_generation: AtomicU64::new(0),
            writers: DashMap::new(),
            config,
        }
    }

    fn chunk_size(&self) -> usize {
        self.config.chunk_size.max(1)
    }

    /// # Summary
    /// 获取或打开句柄。
    ///
    /// # Logic
    /// 1. 命中缓存直接返回其代号与句柄。
    /// 2. 否则经工厂打开，写入缓存；并发打开时以先写入者为准。
    async fn handle(&self, series: &SeriesKey) -> Result<(u64, Arc<dyn RowStore>), StoreError> {
        let key = (series.asset_pair.clone(), series.interval);
        if let Some(slot) = self.handles.get(&key) {
            return Ok((slot.generation, slot.store.clone()));
        }

        let store = self.factory.open(&series.asset_pair, series.interval).await?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let slot = self
            .handles
            .entry(key)
            .or_insert(HandleSlot { generation, store });
        Ok((slot.generation, slot.store.clone()))
    }

    /// 作废指定代号的句柄并通知工厂释放连接，已被替换的新句柄不受影响。
    async fn evict(&self, series: &SeriesKey, generation: u64) {
        let key = (series.asset_pair.clone(), series.interval);
        if self
            .handles
            .remove_if(&key, |_, slot| slot.generation == generation)
            .is_some()
        {
            warn!("Reset row store handle for {}/{}", series.asset_pair, series.interval);
            self.factory
                .invalidate(&series.asset_pair, series.interval)
                .await;
        }
    }

    fn writer(&self, series: &SeriesKey) -> Arc<Mutex<()>> {
        self.writers.entry(series.clone()).or_default().clone()
    }

    async fn merge_into_rows(
        &self,
        store: &dyn RowStore,
        series: &SeriesKey,
        candles: &[Candle],
    ) -> Result<usize, StoreError> {
        let interval = series.interval;
        let mut groups: BTreeMap<DateTime<Utc>, Vec<&Candle>> = BTreeMap::new();
        for candle in candles {
            groups
                .entry(interval.bucket_start(candle.timestamp)?)
                .or_default()
                .push(candle);
        }

        let pk = partition_key(series.price_type);
        let keys: Vec<String> = groups.keys().map(|b| row_key(*b)).collect();
        let mut existing: HashMap<DateTime<Utc>, CandleRow> = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(self.chunk_size()) {
            for row in store.multi_get(&pk, chunk).await? {
                existing.insert(row.bucket_start, row);
            }
        }

        let mut touched = Vec::with_capacity(groups.len());
        for (bucket, group) in groups {
            let mut row = existing
                .remove(&bucket)
                .unwrap_or_else(|| CandleRow::new(series.price_type, bucket));
            for candle in group {
                row.merge_candle(candle)?;
            }
            touched.push(row);
        }

        let mut persisted = Vec::with_capacity(touched.len());
        for chunk in touched.chunks(self.chunk_size()) {
            if let Err(e) = store.upsert_batch(chunk).await {
                return Err(e.with_persisted(persisted));
            }
            persisted.extend(chunk.iter().map(|row| row.bucket_start));
        }
        Ok(touched.len())
    }

    async fn read_range(
        &self,
        store: &dyn RowStore,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        let interval = series.interval;
        let lo = row_key(interval.bucket_start(from)?);
        let hi = row_key(interval.bucket_start(to)?);
        let rows = store
            .range_query(&partition_key(series.price_type), &lo, &hi)
            .await?;

        let mut candles = Vec::new();
        for row in rows {
            candles.extend(
                row.to_candles(&series.asset_pair, interval)?
                    .into_iter()
                    .filter(|c| c.timestamp >= from && c.timestamp < to),
            );
        }
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }
}

#[async_trait]
impl CandleRepository for PartitionedRepository {
    /// # Summary
    /// 将同一序列的 K 线合并进存储行。
    ///
    /// # Logic
    /// 1. 校验全部 K 线属于同一序列。
    /// 2. 按分桶分组，分块批量读取已存在的行。
    /// 3. 缺失的行新建，逐根按到达顺序合并。
    /// 4. 分块批量写回被修改的行；中途失败时返回已落盘的分桶。
    ///
    /// 步骤 2-4 持有序列写锁。
    async fn insert_or_merge(&self, candles: &[Candle]) -> Result<(), StoreError> {
        let Some(first) = candles.first() else {
            return Ok(());
        };
        let series = first.series_key();
        if let Some(stray) = candles.iter().find(|c| !c.belongs_to(&series)) {
            return Err(StoreError::SeriesMismatch(format!(
                "{} mixed into a write for {}",
                stray.series_key(),
                series
            )));
        }

        let writer = self.writer(&series);
        let _guard = writer.lock().await;
        let (generation, store) = self.handle(&series).await?;
        match self.merge_into_rows(store.as_ref(), &series, candles).await {
            Ok(rows) => {
                debug!("Merged {} candles into {} rows for {}", candles.len(), rows, series);
                Ok(())
            }
            Err(e) => {
                self.evict(&series, generation).await;
                Err(e)
            }
        }
    }

    async fn query(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        if from >= to {
            return Ok(Vec::new());
        }
        let (generation, store) = self.handle(series).await?;
        let result = self.read_range(store.as_ref(), series, from, to).await;
        if result.is_err() {
            self.evict(series, generation).await;
        }
        result
    }

    /// # Summary
    /// 自 `upper_bound` 向过去自适应扩张窗口，收集最近的 `count` 根 K 线。
    ///
    /// # Logic
    /// 1. 首个窗口为 `count` 个周期，结束于 `truncate(upper_bound)` 之后一个周期。
    /// 2. 每轮窗口向前衔接且长度翻倍。
    /// 3. 收集足够、超过最大轮数、触及最早时间或连续空窗口过多时停止。
    ///
    /// # Returns
    /// 至多 `count` 根，按时间升序。
    async fn get_recent(
        &self,
        series: &SeriesKey,
        count: usize,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let interval = series.interval;
        let floor = self.config.recent_floor;
        let mut window_end = interval.add_ticks(interval.truncate(upper_bound)?, 1)?;
        let mut span = i64::try_from(count).unwrap_or(i64::MAX);
        let mut collected: Vec<Candle> = Vec::new();
        let mut empty_run = 0;

        for _ in 0..self.config.recent_max_steps {
            let window_start = interval
                .add_ticks(window_end, -span)
                .map_or(floor, |t| t.max(floor));
            if window_start >= window_end {
                break;
            }

            let found = self.query(series, window_start, window_end).await?;
            if found.is_empty() {
                empty_run += 1;
            } else {
                empty_run = 0;
                collected.extend(found.into_iter().filter(|c| c.timestamp <= upper_bound));
            }

            if collected.len() >= count
                || empty_run >= self.config.recent_max_empty_windows
                || window_start <= floor
            {
                break;
            }
            window_end = window_start;
            span = span.saturating_mul(2);
        }

        collected.sort_by_key(|c| c.timestamp);
        let skip = collected.len().saturating_sub(count);
        Ok(collected.into_iter().skip(skip).collect())
    }
}
