//! 测试辅助：内存版存储句柄与仓储，仅在 `test-utils` feature 下编译。

use crate::candle::entity::Candle;
use crate::common::{Interval, SeriesKey};
use crate::store::entity::CandleRow;
use crate::store::error::StoreError;
use crate::store::port::{CandleRepository, RowStore, RowStoreFactory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type MemTable = DashMap<(String, String), CandleRow>;

fn take_failure(failures: &AtomicUsize) -> bool {
    failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// # Summary
/// 内存表句柄，可注入失败以模拟瞬时故障。
pub struct MemRowStore {
    table: Arc<MemTable>,
    failures: Arc<AtomicUsize>,
    multi_get_calls: Arc<AtomicUsize>,
    upserts: Arc<UpsertFaults>,
}

/// 按调用序号注入 `upsert_batch` 失败。
#[derive(Default)]
struct UpsertFaults {
    calls: AtomicUsize,
    // 将要失败的调用序号
    fail_at: Mutex<Vec<usize>>,
}

impl UpsertFaults {
    fn should_fail(&self) -> bool {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut fail_at = self.fail_at.lock().unwrap_or_else(|e| e.into_inner());
        match fail_at.iter().position(|&n| n == call) {
            Some(i) => {
                fail_at.swap_remove(i);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl RowStore for MemRowStore {
    async fn multi_get(
        &self,
        partition_key: &str,
        row_keys: &[String],
    ) -> Result<Vec<CandleRow>, StoreError> {
        if take_failure(&self.failures) {
            return Err(StoreError::Database("injected multi_get failure".into()));
        }
        self.multi_get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(row_keys
            .iter()
            .filter_map(|k| {
                self.table
                    .get(&(partition_key.to_string(), k.clone()))
                    .map(|r| r.value().clone())
            })
            .collect())
    }

    async fn upsert_batch(&self, rows: &[CandleRow]) -> Result<(), StoreError> {
        if self.upserts.should_fail() || take_failure(&self.failures) {
            return Err(StoreError::Database("injected upsert failure".into()));
        }
        for row in rows {
            self.table
                .insert((row.partition_key(), row.row_key()), row.clone());
        }
        Ok(())
    }

    async fn range_query(
        &self,
        partition_key: &str,
        row_key_from: &str,
        row_key_to: &str,
    ) -> Result<Vec<CandleRow>, StoreError> {
        if take_failure(&self.failures) {
            return Err(StoreError::Database("injected range_query failure".into()));
        }
        let mut rows: Vec<CandleRow> = self
            .table
            .iter()
            .filter(|e| {
                let (p, r) = e.key();
                p == partition_key && r.as_str() >= row_key_from && r.as_str() <= row_key_to
            })
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|r| r.bucket_start);
        Ok(rows)
    }
}

/// # Summary
/// 内存句柄工厂：同一 (资产对, 周期) 的句柄共享同一张表，模拟持久化数据。
#[derive(Default)]
pub struct MemRowStoreFactory {
    tables: DashMap<(String, Interval), Arc<MemTable>>,
    opens: AtomicUsize,
    invalidations: AtomicUsize,
    failures: Arc<AtomicUsize>,
    multi_get_calls: Arc<AtomicUsize>,
    upserts: Arc<UpsertFaults>,
}

impl MemRowStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来 `n` 次句柄调用返回错误。
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// 从现在起第 `calls` 中各次 `upsert_batch` 调用失败（从 1 计数），其余调用不受影响。
    pub fn fail_upsert_calls(&self, calls: &[usize]) {
        let done = self.upserts.calls.load(Ordering::SeqCst);
        let mut fail_at = self.upserts.fail_at.lock().unwrap_or_else(|e| e.into_inner());
        fail_at.extend(calls.iter().map(|n| done + n));
    }

    /// 句柄被作废的次数。
    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// 句柄被打开的次数。
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// 成功执行的 multi_get 次数。
    pub fn multi_get_calls(&self) -> usize {
        self.multi_get_calls.load(Ordering::SeqCst)
    }

    /// 读取某表的全部行。
    pub fn rows(&self, asset_pair: &str, interval: Interval) -> Vec<CandleRow> {
        let mut rows: Vec<CandleRow> = self
            .tables
            .get(&(asset_pair.to_string(), interval))
            .map(|t| t.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default();
        rows.sort_by_key(|r| (r.partition_key(), r.bucket_start));
        rows
    }
}

#[async_trait]
impl RowStoreFactory for MemRowStoreFactory {
    async fn open(
        &self,
        asset_pair: &str,
        interval: Interval,
    ) -> Result<Arc<dyn RowStore>, StoreError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let table = self
            .tables
            .entry((asset_pair.to_string(), interval))
            .or_default()
            .clone();
        Ok(Arc::new(MemRowStore {
            table,
            failures: self.failures.clone(),
            multi_get_calls: self.multi_get_calls.clone(),
            upserts: self.upserts.clone(),
        }))
    }

    async fn invalidate(&self, _asset_pair: &str, _interval: Interval) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

/// # Summary
/// 记录型仓储：保存每次 `insert_or_merge` 的输入，可让指定资产对持续失败。
#[derive(Default)]
pub struct RecordingRepository {
    batches: Mutex<Vec<Vec<Candle>>>,
    failing_pairs: DashSet<String>,
}

impl RecordingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让该资产对的写入持续失败。
    pub fn fail_pair(&self, asset_pair: &str) {
        self.failing_pairs.insert(asset_pair.to_string());
    }

    /// 恢复该资产对的写入。
    pub fn heal_pair(&self, asset_pair: &str) {
        self.failing_pairs.remove(asset_pair);
    }

    /// 成功写入的全部批次。
    pub fn batches(&self) -> Vec<Vec<Candle>> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 成功写入的全部 K 线，按写入顺序展开。
    pub fn candles(&self) -> Vec<Candle> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl CandleRepository for RecordingRepository {
    async fn insert_or_merge(&self, candles: &[Candle]) -> Result<(), StoreError> {
        if let Some(first) = candles.first()
            && self.failing_pairs.contains(&first.asset_pair)
        {
            return Err(StoreError::Database(format!("{} is unavailable", first.asset_pair)));
        }
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(candles.to_vec());
        Ok(())
    }

    async fn query(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        let mut found: Vec<Candle> = self
            .candles()
            .into_iter()
            .filter(|c| c.belongs_to(series) && c.timestamp >= from && c.timestamp < to)
            .collect();
        found.sort_by_key(|c| c.timestamp);
        Ok(found)
    }

    async fn get_recent(
        &self,
        series: &SeriesKey,
        count: usize,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        let mut found: Vec<Candle> = self
            .candles()
            .into_iter()
            .filter(|c| c.belongs_to(series) && c.timestamp <= upper_bound)
            .collect();
        found.sort_by_key(|c| c.timestamp);
        let skip = found.len().saturating_sub(count);
        Ok(found.into_iter().skip(skip).collect())
    }
}
