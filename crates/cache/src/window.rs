use async_trait::async_trait;
use candela_core::cache::error::CacheError;
use candela_core::cache::port::{CacheSnapshot, CandleCache, SeriesSnapshot};
use candela_core::candle::entity::Candle;
use candela_core::common::SeriesKey;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

type Window = Arc<Mutex<VecDeque<Candle>>>;

/// # Summary
/// 进程内滑动窗口缓存，每个序列保留最近 N 根 K 线。
///
/// # Invariants
/// - 序列集合为并发哈希表，不同序列互不争用。
/// - 每个序列独占一把互斥锁，窗口内按时间严格升序且时间戳唯一。
/// - 窗口长度永不超过 `capacity`。
pub struct SlidingWindowCache {
    // 每个序列的最大长度 N
    capacity: usize,
    // 序列窗口注册表
    windows: DashMap<SeriesKey, Window>,
}

impl SlidingWindowCache {
    /// # Summary
    /// 创建缓存实例。
    ///
    /// # Arguments
    /// * `capacity`: 每个序列的最大长度，至少为 1。
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn window(&self, series: &SeriesKey) -> Window {
        self.windows
            .entry(series.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity))))
            .clone()
    }

    fn existing_window(&self, series: &SeriesKey) -> Option<Window> {
        self.windows.get(series).map(|w| w.value().clone())
    }

    /// 按时间排序、去重并保留最新的 N 根。
    fn trim_newest(&self, mut candles: Vec<Candle>) -> VecDeque<Candle> {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by(|later, earlier| {
            if later.timestamp != earlier.timestamp {
                return false;
            }
            if later.last_update_timestamp > earlier.last_update_timestamp {
                std::mem::swap(later, earlier);
            }
            true
        });
        let skip = candles.len().saturating_sub(self.capacity);
        candles.into_iter().skip(skip).collect()
    }
}

/// # Summary
/// 将一根 K 线放入窗口。
///
/// # Logic
/// 1. 从最新端向前扫描。
/// 2. 遇到相同时间戳：仅当新值更新时间更晚时替换。
/// 3. 遇到更早的时间戳：插入其后，随后从最旧端淘汰至容量以内。
/// 4. 比全部元素都旧：窗口已满则丢弃，否则放到最旧端。
///
/// # Returns
/// 窗口是否发生变化。
fn place(window: &mut VecDeque<Candle>, candle: &Candle, capacity: usize) -> bool {
    for idx in (0..window.len()).rev() {
        let Some(current) = window.get_mut(idx) else {
            continue;
        };
        if current.timestamp == candle.timestamp {
            if candle.last_update_timestamp > current.last_update_timestamp {
                *current = candle.clone();
                return true;
            }
            return false;
        }
        if current.timestamp < candle.timestamp {
            window.insert(idx + 1, candle.clone());
            while window.len() > capacity {
                window.pop_front();
            }
            return true;
        }
    }

    if window.len() >= capacity {
        debug!(
            "Discarding {} at {}: older than the cached window",
            candle.series_key(),
            candle.timestamp
        );
        return false;
    }
    window.push_front(candle.clone());
    true
}

#[async_trait]
impl CandleCache for SlidingWindowCache {
    async fn initialize(&self, series: &SeriesKey, candles: Vec<Candle>) -> Result<(), CacheError> {
        let own: Vec<Candle> = candles.into_iter().filter(|c| c.belongs_to(series)).collect();
        let trimmed = self.trim_newest(own);
        debug!("Initialized window {} with {} candles", series, trimmed.len());
        let window = self.window(series);
        let mut guard = window.lock().unwrap_or_else(|e| e.into_inner());
        *guard = trimmed;
        Ok(())
    }

    async fn upsert(&self, candle: &Candle) -> Result<(), CacheError> {
        let window = self.window(&candle.series_key());
        let mut guard = window.lock().unwrap_or_else(|e| e.into_inner());
        place(&mut guard, candle, self.capacity);
        Ok(())
    }

    async fn query(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, CacheError> {
        let Some(window) = self.existing_window(series) else {
            return Ok(Vec::new());
        };
        let guard = window.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard
            .iter()
            .filter(|c| c.timestamp >= from && c.timestamp < to)
            .cloned()
            .collect())
    }

    async fn series_len(&self, series: &SeriesKey) -> Result<usize, CacheError> {
        Ok(self
            .existing_window(series)
            .map(|w| w.lock().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0))
    }

    async fn export_snapshot(&self) -> Result<CacheSnapshot, CacheError> {
        let handles: Vec<(SeriesKey, Window)> = self
            .windows
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let mut series: Vec<SeriesSnapshot> = handles
            .into_iter()
            .map(|(key, window)| {
                let guard = window.lock().unwrap_or_else(|e| e.into_inner());
                SeriesSnapshot {
                    series: key,
                    candles: guard.iter().cloned().collect(),
                }
            })
            .filter(|s| !s.candles.is_empty())
            .collect();
        series.sort_by(|a, b| a.series.cmp(&b.series));
        Ok(CacheSnapshot { series })
    }

    async fn import_snapshot(&self, snapshot: CacheSnapshot) -> Result<(), CacheError> {
        for entry in snapshot.series {
            self.initialize(&entry.series, entry.candles).await?;
        }
        Ok(())
    }
}
