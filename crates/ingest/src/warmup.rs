use candela_core::cache::port::CandleCache;
use candela_core::common::SeriesKey;
use candela_core::common::time::Clock;
use candela_core::store::port::CandleRepository;
use std::sync::Arc;
use tracing::{info, warn};

/// 预热结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmupReport {
    pub warmed: usize,
    pub failed: usize,
}

/// # Summary
/// 缓存预热器：从仓储读取每个序列最近的 N 根 K 线填充窗口。
///
/// # Invariants
/// - 当前时刻经 `Clock` 获取。
/// - 单个序列失败只记录日志，不影响其他序列。
pub struct CacheWarmer {
    repository: Arc<dyn CandleRepository>,
    cache: Arc<dyn CandleCache>,
    clock: Arc<dyn Clock>,
    capacity: usize,
}

impl CacheWarmer {
    pub fn new(
        repository: Arc<dyn CandleRepository>,
        cache: Arc<dyn CandleCache>,
        clock: Arc<dyn Clock>,
        capacity: usize,
    ) -> Self {
        Self {
            repository,
            cache,
            clock,
            capacity,
        }
    }

    pub async fn warm(&self, series: &[SeriesKey]) -> WarmupReport {
        let now = self.clock.now();
        let mut report = WarmupReport::default();
        for key in series {
            let candles = match self.repository.get_recent(key, self.capacity, now).await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("Warm-up read failed for {}: {}", key, e);
                    report.failed += 1;
                    continue;
                }
            };
            match self.cache.initialize(key, candles).await {
                Ok(()) => report.warmed += 1,
                Err(e) => {
                    warn!("Warm-up initialize failed for {}: {}", key, e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "Cache warm-up finished: {} series warmed, {} failed",
            report.warmed, report.failed
        );
        report
    }
}
