use crate::queue::WriteQueue;
use candela_core::cache::port::CandleCache;
use candela_core::candle::entity::{Candle, CandleUpdate};
use candela_core::ingest::error::IngestError;
use candela_core::ingest::port::SeriesCatalog;
use std::sync::Arc;
use tracing::debug;

/// 摄入结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    // 已写入缓存并入队
    Admitted,
    // 序列未启用，未产生任何副作用
    Rejected,
}

/// # Summary
/// 摄入编排器：每根 K 线先写窗口缓存，再进入写队列。
///
/// # Invariants
/// - 未启用的序列既不进缓存也不入队。
/// - 可被任意多个上游任务并发调用。
pub struct CandleIngestor {
    catalog: Arc<dyn SeriesCatalog>,
    cache: Arc<dyn CandleCache>,
    queue: Arc<WriteQueue>,
}

impl CandleIngestor {
    pub fn new(
        catalog: Arc<dyn SeriesCatalog>,
        cache: Arc<dyn CandleCache>,
        queue: Arc<WriteQueue>,
    ) -> Self {
        Self {
            catalog,
            cache,
            queue,
        }
    }

    /// # Summary
    /// 处理一根 K 线。
    ///
    /// # Logic
    /// 1. 检查序列是否启用，否则拒绝。
    /// 2. 写入窗口缓存。
    /// 3. 放入写队列，可能因背压短暂休眠。
    ///
    /// # Returns
    /// 接纳结果；缓存或队列失败时返回带序列上下文的 `IngestError`。
    pub async fn process(&self, candle: Candle) -> Result<Admission, IngestError> {
        if !self.catalog.is_supported(&candle.asset_pair, candle.interval) {
            debug!(
                "Rejected candle for unsupported series {}/{}",
                candle.asset_pair, candle.interval
            );
            return Ok(Admission::Rejected);
        }

        let series = candle.series_key();
        self.cache
            .upsert(&candle)
            .await
            .map_err(|source| IngestError::Cache {
                series: series.to_string(),
                source,
            })?;
        self.queue
            .enqueue(candle)
            .await
            .map_err(|source| IngestError::Queue {
                series: series.to_string(),
                source,
            })?;
        Ok(Admission::Admitted)
    }

    /// 将上游更新事件转换为 K 线后处理。
    pub async fn process_update(&self, update: CandleUpdate) -> Result<Admission, IngestError> {
        let series = format!("{}:{}:{}", update.asset_pair, update.price_type, update.interval);
        let candle = Candle::from_update(update)
            .map_err(|source| IngestError::Candle { series, source })?;
        self.process(candle).await
    }
}
