use async_trait::async_trait;
use candela_core::candle::entity::Candle;
use candela_core::common::SeriesKey;
use candela_core::retry::RetryPolicy;
use candela_core::store::error::StoreError;
use candela_core::store::port::CandleRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, warn};

/// # Summary
/// 为写入注入重试策略的仓储装饰器。
///
/// # Logic
/// 1. 瞬时故障按策略指数退避后重试，每次失败都带序列上下文记录日志。
/// 2. 部分分桶已落盘时，只重投其余分桶的 K 线。
/// 3. 契约违规（如序列混杂）不重试，直接返回。
/// 4. 读操作直接透传。
///
/// # Invariants
/// * 无限策略下写入只会成功返回，调用方的在途任务会一直占用直到存储恢复。
/// * 放弃时返回的错误包含所有尝试中已落盘的分桶。
pub struct RetryingRepository {
    inner: Arc<dyn CandleRepository>,
    policy: RetryPolicy,
}

impl RetryingRepository {
    pub fn new(inner: Arc<dyn CandleRepository>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl CandleRepository for RetryingRepository {
    async fn insert_or_merge(&self, candles: &[Candle]) -> Result<(), StoreError> {
        let Some(first) = candles.first() else {
            return Ok(());
        };
        let series = first.series_key();
        let mut pending: Vec<Candle> = candles.to_vec();
        let mut persisted: Vec<DateTime<Utc>> = Vec::new();
        let mut attempts: u32 = 0;

        loop {
            let err = match self.inner.insert_or_merge(&pending).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            attempts = attempts.saturating_add(1);
            pending = err.unpersisted(&pending);
            let (written, cause) = err.into_parts();
            persisted.extend(written);

            if !cause.is_transient() {
                error!("Rejected write of {} candles for {}: {}", pending.len(), series, cause);
                return Err(cause.with_persisted(persisted));
            }
            if pending.is_empty() {
                return Ok(());
            }
            if !self.policy.allows_retry(attempts) {
                error!(
                    "Giving up on {} candles for {} after {} attempts: {}",
                    pending.len(),
                    series,
                    attempts,
                    cause
                );
                return Err(cause.with_persisted(persisted));
            }

            let delay = self.policy.delay_for(attempts - 1);
            warn!(
                "Write of {} candles for {} failed (attempt {}), retrying in {:?}: {}",
                pending.len(),
                series,
                attempts,
                delay,
                cause
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn query(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        self.inner.query(series, from, to).await
    }

    async fn get_recent(
        &self,
        series: &SeriesKey,
        count: usize,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        self.inner.get_recent(series, count, upper_bound).await
    }
}
