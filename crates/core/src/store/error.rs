use crate::candle::entity::Candle;
use crate::candle::error::CandleError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// # Summary
/// 存储层错误枚举。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - `Database` 视为瞬时故障，可由重试策略重试；其余为契约违规。
/// - `PartialWrite` 是否可重试取决于其内部错误。
#[derive(Error, Debug)]
pub enum StoreError {
    /// 数据库操作失败
    #[error("Database error: {0}")]
    Database(String),
    /// 行数据序列化或反序列化失败
    #[error("Serialize error: {0}")]
    Serialize(String),
    /// 一次写入包含多个序列
    #[error("Series mismatch: {0}")]
    SeriesMismatch(String),
    /// K 线领域运算失败
    #[error(transparent)]
    Candle(#[from] CandleError),
    /// 初始化存储失败
    #[error("Initialization error: {0}")]
    InitError(String),
    /// 部分分桶已落盘后写入失败
    #[error("Partial write after {} buckets: {source}", .persisted.len())]
    PartialWrite {
        // 已落盘分桶的起点
        persisted: Vec<DateTime<Utc>>,
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// 是否为可重试的瞬时故障。
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(_) => true,
            StoreError::PartialWrite { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// 已落盘的分桶起点，非部分写入时为空。
    pub fn persisted_buckets(&self) -> &[DateTime<Utc>] {
        match self {
            StoreError::PartialWrite { persisted, .. } => persisted,
            _ => &[],
        }
    }

    /// # Summary
    /// 拆出已落盘分桶与根本原因。
    pub fn into_parts(self) -> (Vec<DateTime<Utc>>, StoreError) {
        match self {
            StoreError::PartialWrite { persisted, source } => (persisted, *source),
            other => (Vec::new(), other),
        }
    }

    /// # Summary
    /// 以已落盘分桶包装错误，没有落盘分桶时原样返回。
    pub fn with_persisted(self, mut persisted: Vec<DateTime<Utc>>) -> StoreError {
        let (already, source) = self.into_parts();
        persisted.extend(already);
        if persisted.is_empty() {
            return source;
        }
        persisted.sort();
        persisted.dedup();
        StoreError::PartialWrite {
            persisted,
            source: Box::new(source),
        }
    }

    /// # Summary
    /// 从一次写入的输入中挑出尚未落盘的 K 线。
    ///
    /// # Logic
    /// 所在分桶已落盘的 K 线已经合并进存储行，再次写入会重复累加成交量，必须剔除。
    /// 无法计算分桶的 K 线保留。
    pub fn unpersisted(&self, candles: &[Candle]) -> Vec<Candle> {
        let persisted = self.persisted_buckets();
        if persisted.is_empty() {
            return candles.to_vec();
        }
        candles
            .iter()
            .filter(|c| {
                c.interval
                    .bucket_start(c.timestamp)
                    .ok()
                    .is_none_or(|b| persisted.binary_search(&b).is_err())
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Interval, PriceType};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn trade(hour: i64) -> Candle {
        let timestamp =
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hour);
        Candle {
            asset_pair: "BTCUSD".into(),
            price_type: PriceType::Trade,
            interval: Interval::Minute,
            timestamp,
            open: dec!(1),
            close: dec!(1),
            high: dec!(1),
            low: dec!(1),
            trading_volume: dec!(1),
            trading_opposite_volume: dec!(1),
            last_trade_price: dec!(1),
            last_update_timestamp: timestamp,
        }
    }

    #[test]
    fn test_partial_write_keeps_unwritten_buckets() {
        let candles = vec![trade(0), trade(1), trade(2)];
        let first_bucket = trade(0).timestamp;
        let err = StoreError::Database("down".into()).with_persisted(vec![first_bucket]);

        assert!(err.is_transient());
        let left = err.unpersisted(&candles);
        assert_eq!(left, vec![trade(1), trade(2)]);

        // 多次部分写入的分桶累积
        let err = err.with_persisted(vec![trade(2).timestamp]);
        assert_eq!(err.persisted_buckets().len(), 2);
        assert_eq!(err.unpersisted(&candles), vec![trade(1)]);
    }

    #[test]
    fn test_plain_error_keeps_every_candle() {
        let candles = vec![trade(0), trade(1)];
        let err = StoreError::Database("down".into()).with_persisted(Vec::new());
        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(err.unpersisted(&candles).len(), 2);

        let rejected =
            StoreError::SeriesMismatch("mixed".into()).with_persisted(vec![trade(0).timestamp]);
        assert!(!rejected.is_transient());
    }
}
