use crate::candle::error::CandleError;
use crate::common::{Interval, PriceType, SeriesKey};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// # Summary
/// 单根 K 线数据实体，记录某序列在一个对齐时间槽内的 OHLC 聚合。
///
/// # Invariants
/// - `timestamp` 恒等于 `interval.truncate(原始时间)`。
/// - 实体不可变：合并总是产生新值替换旧值，从不原地修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    // 资产对代码
    pub asset_pair: String,
    // 报价类型
    pub price_type: PriceType,
    // 周期
    pub interval: Interval,
    // K 线开始时间 (已对齐)
    pub timestamp: DateTime<Utc>,
    // 开盘价
    pub open: Decimal,
    // 收盘价
    pub close: Decimal,
    // 最高价
    pub high: Decimal,
    // 最低价
    pub low: Decimal,
    // 成交量 (基础货币)
    pub trading_volume: Decimal,
    // 对手方成交量 (计价货币)
    pub trading_opposite_volume: Decimal,
    // 最近成交价
    pub last_trade_price: Decimal,
    // 最近一次更新的时间，用于判断新旧
    pub last_update_timestamp: DateTime<Utc>,
}

impl Candle {
    /// 该 K 线所属序列的身份键。
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.asset_pair.clone(), self.price_type, self.interval)
    }

    /// 是否与给定序列键属于同一序列。
    pub fn belongs_to(&self, series: &SeriesKey) -> bool {
        self.asset_pair == series.asset_pair
            && self.price_type == series.price_type
            && self.interval == series.interval
    }

    /// # Summary
    /// 由摄入事件创建首个观测值。
    ///
    /// # Logic
    /// 1. 将事件时间戳按周期对齐。
    /// 2. 事件未携带最近成交价时：成交类取收盘价，报价类取零。
    ///
    /// # Arguments
    /// * `update`: 摄入事件。
    ///
    /// # Returns
    /// 新建的 K 线，或时间越界错误。
    pub fn from_update(update: CandleUpdate) -> Result<Self, CandleError> {
        let timestamp = update.interval.truncate(update.timestamp)?;
        let last_trade_price = update.last_trade_price.unwrap_or(if update.price_type.is_trade() {
            update.close
        } else {
            Decimal::ZERO
        });
        Ok(Self {
            asset_pair: update.asset_pair,
            price_type: update.price_type,
            interval: update.interval,
            timestamp,
            open: update.open,
            close: update.close,
            high: update.high,
            low: update.low,
            trading_volume: update.volume,
            trading_opposite_volume: update.opposite_volume,
            last_trade_price,
            last_update_timestamp: update.update_timestamp,
        })
    }
}

/// # Summary
/// 上游消息总线推送的 K 线更新事件。
///
/// # Invariants
/// - `timestamp` 可以未对齐，进入核心前由 `Candle::from_update` 对齐。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleUpdate {
    pub asset_pair: String,
    pub price_type: PriceType,
    pub interval: Interval,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub opposite_volume: Decimal,
    // 原始 K 线时间
    pub timestamp: DateTime<Utc>,
    // 生成该观测值的时间
    pub update_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub last_trade_price: Option<Decimal>,
}
