use crate::candle::entity::Candle;
use crate::candle::error::CandleError;
use crate::candle::merge;
use crate::common::{Interval, PriceType};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 行键的时间格式，字典序与时间序一致。
const ROW_KEY_FORMAT: &str = "%Y%m%dT%H%M%S";

/// # Summary
/// 存储行内单个刻度的 K 线快照。
///
/// # Invariants
/// - 不携带序列键与绝对时间，二者由所在行与周期还原。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSnapshot {
    // 行内刻度
    pub tick: u32,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub trading_volume: Decimal,
    pub trading_opposite_volume: Decimal,
    pub last_trade_price: Decimal,
    pub last_update_timestamp: DateTime<Utc>,
}

impl TickSnapshot {
    fn from_candle(tick: u32, candle: &Candle) -> Self {
        Self {
            tick,
            open: candle.open,
            close: candle.close,
            high: candle.high,
            low: candle.low,
            trading_volume: candle.trading_volume,
            trading_opposite_volume: candle.trading_opposite_volume,
            last_trade_price: candle.last_trade_price,
            last_update_timestamp: candle.last_update_timestamp,
        }
    }
}

/// # Summary
/// 持久化行实体：一个报价类型在一个分桶内的全部 K 线。
///
/// # Invariants
/// - 以 (price_type, bucket_start) 为键。
/// - `ticks` 每个刻度至多一条，任何修改后均按刻度升序排列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleRow {
    // 报价类型，作为分区键
    pub price_type: PriceType,
    // 分桶起点，作为行键
    pub bucket_start: DateTime<Utc>,
    // 按刻度升序的快照列表
    pub ticks: Vec<TickSnapshot>,
}

impl CandleRow {
    /// 创建空行。
    pub fn new(price_type: PriceType, bucket_start: DateTime<Utc>) -> Self {
        Self {
            price_type,
            bucket_start,
            ticks: Vec::new(),
        }
    }

    /// 分区键：报价类型名称。
    pub fn partition_key(&self) -> String {
        partition_key(self.price_type)
    }

    /// 行键：分桶起点的可排序字符串。
    pub fn row_key(&self) -> String {
        row_key(self.bucket_start)
    }

    /// # Summary
    /// 将一根 K 线折叠进本行。
    ///
    /// # Logic
    /// 1. 校验报价类型与分桶起点匹配。
    /// 2. 二分查找刻度：已存在则按合并规则替换，否则插入到有序位置。
    ///
    /// # Arguments
    /// * `candle`: 待合并的 K 线，周期即本行所属周期。
    ///
    /// # Returns
    /// 成功返回 Ok，分桶不匹配返回 `CandleError::InvalidTick`。
    pub fn merge_candle(&mut self, candle: &Candle) -> Result<(), CandleError> {
        let interval = candle.interval;
        if candle.price_type != self.price_type
            || interval.bucket_start(candle.timestamp)? != self.bucket_start
        {
            return Err(CandleError::InvalidTick(format!(
                "{} at {} does not belong to row {}/{}",
                candle.series_key(),
                candle.timestamp,
                self.partition_key(),
                self.row_key()
            )));
        }

        let tick = interval.tick(candle.timestamp)?;
        match self.ticks.binary_search_by_key(&tick, |s| s.tick) {
            Ok(idx) => {
                if let Some(slot) = self.ticks.get_mut(idx) {
                    let existing = snapshot_to_candle(
                        slot,
                        (&candle.asset_pair, self.price_type, interval),
                        candle.timestamp,
                    );
                    let merged = merge::merge(&existing, candle)?;
                    *slot = TickSnapshot::from_candle(tick, &merged);
                }
            }
            Err(idx) => self.ticks.insert(idx, TickSnapshot::from_candle(tick, candle)),
        }
        Ok(())
    }

    /// # Summary
    /// 将本行展开为带绝对时间的 K 线，按时间升序。
    ///
    /// # Arguments
    /// * `asset_pair`: 行所属资产对。
    /// * `interval`: 行所属周期。
    pub fn to_candles(
        &self,
        asset_pair: &str,
        interval: Interval,
    ) -> Result<Vec<Candle>, CandleError> {
        self.ticks
            .iter()
            .map(|s| {
                let timestamp = interval.tick_to_time(self.bucket_start, s.tick)?;
                Ok(snapshot_to_candle(s, (asset_pair, self.price_type, interval), timestamp))
            })
            .collect()
    }
}

fn snapshot_to_candle(
    snapshot: &TickSnapshot,
    series: (&str, PriceType, Interval),
    timestamp: DateTime<Utc>,
) -> Candle {
    let (asset_pair, price_type, interval) = series;
    Candle {
        asset_pair: asset_pair.to_string(),
        price_type,
        interval,
        timestamp,
        open: snapshot.open,
        close: snapshot.close,
        high: snapshot.high,
        low: snapshot.low,
        trading_volume: snapshot.trading_volume,
        trading_opposite_volume: snapshot.trading_opposite_volume,
        last_trade_price: snapshot.last_trade_price,
        last_update_timestamp: snapshot.last_update_timestamp,
    }
}

/// 报价类型对应的分区键。
pub fn partition_key(price_type: PriceType) -> String {
    price_type.to_string()
}

/// 分桶起点对应的行键。
pub fn row_key(bucket_start: DateTime<Utc>) -> String {
    bucket_start.format(ROW_KEY_FORMAT).to_string()
}

/// 解析行键为分桶起点。
pub fn parse_row_key(key: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(key, ROW_KEY_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
