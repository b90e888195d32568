//! K 线合并规则。
//!
//! 持久层与缓存层共享同一套纯函数：报价类 (Ask/Bid/Mid) 采用“最新者胜出 +
//! 滚动极值”，成交类 (Trade) 采用累加语义，允许乱序到达。

use crate::candle::entity::Candle;
use crate::candle::error::CandleError;

/// # Summary
/// 按报价类型选择合并规则，将新观测值折叠进已有状态。
///
/// # Logic
/// 1. 校验双方序列键与时间槽一致，不一致视为契约违规。
/// 2. `Trade` 走 `merge_trade`，其余走 `merge_quote`。
///
/// # Arguments
/// * `existing`: 已有状态。
/// * `incoming`: 新观测值。
///
/// # Returns
/// 合并后的新 K 线，或 `CandleError::SeriesMismatch`。
pub fn merge(existing: &Candle, incoming: &Candle) -> Result<Candle, CandleError> {
    ensure_same_slot(existing, incoming)?;
    if existing.price_type.is_trade() {
        Ok(merge_trade(existing, incoming))
    } else {
        Ok(merge_quote(existing, incoming))
    }
}

/// # Summary
/// 报价类 K 线合并。
///
/// # Logic
/// 1. 若新观测值的更新时间不晚于已有状态，原样返回已有状态。
/// 2. 否则收盘价、成交量、最近成交价与更新时间取新值，最高/最低取滚动极值。
/// 3. 开盘价在创建后永不改变。
pub fn merge_quote(existing: &Candle, incoming: &Candle) -> Candle {
    if incoming.last_update_timestamp <= existing.last_update_timestamp {
        return existing.clone();
    }
    Candle {
        close: incoming.close,
        high: existing.high.max(incoming.high),
        low: existing.low.min(incoming.low),
        trading_volume: incoming.trading_volume,
        trading_opposite_volume: incoming.trading_opposite_volume,
        last_trade_price: incoming.last_trade_price,
        last_update_timestamp: incoming.last_update_timestamp,
        ..existing.clone()
    }
}

/// # Summary
/// 成交类 K 线合并，新旧观测值均可折叠。
///
/// # Logic
/// 1. 极值合并，成交量累加（从不覆盖）。
/// 2. 收盘价、最近成交价与更新时间由时间上较晚的一方决定，与到达顺序无关。
pub fn merge_trade(existing: &Candle, incoming: &Candle) -> Candle {
    let existing_is_older = existing.last_update_timestamp <= incoming.last_update_timestamp;
    let latest = if existing_is_older { incoming } else { existing };
    Candle {
        high: existing.high.max(incoming.high),
        low: existing.low.min(incoming.low),
        trading_volume: existing.trading_volume + incoming.trading_volume,
        trading_opposite_volume: existing.trading_opposite_volume
            + incoming.trading_opposite_volume,
        close: latest.close,
        last_trade_price: latest.last_trade_price,
        last_update_timestamp: latest.last_update_timestamp,
        ..existing.clone()
    }
}

/// # Summary
/// 以调用方给出的聚合值整体替换（迁移生成器使用的规则）。
///
/// # Logic
/// 开盘价保留，其余字段无条件取 `aggregate` 的值，不做新旧判断与极值合并。
/// 与 `merge_quote` 刻意分开，持久化合并路径不得调用本函数。
pub fn replace_with_aggregate(
    existing: &Candle,
    aggregate: &Candle,
) -> Result<Candle, CandleError> {
    ensure_same_slot(existing, aggregate)?;
    Ok(Candle {
        open: existing.open,
        ..aggregate.clone()
    })
}

/// # Summary
/// 按到达顺序成对折叠同一时间槽的多个观测值。
///
/// # Returns
/// 空输入返回 None；首个观测值直接作为初始状态。
pub fn fold<'a, I>(observations: I) -> Result<Option<Candle>, CandleError>
where
    I: IntoIterator<Item = &'a Candle>,
{
    let mut state: Option<Candle> = None;
    for candle in observations {
        state = Some(match state {
            None => candle.clone(),
            Some(current) => merge(&current, candle)?,
        });
    }
    Ok(state)
}

fn ensure_same_slot(existing: &Candle, incoming: &Candle) -> Result<(), CandleError> {
    if existing.asset_pair != incoming.asset_pair
        || existing.price_type != incoming.price_type
        || existing.interval != incoming.interval
        || existing.timestamp != incoming.timestamp
    {
        return Err(CandleError::SeriesMismatch(format!(
            "{}@{} vs {}@{}",
            existing.series_key(),
            existing.timestamp,
            incoming.series_key(),
            incoming.timestamp
        )));
    }
    Ok(())
}
