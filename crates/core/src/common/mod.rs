pub mod interval;
pub mod time;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// 报价类型枚举，决定 K 线的合并语义。
///
/// # Invariants
/// - `Trade` 使用累加语义，其余类型使用“最新者胜出 + 滚动极值”语义。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PriceType {
    // 卖价
    Ask,
    // 买价
    Bid,
    // 中间价
    Mid,
    // 成交价
    Trade,
}

impl PriceType {
    /// 全部报价类型，按声明顺序。
    pub fn all() -> &'static [PriceType] {
        &[PriceType::Ask, PriceType::Bid, PriceType::Mid, PriceType::Trade]
    }

    /// 是否为成交类 K 线（累加语义）。
    pub fn is_trade(self) -> bool {
        matches!(self, PriceType::Trade)
    }
}

impl FromStr for PriceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ask" => Ok(PriceType::Ask),
            "bid" => Ok(PriceType::Bid),
            "mid" => Ok(PriceType::Mid),
            "trade" => Ok(PriceType::Trade),
            _ => Err(format!("Unknown PriceType: {}", s)),
        }
    }
}

impl std::fmt::Display for PriceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceType::Ask => write!(f, "Ask"),
            PriceType::Bid => write!(f, "Bid"),
            PriceType::Mid => write!(f, "Mid"),
            PriceType::Trade => write!(f, "Trade"),
        }
    }
}

/// # Summary
/// K 线时间周期枚举，按跨度从小到大有序。
///
/// # Invariants
/// - 派生的 `Ord` 与声明顺序一致：Sec < Minute < ... < Month。
/// - 分桶与刻度换算见 `interval` 子模块。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    Sec,
    Minute,
    Min5,
    Min15,
    Min30,
    Hour,
    Hour4,
    Hour6,
    Hour12,
    Day,
    Week,
    Month,
}

impl Interval {
    /// 全部周期，升序。
    pub fn all() -> &'static [Interval] {
        &[
            Interval::Sec,
            Interval::Minute,
            Interval::Min5,
            Interval::Min15,
            Interval::Min30,
            Interval::Hour,
            Interval::Hour4,
            Interval::Hour6,
            Interval::Hour12,
            Interval::Day,
            Interval::Week,
            Interval::Month,
        ]
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sec" | "1s" => Ok(Interval::Sec),
            "minute" | "1m" => Ok(Interval::Minute),
            "min5" | "5m" => Ok(Interval::Min5),
            "min15" | "15m" => Ok(Interval::Min15),
            "min30" | "30m" => Ok(Interval::Min30),
            "hour" | "1h" => Ok(Interval::Hour),
            "hour4" | "4h" => Ok(Interval::Hour4),
            "hour6" | "6h" => Ok(Interval::Hour6),
            "hour12" | "12h" => Ok(Interval::Hour12),
            "day" | "1d" => Ok(Interval::Day),
            "week" | "1w" => Ok(Interval::Week),
            "month" | "1mo" => Ok(Interval::Month),
            _ => Err(format!("Unknown Interval: {}", s)),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Interval::Sec => "Sec",
            Interval::Minute => "Minute",
            Interval::Min5 => "Min5",
            Interval::Min15 => "Min15",
            Interval::Min30 => "Min30",
            Interval::Hour => "Hour",
            Interval::Hour4 => "Hour4",
            Interval::Hour6 => "Hour6",
            Interval::Hour12 => "Hour12",
            Interval::Day => "Day",
            Interval::Week => "Week",
            Interval::Month => "Month",
        };
        write!(f, "{}", name)
    }
}

/// # Summary
/// K 线序列的唯一身份：资产对 + 报价类型 + 周期。
///
/// # Invariants
/// - 同一序列内所有 K 线共享该键。
/// - 缓存、队列分组与持久化句柄均以此为维度隔离。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    // 资产对代码 (例如: EURUSD, BTCUSD)
    pub asset_pair: String,
    // 报价类型
    pub price_type: PriceType,
    // 周期
    pub interval: Interval,
}

impl SeriesKey {
    pub fn new(asset_pair: impl Into<String>, price_type: PriceType, interval: Interval) -> Self {
        Self {
            asset_pair: asset_pair.into(),
            price_type,
            interval,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.asset_pair, self.price_type, self.interval)
    }
}
