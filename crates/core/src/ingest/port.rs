use crate::common::{Interval, SeriesKey};

/// # Summary
/// 序列目录接口，由外部协作方决定哪些资产对与周期被启用。
///
/// # Invariants
/// - 核心只读取目录，从不修改。
pub trait SeriesCatalog: Send + Sync {
    /// 资产对与周期组合是否被支持。
    fn is_supported(&self, asset_pair: &str, interval: Interval) -> bool;

    /// 全部启用的序列，用于缓存预热。
    fn series(&self) -> Vec<SeriesKey>;
}
