use candela_core::common::{Interval, PriceType, SeriesKey};
use candela_core::config::SeriesConfig;
use candela_core::ingest::port::SeriesCatalog;
use std::collections::{BTreeSet, HashSet};

/// # Summary
/// 由配置静态确定的序列目录。
///
/// # Invariants
/// - 启用的序列为 资产对 × 报价类型 × 周期 的笛卡尔积。
pub struct StaticSeriesCatalog {
    asset_pairs: BTreeSet<String>,
    price_types: Vec<PriceType>,
    intervals: HashSet<Interval>,
}

impl StaticSeriesCatalog {
    pub fn new(
        asset_pairs: impl IntoIterator<Item = String>,
        price_types: Vec<PriceType>,
        intervals: impl IntoIterator<Item = Interval>,
    ) -> Self {
        Self {
            asset_pairs: asset_pairs.into_iter().collect(),
            price_types,
            intervals: intervals.into_iter().collect(),
        }
    }

    pub fn from_config(config: &SeriesConfig) -> Self {
        Self::new(
            config.asset_pairs.iter().cloned(),
            config.price_types.clone(),
            config.intervals.iter().copied(),
        )
    }
}

impl SeriesCatalog for StaticSeriesCatalog {
    fn is_supported(&self, asset_pair: &str, interval: Interval) -> bool {
        self.asset_pairs.contains(asset_pair) && self.intervals.contains(&interval)
    }

    fn series(&self) -> Vec<SeriesKey> {
        let mut intervals: Vec<Interval> = self.intervals.iter().copied().collect();
        intervals.sort();
        let total = self.asset_pairs.len() * self.price_types.len() * intervals.len();
        let mut out = Vec::with_capacity(total);
        for pair in &self.asset_pairs {
            for price_type in &self.price_types {
                for interval in &intervals {
                    out.push(SeriesKey::new(pair.clone(), *price_type, *interval));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_support_and_series() {
        let catalog = StaticSeriesCatalog::new(
            ["EURUSD".to_string(), "BTCUSD".to_string()],
            vec![PriceType::Bid, PriceType::Trade],
            [Interval::Hour, Interval::Minute],
        );
        assert!(catalog.is_supported("EURUSD", Interval::Minute));
        assert!(!catalog.is_supported("EURUSD", Interval::Day));
        assert!(!catalog.is_supported("GBPUSD", Interval::Minute));

        let series = catalog.series();
        assert_eq!(series.len(), 8);
        assert_eq!(series[0], SeriesKey::new("BTCUSD", PriceType::Bid, Interval::Minute));
    }
}
