//! 周期时间模型：对齐、分桶与刻度换算。
//!
//! 每个周期把时间戳映射到两级坐标：粗粒度的存储行起点 (bucket) 与行内的
//! 小整数偏移 (tick)。对任意时间戳 `t` 必须满足
//! `add_ticks(bucket_start(t), tick(t)) == truncate(t)`，多根 K 线因此共享同一存储行。

use super::Interval;
use crate::candle::error::CandleError;
use chrono::{DateTime, Datelike, Months, TimeDelta, TimeZone, Utc};

const SECONDS_PER_DAY: i64 = 86_400;

impl Interval {
    /// # Summary
    /// 单个周期跨度的秒数。
    ///
    /// # Returns
    /// 定长周期返回秒数；`Month` 长度不固定，返回 None。
    pub fn unit_seconds(self) -> Option<i64> {
        match self {
            Interval::Sec => Some(1),
            Interval::Minute => Some(60),
            Interval::Min5 => Some(300),
            Interval::Min15 => Some(900),
            Interval::Min30 => Some(1_800),
            Interval::Hour => Some(3_600),
            Interval::Hour4 => Some(14_400),
            Interval::Hour6 => Some(21_600),
            Interval::Hour12 => Some(43_200),
            Interval::Day => Some(SECONDS_PER_DAY),
            Interval::Week => Some(7 * SECONDS_PER_DAY),
            Interval::Month => None,
        }
    }

    /// # Summary
    /// 将时间戳向下对齐到周期的自然边界 (UTC)。
    ///
    /// # Logic
    /// 1. 秒至日级别：按 Unix 纪元对齐取整，UTC 日界恰为 86400 的整数倍。
    /// 2. 周：先对齐到日，再回退到周一 00:00。
    /// 3. 月：当月 1 日 00:00。
    ///
    /// # Arguments
    /// * `t`: 原始时间戳。
    ///
    /// # Returns
    /// 对齐后的时间戳；超出 chrono 表示范围时返回 `CandleError::TimeOutOfRange`。
    pub fn truncate(self, t: DateTime<Utc>) -> Result<DateTime<Utc>, CandleError> {
        match self {
            Interval::Month => month_start(t.year(), t.month()),
            Interval::Week => {
                let day = Interval::Day.truncate(t)?;
                let back = i64::from(day.weekday().num_days_from_monday());
                shift_seconds(day, -back * SECONDS_PER_DAY)
            }
            fixed => {
                let step = fixed
                    .unit_seconds()
                    .ok_or_else(|| out_of_range(fixed, t))?;
                let secs = t.timestamp().div_euclid(step) * step;
                DateTime::from_timestamp(secs, 0).ok_or_else(|| out_of_range(fixed, t))
            }
        }
    }

    /// # Summary
    /// 计算时间戳所属存储行的起点。
    ///
    /// # Logic
    /// - 秒、分钟族：所在小时。
    /// - 小时族：所在日。
    /// - 日：所在月的 1 日。
    /// - 周：对齐后周所在年份 1 月 1 日所在周的周一。
    /// - 月：所在年的 1 月 1 日。
    pub fn bucket_start(self, t: DateTime<Utc>) -> Result<DateTime<Utc>, CandleError> {
        match self {
            Interval::Sec
            | Interval::Minute
            | Interval::Min5
            | Interval::Min15
            | Interval::Min30 => Interval::Hour.truncate(t),
            Interval::Hour | Interval::Hour4 | Interval::Hour6 | Interval::Hour12 => {
                Interval::Day.truncate(t)
            }
            Interval::Day => Interval::Month.truncate(t),
            Interval::Week => {
                let week = Interval::Week.truncate(t)?;
                let new_year = month_start(week.year(), 1)?;
                Interval::Week.truncate(new_year)
            }
            Interval::Month => month_start(t.year(), 1),
        }
    }

    /// # Summary
    /// 计算时间戳在其存储行内的刻度偏移（以周期为单位）。
    ///
    /// # Logic
    /// 1. 定长周期：(对齐时间 - 行起点) / 周期秒数。
    /// 2. 月：月份序号 (0..=11)。
    ///
    /// # Returns
    /// 刻度值；理论上不会为负，若出现则返回 `CandleError::InvalidTick`。
    pub fn tick(self, t: DateTime<Utc>) -> Result<u32, CandleError> {
        let aligned = self.truncate(t)?;
        match self.unit_seconds() {
            Some(step) => {
                let bucket = self.bucket_start(t)?;
                let offset = (aligned - bucket).num_seconds() / step;
                u32::try_from(offset).map_err(|_| {
                    CandleError::InvalidTick(format!("{} tick {} for {}", self, offset, t))
                })
            }
            None => Ok(aligned.month0()),
        }
    }

    /// # Summary
    /// 将基准时间前移（或回退）`n` 个周期单位。
    ///
    /// # Logic
    /// 定长周期按秒数平移；月按日历月平移。`n` 为负时向过去移动。
    ///
    /// # Arguments
    /// * `base`: 起始时间。
    /// * `n`: 周期个数。
    ///
    /// # Returns
    /// 平移后的时间；溢出时返回 `CandleError::TimeOutOfRange`。
    pub fn add_ticks(self, base: DateTime<Utc>, n: i64) -> Result<DateTime<Utc>, CandleError> {
        match self.unit_seconds() {
            Some(step) => {
                let secs = n
                    .checked_mul(step)
                    .ok_or_else(|| out_of_range(self, base))?;
                shift_seconds(base, secs)
            }
            None => {
                let count = u32::try_from(n.unsigned_abs()).map_err(|_| out_of_range(self, base))?;
                let months = Months::new(count);
                let moved = if n >= 0 {
                    base.checked_add_months(months)
                } else {
                    base.checked_sub_months(months)
                };
                moved.ok_or_else(|| out_of_range(self, base))
            }
        }
    }

    /// 将存储行起点与刻度还原为 K 线时间戳。
    pub fn tick_to_time(
        self,
        bucket_start: DateTime<Utc>,
        tick: u32,
    ) -> Result<DateTime<Utc>, CandleError> {
        self.add_ticks(bucket_start, i64::from(tick))
    }
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>, CandleError> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| CandleError::TimeOutOfRange(format!("{}-{:02}-01", year, month)))
}

fn shift_seconds(base: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>, CandleError> {
    TimeDelta::try_seconds(secs)
        .and_then(|delta| base.checked_add_signed(delta))
        .ok_or_else(|| CandleError::TimeOutOfRange(format!("{} shifted by {}s", base, secs)))
}

fn out_of_range(interval: Interval, t: DateTime<Utc>) -> CandleError {
    CandleError::TimeOutOfRange(format!("{} at {}", interval, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_round_trip_all_intervals() {
        // 质数步长覆盖闰年、跨年与周边界
        let mut t = at(2019, 12, 27, 23, 59, 58);
        for _ in 0..6000 {
            for &interval in Interval::all() {
                let bucket = interval.bucket_start(t).unwrap();
                let tick = interval.tick(t).unwrap();
                let truncated = interval.truncate(t).unwrap();
                assert_eq!(
                    interval.tick_to_time(bucket, tick).unwrap(),
                    truncated,
                    "{} at {}",
                    interval,
                    t
                );
                assert!(truncated <= t);
                assert!(bucket <= truncated);
            }
            t += TimeDelta::seconds(86_413);
        }
    }

    #[test]
    fn test_truncate_boundaries() {
        let t = at(2024, 2, 29, 17, 47, 31);
        assert_eq!(Interval::Sec.truncate(t).unwrap(), t);
        assert_eq!(Interval::Minute.truncate(t).unwrap(), at(2024, 2, 29, 17, 47, 0));
        assert_eq!(Interval::Min5.truncate(t).unwrap(), at(2024, 2, 29, 17, 45, 0));
        assert_eq!(Interval::Min15.truncate(t).unwrap(), at(2024, 2, 29, 17, 45, 0));
        assert_eq!(Interval::Min30.truncate(t).unwrap(), at(2024, 2, 29, 17, 30, 0));
        assert_eq!(Interval::Hour4.truncate(t).unwrap(), at(2024, 2, 29, 16, 0, 0));
        assert_eq!(Interval::Hour6.truncate(t).unwrap(), at(2024, 2, 29, 12, 0, 0));
        assert_eq!(Interval::Hour12.truncate(t).unwrap(), at(2024, 2, 29, 12, 0, 0));
        assert_eq!(Interval::Day.truncate(t).unwrap(), at(2024, 2, 29, 0, 0, 0));
        // 2024-02-29 是周四
        assert_eq!(Interval::Week.truncate(t).unwrap(), at(2024, 2, 26, 0, 0, 0));
        assert_eq!(Interval::Month.truncate(t).unwrap(), at(2024, 2, 1, 0, 0, 0));
    }

    #[test]
    fn test_bucket_and_tick_values() {
        let t = at(2024, 2, 29, 17, 47, 31);
        assert_eq!(Interval::Sec.tick(t).unwrap(), 47 * 60 + 31);
        assert_eq!(Interval::Minute.tick(t).unwrap(), 47);
        assert_eq!(Interval::Min15.tick(t).unwrap(), 3);
        assert_eq!(Interval::Hour.bucket_start(t).unwrap(), at(2024, 2, 29, 0, 0, 0));
        assert_eq!(Interval::Hour.tick(t).unwrap(), 17);
        assert_eq!(Interval::Hour4.tick(t).unwrap(), 4);
        assert_eq!(Interval::Day.bucket_start(t).unwrap(), at(2024, 2, 1, 0, 0, 0));
        assert_eq!(Interval::Day.tick(t).unwrap(), 28);
        assert_eq!(Interval::Month.bucket_start(t).unwrap(), at(2024, 1, 1, 0, 0, 0));
        assert_eq!(Interval::Month.tick(t).unwrap(), 1);
    }

    #[test]
    fn test_week_bucket_across_new_year() {
        // 2025-12-29 (周一) 所在周包含 2026-01-01，但对齐后的周属于 2025 年
        let t = at(2026, 1, 1, 8, 0, 0);
        let week = Interval::Week.truncate(t).unwrap();
        assert_eq!(week, at(2025, 12, 29, 0, 0, 0));
        // 2025-01-01 是周三，所在周周一为 2024-12-30
        assert_eq!(Interval::Week.bucket_start(t).unwrap(), at(2024, 12, 30, 0, 0, 0));
        assert_eq!(Interval::Week.tick(t).unwrap(), 52);
    }

    #[test]
    fn test_add_ticks_backwards() {
        let base = at(2024, 3, 31, 0, 0, 0);
        assert_eq!(Interval::Month.add_ticks(base, -1).unwrap(), at(2024, 2, 29, 0, 0, 0));
        assert_eq!(
            Interval::Month.add_ticks(at(2024, 1, 1, 0, 0, 0), 13).unwrap(),
            at(2025, 2, 1, 0, 0, 0)
        );
        assert_eq!(Interval::Min5.add_ticks(base, -2).unwrap(), at(2024, 3, 30, 23, 50, 0));
        assert!(Interval::Week.add_ticks(base, i64::MAX).is_err());
    }
}
