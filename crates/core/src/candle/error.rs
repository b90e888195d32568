use thiserror::Error;

/// # Summary
/// K 线领域错误枚举，均为编程契约违规，调用方不应重试。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CandleError {
    // 合并双方的序列或时间槽不一致
    #[error("Series mismatch: {0}")]
    SeriesMismatch(String),
    // 时间运算超出可表示范围
    #[error("Time out of range: {0}")]
    TimeOutOfRange(String),
    // 分桶刻度与行起点不一致
    #[error("Invalid tick: {0}")]
    InvalidTick(String),
}
