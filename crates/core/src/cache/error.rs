use thiserror::Error;

/// # Summary
/// 缓存域错误枚举，处理序列化、能力缺失及底层存储故障。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - `NotSupported` 表示实现不具备该能力，调用方应跳过而非失败。
#[derive(Error, Debug)]
pub enum CacheError {
    // 数据序列化失败
    #[error("Serialize error: {0}")]
    Serialize(String),
    // 数据反序列化失败
    #[error("Deserialize error: {0}")]
    Deserialize(String),
    // 底层存储引擎故障
    #[error("Storage error: {0}")]
    Storage(String),
    // 当前实现不支持该操作
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),
    // 未知或未分类的错误
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl CacheError {
    /// 是否为“不支持”信号。
    pub fn is_not_supported(&self) -> bool {
        matches!(self, CacheError::NotSupported(_))
    }
}
