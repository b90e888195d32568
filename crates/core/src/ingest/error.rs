use crate::cache::error::CacheError;
use crate::candle::error::CandleError;
use thiserror::Error;

/// # Summary
/// 写队列错误枚举。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug)]
pub enum QueueError {
    // 队列已停止接收
    #[error("Write queue is stopped")]
    Stopped,
    // 非空队列上重复恢复快照
    #[error("Write queue already holds {0} entries, refusing to restore snapshot")]
    AlreadyPopulated(usize),
    // 快照读写失败
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] CacheError),
}

/// # Summary
/// 摄入编排错误枚举，携带序列上下文便于观测。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug)]
pub enum IngestError {
    // 写入窗口缓存失败
    #[error("Cache upsert failed for {series}: {source}")]
    Cache {
        series: String,
        #[source]
        source: CacheError,
    },
    // 入队失败
    #[error("Enqueue failed for {series}: {source}")]
    Queue {
        series: String,
        #[source]
        source: QueueError,
    },
    // 事件无法转换为 K 线
    #[error("Invalid candle for {series}: {source}")]
    Candle {
        series: String,
        #[source]
        source: CandleError,
    },
}

/// # Summary
/// 流水线启停错误枚举。
#[derive(Error, Debug)]
pub enum PipelineError {
    // 写队列快照恢复或保存失败
    #[error(transparent)]
    Queue(#[from] QueueError),
    // 缓存快照恢复或保存失败
    #[error("Cache snapshot error: {0}")]
    Cache(#[from] CacheError),
    // 调度循环已在运行
    #[error("Pipeline is already running")]
    AlreadyStarted,
}
