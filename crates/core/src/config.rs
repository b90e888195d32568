use crate::common::{Interval, PriceType};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub repository: RepositoryConfig,
    pub retry: RetryConfig,
    pub series: SeriesConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    // 数据根目录，行存储与快照均位于其下
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    // 每个序列保留的 K 线数量 N
    pub capacity: usize,
    // 缓存快照的 Blob 键
    pub snapshot_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            snapshot_key: "candela:cache-snapshot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    // 队列长度超过该值时，入队方在返回前休眠
    pub throttling_threshold: usize,
    pub throttling_delay_ms: u64,
    // 队列长度达到该值时立即唤醒调度器
    pub persist_threshold: usize,
    // 单批最多弹出的条数
    pub max_batch_size: usize,
    // 同时在途的批次上限
    pub max_batches_in_flight: usize,
    // 单批内并发写入的分组上限
    pub max_concurrent_writes: usize,
    // 周期调度间隔
    pub dispatch_interval_ms: u64,
    // 写队列快照的 Blob 键
    pub snapshot_key: String,
    // 停机时等待在途批次结束的最长时间
    pub shutdown_grace_ms: u64,
}

impl QueueConfig {
    pub fn throttling_delay(&self) -> Duration {
        Duration::from_millis(self.throttling_delay_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            throttling_threshold: 100_000,
            throttling_delay_ms: 100,
            persist_threshold: 10_000,
            max_batch_size: 5_000,
            max_batches_in_flight: 4,
            max_concurrent_writes: 16,
            dispatch_interval_ms: 5_000,
            snapshot_key: "candela:write-queue".to_string(),
            shutdown_grace_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    // 单次物理调用的最大行键数
    pub chunk_size: usize,
    // 最近数据回溯的最大窗口扩张次数
    pub recent_max_steps: usize,
    // 连续空窗口达到该值即停止回溯
    pub recent_max_empty_windows: usize,
    // 回溯的最早时间
    pub recent_floor: DateTime<Utc>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            recent_max_steps: 16,
            recent_max_empty_windows: 4,
            // 2015-01-01T00:00:00Z
            recent_floor: DateTime::from_timestamp(1_420_070_400, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    // None 表示无限重试
    pub max_attempts: Option<u32>,
    pub max_delay_ms: Option<u64>,
}

impl RetryConfig {
    /// 转换为重试策略。
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: self.max_delay_ms.map(Duration::from_millis),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_attempts: None,
            max_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesConfig {
    pub asset_pairs: Vec<String>,
    pub price_types: Vec<PriceType>,
    pub intervals: Vec<Interval>,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            asset_pairs: Vec::new(),
            price_types: PriceType::all().to_vec(),
            intervals: Interval::all().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    // EnvFilter 语法，RUST_LOG 优先
    pub level: String,
    // 设置后额外按天滚动写入该目录
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}
