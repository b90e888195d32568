use std::time::Duration;

/// # Summary
/// 持久化重试策略：指数退避，尝试次数可为无限。
///
/// # Invariants
/// - 第 `attempt` 次失败（从 0 计）后的等待时间为 `base_delay * 2^attempt`。
/// - `max_attempts` 为 None 时永不放弃。
/// - `max_delay` 为 None 时等待时间不设上限（仅受数值饱和约束）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    // 最大尝试次数，None 表示无限
    pub max_attempts: Option<u32>,
    // 退避基数
    pub base_delay: Duration,
    // 单次等待上限
    pub max_delay: Option<Duration>,
}

impl RetryPolicy {
    /// 无限次重试，`2^attempt` 秒退避。
    pub fn infinite() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(1),
            max_delay: None,
        }
    }

    /// 有限次重试，供测试与非关键路径使用。
    pub fn bounded(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay,
            max_delay: None,
        }
    }

    /// 设置单次等待上限。
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// # Summary
    /// 已完成 `attempts` 次尝试后是否还允许再试。
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// # Summary
    /// 第 `attempt` 次失败后的等待时间。
    ///
    /// # Logic
    /// 1. 计算 `2^attempt`，溢出时饱和到 `u32::MAX`。
    /// 2. 与基数相乘，溢出时饱和到 `Duration::MAX`。
    /// 3. 若设置了上限则截断。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.checked_mul(factor).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::infinite()
    }
}
