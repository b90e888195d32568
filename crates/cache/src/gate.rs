use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// # Summary
/// 缓存维护闸门：串行化截断、校验等结构性维护操作。
///
/// # Invariants
/// - 只有一个许可；克隆共享同一个信号量。
/// - 由装配层显式创建并注入，不存在进程级全局状态。
#[derive(Clone)]
pub struct MaintenanceGate {
    permits: Arc<Semaphore>,
}

impl MaintenanceGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// # Summary
    /// 等待并获取维护许可，许可随返回值释放。
    ///
    /// # Returns
    /// 信号量被关闭时返回 None。
    pub async fn enter(&self) -> Option<SemaphorePermit<'_>> {
        self.permits.acquire().await.ok()
    }

    /// 当前是否有维护操作在执行。
    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for MaintenanceGate {
    fn default() -> Self {
        Self::new()
    }
}
