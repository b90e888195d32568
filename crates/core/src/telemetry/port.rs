use std::time::Duration;
use tracing::trace;

/// # Summary
/// 观测指标接口，即发即弃。
///
/// # Invariants
/// - 实现不得阻塞调用方，也不得向核心返回错误。
pub trait Telemetry: Send + Sync {
    /// 计数器累加。
    fn increment(&self, metric: &'static str, by: u64);

    /// 记录一次耗时。
    fn record_duration(&self, metric: &'static str, elapsed: Duration);
}

/// 丢弃全部指标。
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn increment(&self, _metric: &'static str, _by: u64) {}

    fn record_duration(&self, _metric: &'static str, _elapsed: Duration) {}
}

/// 以 trace 级别日志输出指标。
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn increment(&self, metric: &'static str, by: u64) {
        trace!(metric, by, "counter");
    }

    fn record_duration(&self, metric: &'static str, elapsed: Duration) {
        trace!(metric, elapsed_ms = elapsed.as_millis(), "timer");
    }
}

/// 指标名称。
pub mod metrics {
    pub const ENQUEUED: &str = "candles.enqueued";
    pub const THROTTLED: &str = "candles.throttled";
    pub const DISPATCHED: &str = "candles.dispatched";
    pub const DISPATCH_SKIPPED: &str = "dispatch.skipped";
    pub const PERSISTED: &str = "candles.persisted";
    pub const PERSIST_FAILED: &str = "candles.persist_failed";
    pub const PERSIST_DURATION: &str = "persist.duration";
}
