use crate::queue::WriteQueue;
use candela_core::candle::entity::Candle;
use candela_core::common::SeriesKey;
use candela_core::config::QueueConfig;
use candela_core::store::port::CandleRepository;
use candela_core::telemetry::port::{Telemetry, metrics};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// # Summary
/// 单次调度的结果汇总。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    // 在途批次已达上限，本次未弹出任何数据
    pub skipped: bool,
    // 按序列划分的分组数
    pub groups: usize,
    // 成功写入的 K 线数
    pub persisted: usize,
    // 写入失败的分组数
    pub failed_groups: usize,
}

/// 单个分组的写入结果。
enum GroupOutcome {
    Persisted(usize),
    // 失败前已落盘的条数
    Failed(usize),
}

/// # Summary
/// 写队列调度器：周期性或被唤醒时弹出一批 K 线，按序列分组并发写入仓储。
///
/// # Invariants
/// - 同时在途的批次不超过 `max_batches_in_flight`。
/// - 所有批次共享一个信号量，同时写入的分组不超过 `max_concurrent_writes`。
/// - 瞬时故障导致的失败分组中尚未落盘的 K 线被放回队列，既不丢失也不重复累加。
pub struct Dispatcher {
    queue: Arc<WriteQueue>,
    repository: Arc<dyn CandleRepository>,
    telemetry: Arc<dyn Telemetry>,
    // 在途批次计数
    in_flight: Arc<AtomicUsize>,
    // 在途批次归零时通知
    idle: Arc<Notify>,
    writes: Arc<Semaphore>,
    config: QueueConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<WriteQueue>,
        repository: Arc<dyn CandleRepository>,
        telemetry: Arc<dyn Telemetry>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            repository,
            telemetry,
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            writes: Arc::new(Semaphore::new(config.max_concurrent_writes.max(1))),
            config,
        }
    }

    /// 当前在途批次数。
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// # Summary
    /// 执行一次调度。
    ///
    /// # Logic
    /// 1. 尝试占用一个在途名额，已满或写队列已停止则跳过。
    /// 2. 弹出至多 `max_batch_size` 根 K 线，按序列分组，组内保持到达顺序。
    /// 3. 每组派生一个写入任务，经共享信号量限制并发。
    /// 4. 汇总结果后释放在途名额。
    ///
    /// # Returns
    /// 可等待的调度任务句柄，丢弃句柄不影响调度执行。
    pub fn dispatch(&self) -> JoinHandle<DispatchReport> {
        let reserved = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.config.max_batches_in_flight).then_some(n + 1)
            })
            .is_ok();
        // 停止后不再派发，停机等待的在途批次因此只会减少
        if reserved && self.queue.is_stopped() {
            self.release();
            debug!("Dispatch skipped: write queue stopped");
            return skipped();
        }
        if !reserved {
            self.telemetry.increment(metrics::DISPATCH_SKIPPED, 1);
            debug!("Dispatch skipped: {} batches in flight", self.in_flight());
            return skipped();
        }

        let batch = self.queue.pop_batch(self.config.max_batch_size);
        let groups = group_by_series(batch);
        let queue = self.queue.clone();
        let repository = self.repository.clone();
        let telemetry = self.telemetry.clone();
        let writes = self.writes.clone();
        let in_flight = self.in_flight.clone();
        let idle = self.idle.clone();

        tokio::spawn(async move {
            let mut report = DispatchReport {
                groups: groups.len(),
                ..DispatchReport::default()
            };
            if !groups.is_empty() {
                let total: usize = groups.iter().map(|(_, c)| c.len()).sum();
                let dispatched = u64::try_from(total).unwrap_or(u64::MAX);
                telemetry.increment(metrics::DISPATCHED, dispatched);
                debug!("Dispatching {} candles in {} groups", total, groups.len());
            }

            let mut tasks = JoinSet::new();
            for (series, candles) in groups {
                tasks.spawn(write_group(
                    series,
                    candles,
                    queue.clone(),
                    repository.clone(),
                    telemetry.clone(),
                    writes.clone(),
                ));
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(GroupOutcome::Persisted(n)) => report.persisted += n,
                    Ok(GroupOutcome::Failed(written)) => {
                        report.persisted += written;
                        report.failed_groups += 1;
                    }
                    Err(e) => {
                        error!("Write task aborted: {}", e);
                        report.failed_groups += 1;
                    }
                }
            }

            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                idle.notify_waiters();
            }
            report
        })
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// # Summary
    /// 等待全部在途批次结束。
    ///
    /// # Returns
    /// 在 `grace` 内归零返回 true，超时返回 false。
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, wait).await.is_ok()
    }

    /// # Summary
    /// 调度循环。
    ///
    /// # Logic
    /// 1. 按 `dispatch_interval` 周期调度。
    /// 2. 队列达到持久化阈值时立即调度。
    /// 3. 收到停止信号后退出，不等待已派发的批次。
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.dispatch_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Dispatcher loop started");

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    drop(self.dispatch());
                }
                _ = self.queue.notified() => {
                    drop(self.dispatch());
                }
            }
        }
        info!("Dispatcher loop stopped");
    }
}

fn skipped() -> JoinHandle<DispatchReport> {
    tokio::spawn(async {
        DispatchReport {
            skipped: true,
            ..DispatchReport::default()
        }
    })
}

fn group_by_series(batch: Vec<Candle>) -> Vec<(SeriesKey, Vec<Candle>)> {
    let mut index: HashMap<SeriesKey, usize> = HashMap::new();
    let mut groups: Vec<(SeriesKey, Vec<Candle>)> = Vec::new();
    for candle in batch {
        let series = candle.series_key();
        match index.get(&series) {
            Some(&i) => {
                if let Some((_, group)) = groups.get_mut(i) {
                    group.push(candle);
                }
            }
            None => {
                index.insert(series.clone(), groups.len());
                groups.push((series, vec![candle]));
            }
        }
    }
    groups
}

async fn write_group(
    series: SeriesKey,
    candles: Vec<Candle>,
    queue: Arc<WriteQueue>,
    repository: Arc<dyn CandleRepository>,
    telemetry: Arc<dyn Telemetry>,
    writes: Arc<Semaphore>,
) -> GroupOutcome {
    let Ok(_permit) = writes.acquire_owned().await else {
        queue.requeue(candles);
        return GroupOutcome::Failed(0);
    };

    let started = Instant::now();
    let count = candles.len();
    match repository.insert_or_merge(&candles).await {
        Ok(()) => {
            let persisted = u64::try_from(count).unwrap_or(u64::MAX);
            telemetry.increment(metrics::PERSISTED, persisted);
            telemetry.record_duration(metrics::PERSIST_DURATION, started.elapsed());
            GroupOutcome::Persisted(count)
        }
        Err(e) if e.is_transient() => {
            let pending = e.unpersisted(&candles);
            let written = count.saturating_sub(pending.len());
            warn!(
                "Persisting {} candles for {} failed, re-queueing {}: {}",
                count,
                series,
                pending.len(),
                e
            );
            telemetry.increment(metrics::PERSIST_FAILED, 1);
            queue.requeue(pending);
            GroupOutcome::Failed(written)
        }
        Err(e) => {
            let written = count.saturating_sub(e.unpersisted(&candles).len());
            error!("Dropping {} candles for {}: {}", count - written, series, e);
            telemetry.increment(metrics::PERSIST_FAILED, 1);
            GroupOutcome::Failed(written)
        }
    }
}
