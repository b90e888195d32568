use candela_core::cache::port::{BlobStore, BlobStoreExt};
use candela_core::candle::entity::Candle;
use candela_core::config::QueueConfig;
use candela_core::ingest::error::QueueError;
use candela_core::telemetry::port::{Telemetry, metrics};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::{error, info, warn};

/// # Summary
/// 待持久化 K 线的无界无锁 FIFO 队列。
///
/// # Invariants
/// - 生产者与调度器之间无锁竞争，入队从不阻塞在锁上。
/// - 停止后拒绝新的入队，但 `requeue` 仍然可用，失败批次不会丢失。
/// - 停止检查与入队在同一读锁内完成，`stop` 返回后不会再有新的入队。
/// - 队列长度超过节流阈值时，入队方在返回前休眠，形成软背压。
pub struct WriteQueue {
    tx: Sender<Candle>,
    rx: Receiver<Candle>,
    // 停止标志，入队期间持有读锁
    stopped: RwLock<bool>,
    // 达到持久化阈值时唤醒调度器
    wake: Notify,
    config: QueueConfig,
    telemetry: Arc<dyn Telemetry>,
}

impl WriteQueue {
    pub fn new(config: QueueConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            stopped: RwLock::new(false),
            wake: Notify::new(),
            config,
            telemetry,
        }
    }

    /// # Summary
    /// 将一根 K 线放入队尾。
    ///
    /// # Logic
    /// 1. 已停止则拒绝。
    /// 2. 入队后若长度达到持久化阈值，唤醒调度器。
    /// 3. 若长度超过节流阈值，休眠 `throttling_delay` 后返回。
    ///
    /// # Returns
    /// 成功返回 Ok；停止后返回 `QueueError::Stopped`。
    pub async fn enqueue(&self, candle: Candle) -> Result<(), QueueError> {
        {
            let stopped = self.stopped.read().unwrap_or_else(|e| e.into_inner());
            if *stopped {
                return Err(QueueError::Stopped);
            }
            self.tx.send(candle).map_err(|_| QueueError::Stopped)?;
        }
        self.telemetry.increment(metrics::ENQUEUED, 1);

        let len = self.rx.len();
        if len >= self.config.persist_threshold {
            self.wake.notify_one();
        }
        if len > self.config.throttling_threshold {
            self.telemetry.increment(metrics::THROTTLED, 1);
            tokio::time::sleep(self.config.throttling_delay()).await;
        }
        Ok(())
    }

    /// 从队头弹出至多 `max` 根，保持入队顺序。
    pub fn pop_batch(&self, max: usize) -> Vec<Candle> {
        self.rx.try_iter().take(max).collect()
    }

    /// # Summary
    /// 将写入失败的 K 线放回队尾，绕过停止标志与节流。
    pub fn requeue(&self, candles: Vec<Candle>) {
        let count = candles.len();
        for candle in candles {
            if let Err(e) = self.tx.send(candle) {
                error!("Lost candle {} while re-queueing", e.0.series_key());
            }
        }
        warn!("Re-queued {} candles", count);
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// 停止接收新的入队，等待进行中的入队完成后返回。
    pub fn stop(&self) {
        *self.stopped.write().unwrap_or_else(|e| e.into_inner()) = true;
        info!("Write queue stopped with {} pending candles", self.len());
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.read().unwrap_or_else(|e| e.into_inner())
    }

    /// 等待下一次持久化阈值唤醒。
    pub fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }

    /// # Summary
    /// 将队列全部内容写入快照。
    ///
    /// # Logic
    /// 1. 取出当前全部 K 线。
    /// 2. 以 JSON 覆盖写入快照键，空队列同样写入以覆盖旧快照。
    /// 3. 写入失败时将 K 线放回队列。
    ///
    /// # Returns
    /// 写入快照的条数。
    pub async fn save_snapshot(&self, blobs: &dyn BlobStore) -> Result<usize, QueueError> {
        let pending: Vec<Candle> = self.rx.try_iter().collect();
        match blobs.save_json(&self.config.snapshot_key, &pending).await {
            Ok(()) => {
                info!("Saved write queue snapshot with {} candles", pending.len());
                Ok(pending.len())
            }
            Err(e) => {
                self.requeue(pending);
                Err(e.into())
            }
        }
    }

    /// # Summary
    /// 从快照恢复队列内容。
    ///
    /// # Logic
    /// 1. 队列非空则拒绝，防止重复恢复。
    /// 2. 读取快照并按原顺序入队，快照不存在时恢复 0 条。
    ///
    /// # Returns
    /// 恢复的条数；非空时返回 `QueueError::AlreadyPopulated`。
    pub async fn restore_snapshot(&self, blobs: &dyn BlobStore) -> Result<usize, QueueError> {
        if !self.is_empty() {
            return Err(QueueError::AlreadyPopulated(self.len()));
        }
        let pending: Vec<Candle> = blobs
            .load_json(&self.config.snapshot_key)
            .await?
            .unwrap_or_default();
        let count = pending.len();
        for candle in pending {
            self.tx.send(candle).map_err(|_| QueueError::Stopped)?;
        }
        info!("Restored {} candles from write queue snapshot", count);
        Ok(count)
    }
}
