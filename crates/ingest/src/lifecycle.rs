use crate::dispatcher::Dispatcher;
use crate::queue::WriteQueue;
use crate::warmup::{CacheWarmer, WarmupReport};
use candela_core::cache::port::{BlobStore, BlobStoreExt, CacheSnapshot, CandleCache};
use candela_core::common::SeriesKey;
use candela_core::ingest::error::PipelineError;
use candela_core::ingest::port::SeriesCatalog;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 启动结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    // 从快照恢复的待写 K 线数
    pub restored_candles: usize,
    // 从快照恢复的缓存序列数
    pub restored_series: usize,
    pub warmup: WarmupReport,
}

/// 停机结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    // 写入快照的待写 K 线数
    pub saved_candles: usize,
    // 写入快照的缓存序列数，缓存不支持快照时为 None
    pub saved_series: Option<usize>,
    // 停止写队列时仍在途的批次数
    pub awaited_batches: usize,
}

/// # Summary
/// 摄入流水线的启停编排。
///
/// # Logic
/// 启动：恢复写队列快照 → 恢复缓存快照 → 预热其余序列 → 启动调度循环。
/// 停机：停止调度循环 → 停止写队列 → 等待在途批次 → 保存写队列快照 → 保存缓存快照。
pub struct CandlePipeline {
    queue: Arc<WriteQueue>,
    cache: Arc<dyn CandleCache>,
    dispatcher: Arc<Dispatcher>,
    warmer: CacheWarmer,
    catalog: Arc<dyn SeriesCatalog>,
    blobs: Arc<dyn BlobStore>,
    // 缓存快照的 Blob 键
    cache_snapshot_key: String,
    // 等待在途批次时的告警间隔
    shutdown_grace: Duration,
    stop_tx: watch::Sender<bool>,
    // 调度循环句柄
    dispatch_loop: Mutex<Option<JoinHandle<()>>>,
}

/// 流水线依赖。
pub struct PipelineParts {
    pub queue: Arc<WriteQueue>,
    pub cache: Arc<dyn CandleCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub warmer: CacheWarmer,
    pub catalog: Arc<dyn SeriesCatalog>,
    pub blobs: Arc<dyn BlobStore>,
}

impl CandlePipeline {
    pub fn new(
        parts: PipelineParts,
        cache_snapshot_key: impl Into<String>,
        shutdown_grace: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            queue: parts.queue,
            cache: parts.cache,
            dispatcher: parts.dispatcher,
            warmer: parts.warmer,
            catalog: parts.catalog,
            blobs: parts.blobs,
            cache_snapshot_key: cache_snapshot_key.into(),
            shutdown_grace: shutdown_grace.max(Duration::from_millis(1)),
            stop_tx,
            dispatch_loop: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.dispatch_loop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// # Summary
    /// 启动流水线。
    ///
    /// # Returns
    /// 启动结果；调度循环已在运行时返回 `PipelineError::AlreadyStarted`。
    pub async fn start(&self) -> Result<StartupReport, PipelineError> {
        if self.is_running() {
            return Err(PipelineError::AlreadyStarted);
        }

        let restored_candles = self.queue.restore_snapshot(self.blobs.as_ref()).await?;
        let restored = self.restore_cache().await?;

        let pending: Vec<SeriesKey> = self
            .catalog
            .series()
            .into_iter()
            .filter(|s| !restored.contains(s))
            .collect();
        let warmup = self.warmer.warm(&pending).await;

        self.stop_tx.send_replace(false);
        let handle = tokio::spawn(self.dispatcher.clone().run(self.stop_tx.subscribe()));
        *self.dispatch_loop.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!(
            "Pipeline started: {} queued candles restored, {} cached series restored",
            restored_candles,
            restored.len()
        );
        Ok(StartupReport {
            restored_candles,
            restored_series: restored.len(),
            warmup,
        })
    }

    async fn restore_cache(&self) -> Result<HashSet<SeriesKey>, PipelineError> {
        let Some(snapshot) = self
            .blobs
            .load_json::<CacheSnapshot>(&self.cache_snapshot_key)
            .await?
        else {
            return Ok(HashSet::new());
        };
        let series: HashSet<SeriesKey> = snapshot.series.iter().map(|s| s.series.clone()).collect();
        match self.cache.import_snapshot(snapshot).await {
            Ok(()) => Ok(series),
            Err(e) if e.is_not_supported() => {
                info!("Cache does not support snapshots, warming all series");
                Ok(HashSet::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// # Summary
    /// 停止流水线并保存快照。
    ///
    /// # Logic
    /// 1. 通知调度循环退出并等待其结束。
    /// 2. 停止写队列，此后不再有新的入队与派发。
    /// 3. 等待全部在途批次结束，不设期限；每超过一个宽限期告警一次。
    ///    在途的 K 线因此要么已落盘，要么已回到队列。
    /// 4. 保存写队列快照，再保存缓存快照。
    ///
    /// 存储持续不可用且重试策略无限时，停机会一直等待。
    pub async fn shutdown(&self) -> Result<ShutdownReport, PipelineError> {
        self.stop_tx.send_replace(true);
        let handle = self
            .dispatch_loop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Dispatcher loop ended abnormally: {}", e);
        }

        self.queue.stop();
        let awaited_batches = self.dispatcher.in_flight();
        let mut waited = Duration::ZERO;
        while !self.dispatcher.wait_idle(self.shutdown_grace).await {
            waited += self.shutdown_grace;
            warn!(
                "{} batches still in flight after {:?}, waiting for storage",
                self.dispatcher.in_flight(),
                waited
            );
        }

        let saved_candles = self.queue.save_snapshot(self.blobs.as_ref()).await?;
        let saved_series = match self.cache.export_snapshot().await {
            Ok(snapshot) => {
                let count = snapshot.series.len();
                self.blobs
                    .save_json(&self.cache_snapshot_key, &snapshot)
                    .await?;
                Some(count)
            }
            Err(e) if e.is_not_supported() => None,
            Err(e) => return Err(e.into()),
        };

        info!("Pipeline stopped: {} candles saved for later", saved_candles);
        Ok(ShutdownReport {
            saved_candles,
            saved_series,
            awaited_batches,
        })
    }
}
