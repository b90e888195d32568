use async_trait::async_trait;
use candela_cache::gate::MaintenanceGate;
use candela_cache::mem::{MemBlobStore, MemSortedSetStore};
use candela_cache::sorted::SortedSetCandleCache;
use candela_cache::window::SlidingWindowCache;
use candela_core::cache::port::{BlobStoreExt, CacheSnapshot, CandleCache, SeriesSnapshot};
use candela_core::candle::entity::{Candle, CandleUpdate};
use candela_core::common::time::FixedClock;
use candela_core::common::{Interval, PriceType, SeriesKey};
use candela_core::config::{QueueConfig, RepositoryConfig};
use candela_core::ingest::error::{IngestError, PipelineError, QueueError};
use candela_core::retry::RetryPolicy;
use candela_core::store::entity::CandleRow;
use candela_core::store::error::StoreError;
use candela_core::store::port::{CandleRepository, RowStore, RowStoreFactory};
use candela_core::telemetry::port::{NoopTelemetry, Telemetry};
use candela_core::test_utils::{MemRowStoreFactory, RecordingRepository};
use candela_ingest::catalog::StaticSeriesCatalog;
use candela_ingest::dispatcher::Dispatcher;
use candela_ingest::lifecycle::{CandlePipeline, PipelineParts};
use candela_ingest::orchestrator::{Admission, CandleIngestor};
use candela_ingest::queue::WriteQueue;
use candela_ingest::warmup::CacheWarmer;
use candela_store::repository::PartitionedRepository;
use candela_store::retry::RetryingRepository;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::Semaphore;

const QUEUE_KEY: &str = "candela:write-queue";
const CACHE_KEY: &str = "candela:cache-snapshot";

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 20, 8, 0, 0).unwrap()
}

fn ask(pair: &str, minute: i64) -> Candle {
    let timestamp = base() + Duration::minutes(minute);
    Candle {
        asset_pair: pair.to_string(),
        price_type: PriceType::Ask,
        interval: Interval::Minute,
        timestamp,
        open: dec!(1.25),
        close: dec!(1.26),
        high: dec!(1.27),
        low: dec!(1.24),
        trading_volume: dec!(0),
        trading_opposite_volume: dec!(0),
        last_trade_price: dec!(0),
        last_update_timestamp: timestamp + Duration::seconds(59),
    }
}

fn trade(pair: &str, minute: i64, updated_after_secs: i64) -> Candle {
    let candle = ask(pair, minute);
    Candle {
        price_type: PriceType::Trade,
        trading_volume: dec!(1),
        trading_opposite_volume: dec!(1.26),
        last_trade_price: dec!(1.26),
        last_update_timestamp: candle.timestamp + Duration::seconds(updated_after_secs),
        ..candle
    }
}

fn series(pair: &str) -> SeriesKey {
    SeriesKey::new(pair, PriceType::Ask, Interval::Minute)
}

fn queue_config() -> QueueConfig {
    QueueConfig {
        dispatch_interval_ms: 3_600_000,
        shutdown_grace_ms: 2_000,
        ..QueueConfig::default()
    }
}

fn telemetry() -> Arc<dyn Telemetry> {
    Arc::new(NoopTelemetry)
}

fn sorted(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by(|a, b| (&a.asset_pair, a.timestamp).cmp(&(&b.asset_pair, b.timestamp)));
    candles
}

fn catalog(pairs: &[&str]) -> Arc<StaticSeriesCatalog> {
    Arc::new(StaticSeriesCatalog::new(
        pairs.iter().map(|p| p.to_string()),
        vec![PriceType::Ask],
        [Interval::Minute],
    ))
}

/// 在放行前阻塞全部写入的仓储。
struct BlockingRepository {
    gate: Semaphore,
    inner: RecordingRepository,
}

#[async_trait]
impl CandleRepository for BlockingRepository {
    async fn insert_or_merge(&self, candles: &[Candle]) -> Result<(), StoreError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        self.inner.insert_or_merge(candles).await
    }

    async fn query(
        &self,
        series: &SeriesKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        self.inner.query(series, from, to).await
    }

    async fn get_recent(
        &self,
        series: &SeriesKey,
        count: usize,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<Candle>, StoreError> {
        self.inner.get_recent(series, count, upper_bound).await
    }
}

/// 读取前等待固定时长的行存储，用于放大并发写入的交错窗口。
struct SlowReadStore {
    inner: Arc<dyn RowStore>,
    delay: std::time::Duration,
}

#[async_trait]
impl RowStore for SlowReadStore {
    async fn multi_get(
        &self,
        partition_key: &str,
        row_keys: &[String],
    ) -> Result<Vec<CandleRow>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.multi_get(partition_key, row_keys).await
    }

    async fn upsert_batch(&self, rows: &[CandleRow]) -> Result<(), StoreError> {
        self.inner.upsert_batch(rows).await
    }

    async fn range_query(
        &self,
        partition_key: &str,
        row_key_from: &str,
        row_key_to: &str,
    ) -> Result<Vec<CandleRow>, StoreError> {
        self.inner
            .range_query(partition_key, row_key_from, row_key_to)
            .await
    }
}

struct SlowReadFactory {
    inner: MemRowStoreFactory,
    delay: std::time::Duration,
}

#[async_trait]
impl RowStoreFactory for SlowReadFactory {
    async fn open(
        &self,
        asset_pair: &str,
        interval: Interval,
    ) -> Result<Arc<dyn RowStore>, StoreError> {
        Ok(Arc::new(SlowReadStore {
            inner: self.inner.open(asset_pair, interval).await?,
            delay: self.delay,
        }))
    }

    async fn invalidate(&self, asset_pair: &str, interval: Interval) {
        self.inner.invalidate(asset_pair, interval).await;
    }
}

/// 只含写队列与调度器的流水线，不需要预热。
fn bare_pipeline(
    queue: Arc<WriteQueue>,
    repo: Arc<dyn CandleRepository>,
    blobs: Arc<MemBlobStore>,
    grace: std::time::Duration,
) -> (CandlePipeline, Arc<Dispatcher>) {
    let cache: Arc<dyn CandleCache> = Arc::new(SlidingWindowCache::new(10));
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        repo.clone(),
        telemetry(),
        queue_config(),
    ));
    let pipeline = CandlePipeline::new(
        PipelineParts {
            queue,
            cache: cache.clone(),
            dispatcher: dispatcher.clone(),
            warmer: CacheWarmer::new(repo, cache, Arc::new(FixedClock(base())), 10),
            catalog: catalog(&["EURUSD"]),
            blobs,
        },
        CACHE_KEY,
        grace,
    );
    (pipeline, dispatcher)
}

#[tokio::test]
async fn test_queue_survives_snapshot_and_restore() -> anyhow::Result<()> {
    let blobs = MemBlobStore::new();
    let candles: Vec<Candle> = (0..40)
        .map(|i| ask(if i % 2 == 0 { "EURUSD" } else { "USDJPY" }, i))
        .collect();

    let queue = WriteQueue::new(queue_config(), telemetry());
    for candle in &candles {
        queue.enqueue(candle.clone()).await?;
    }
    assert_eq!(queue.save_snapshot(&blobs).await?, 40);
    assert!(queue.is_empty());

    let restored = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    assert_eq!(restored.restore_snapshot(&blobs).await?, 40);

    let repo = Arc::new(RecordingRepository::new());
    let dispatcher = Dispatcher::new(restored.clone(), repo.clone(), telemetry(), queue_config());
    let report = dispatcher.dispatch().await?;
    assert_eq!(report.groups, 2);
    assert_eq!(report.persisted, 40);
    assert!(restored.is_empty());

    assert_eq!(sorted(repo.candles()), sorted(candles));
    Ok(())
}

#[tokio::test]
async fn test_restore_into_populated_queue_is_rejected() -> anyhow::Result<()> {
    let blobs = MemBlobStore::new();
    blobs.save_json(QUEUE_KEY, &vec![ask("EURUSD", 0)]).await?;

    let queue = WriteQueue::new(queue_config(), telemetry());
    assert_eq!(queue.restore_snapshot(&blobs).await?, 1);
    let err = queue.restore_snapshot(&blobs).await.unwrap_err();
    assert!(matches!(err, QueueError::AlreadyPopulated(1)));
    assert_eq!(queue.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_enqueue_after_stop_is_rejected() {
    let queue = WriteQueue::new(queue_config(), telemetry());
    queue.stop();
    let err = queue.enqueue(ask("EURUSD", 0)).await.unwrap_err();
    assert!(matches!(err, QueueError::Stopped));

    // 失败批次仍可放回
    queue.requeue(vec![ask("EURUSD", 1)]);
    assert_eq!(queue.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_throttles_above_threshold() -> anyhow::Result<()> {
    let queue = WriteQueue::new(
        QueueConfig {
            throttling_threshold: 2,
            throttling_delay_ms: 50,
            ..queue_config()
        },
        telemetry(),
    );

    let started = tokio::time::Instant::now();
    queue.enqueue(ask("EURUSD", 0)).await?;
    queue.enqueue(ask("EURUSD", 1)).await?;
    assert!(started.elapsed() < std::time::Duration::from_millis(50));

    queue.enqueue(ask("EURUSD", 2)).await?;
    assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    Ok(())
}

#[tokio::test]
async fn test_failing_series_does_not_block_others() -> anyhow::Result<()> {
    let queue = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    let repo = Arc::new(RecordingRepository::new());
    repo.fail_pair("GBPUSD");
    let dispatcher = Dispatcher::new(queue.clone(), repo.clone(), telemetry(), queue_config());

    for minute in 0..5 {
        queue.enqueue(ask("EURUSD", minute)).await?;
        queue.enqueue(ask("GBPUSD", minute)).await?;
    }

    let report = dispatcher.dispatch().await?;
    assert_eq!(report.persisted, 5);
    assert_eq!(report.failed_groups, 1);
    // 失败分组回到队列
    assert_eq!(queue.len(), 5);
    assert!(repo.candles().iter().all(|c| c.asset_pair == "EURUSD"));

    repo.heal_pair("GBPUSD");
    let report = dispatcher.dispatch().await?;
    assert_eq!(report.persisted, 5);
    assert!(queue.is_empty());
    assert_eq!(repo.candles().len(), 10);
    Ok(())
}

#[tokio::test]
async fn test_dispatch_respects_in_flight_ceiling() -> anyhow::Result<()> {
    let queue = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    let repo = Arc::new(BlockingRepository {
        gate: Semaphore::new(0),
        inner: RecordingRepository::new(),
    });
    let dispatcher = Dispatcher::new(
        queue.clone(),
        repo.clone(),
        telemetry(),
        QueueConfig {
            max_batches_in_flight: 1,
            ..queue_config()
        },
    );

    queue.enqueue(ask("EURUSD", 0)).await?;
    let first = dispatcher.dispatch();
    queue.enqueue(ask("EURUSD", 1)).await?;

    let second = dispatcher.dispatch().await?;
    assert!(second.skipped);
    assert_eq!(dispatcher.in_flight(), 1);
    assert_eq!(queue.len(), 1);

    repo.gate.add_permits(16);
    assert_eq!(first.await?.persisted, 1);
    assert!(dispatcher.wait_idle(std::time::Duration::from_secs(1)).await);
    assert_eq!(dispatcher.dispatch().await?.persisted, 1);
    Ok(())
}

#[tokio::test]
async fn test_overlapping_batches_for_one_series_both_land() -> anyhow::Result<()> {
    let factory = Arc::new(SlowReadFactory {
        inner: MemRowStoreFactory::new(),
        delay: std::time::Duration::from_millis(50),
    });
    let repo = Arc::new(PartitionedRepository::new(factory, RepositoryConfig::default()));
    let config = QueueConfig {
        max_batch_size: 1,
        ..queue_config()
    };
    let queue = Arc::new(WriteQueue::new(config.clone(), telemetry()));
    let dispatcher = Dispatcher::new(queue.clone(), repo.clone(), telemetry(), config);

    // 同一分钟的两笔成交，各自成批并同时在途
    queue.enqueue(trade("BTCUSD", 0, 10)).await?;
    queue.enqueue(trade("BTCUSD", 0, 20)).await?;
    let first = dispatcher.dispatch();
    let second = dispatcher.dispatch();
    assert_eq!(dispatcher.in_flight(), 2);
    assert_eq!(first.await?.persisted, 1);
    assert_eq!(second.await?.persisted, 1);

    let key = SeriesKey::new("BTCUSD", PriceType::Trade, Interval::Minute);
    let stored = repo
        .query(&key, base(), base() + Duration::minutes(1))
        .await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].trading_volume, dec!(2));
    assert_eq!(stored[0].last_update_timestamp, base() + Duration::seconds(20));
    Ok(())
}

#[tokio::test]
async fn test_partial_write_requeues_only_unwritten_buckets() -> anyhow::Result<()> {
    let factory = Arc::new(MemRowStoreFactory::new());
    let repo = Arc::new(PartitionedRepository::new(
        factory.clone(),
        RepositoryConfig {
            chunk_size: 1,
            ..RepositoryConfig::default()
        },
    ));
    let queue = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    let dispatcher = Dispatcher::new(queue.clone(), repo, telemetry(), queue_config());

    // 两个小时分桶，第二块写入失败
    queue.enqueue(trade("BTCUSD", 0, 10)).await?;
    queue.enqueue(trade("BTCUSD", 60, 10)).await?;
    factory.fail_upsert_calls(&[2]);

    let report = dispatcher.dispatch().await?;
    assert_eq!(report.persisted, 1);
    assert_eq!(report.failed_groups, 1);
    // 已写入的分桶不回队列
    assert_eq!(queue.len(), 1);

    assert_eq!(dispatcher.dispatch().await?.persisted, 1);
    let volumes: Vec<_> = factory
        .rows("BTCUSD", Interval::Minute)
        .iter()
        .flat_map(|r| r.ticks.iter().map(|t| t.trading_volume))
        .collect();
    assert_eq!(volumes, vec![dec!(1), dec!(1)]);
    Ok(())
}

#[tokio::test]
async fn test_dispatch_after_stop_is_skipped() -> anyhow::Result<()> {
    let queue = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    let repo = Arc::new(RecordingRepository::new());
    let dispatcher = Dispatcher::new(queue.clone(), repo.clone(), telemetry(), queue_config());

    queue.enqueue(ask("EURUSD", 0)).await?;
    queue.stop();
    assert!(dispatcher.dispatch().await?.skipped);
    assert_eq!(dispatcher.in_flight(), 0);
    // 留给快照
    assert_eq!(queue.len(), 1);
    assert!(repo.candles().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_write() -> anyhow::Result<()> {
    let blobs = Arc::new(MemBlobStore::new());
    let queue = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    let repo = Arc::new(BlockingRepository {
        gate: Semaphore::new(0),
        inner: RecordingRepository::new(),
    });
    let (pipeline, dispatcher) = bare_pipeline(
        queue.clone(),
        repo.clone(),
        blobs.clone(),
        std::time::Duration::from_millis(10),
    );
    let pipeline = Arc::new(pipeline);

    queue.enqueue(ask("EURUSD", 0)).await?;
    let batch = dispatcher.dispatch();
    let stopping = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.shutdown().await }
    });

    // 存储未恢复前停机不会结束
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!stopping.is_finished());

    repo.gate.add_permits(1);
    let stopped = stopping.await??;
    assert_eq!(stopped.awaited_batches, 1);
    assert_eq!(stopped.saved_candles, 0);
    assert_eq!(batch.await?.persisted, 1);
    assert_eq!(repo.inner.candles(), vec![ask("EURUSD", 0)]);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_snapshots_group_requeued_after_give_up() -> anyhow::Result<()> {
    let blobs = Arc::new(MemBlobStore::new());
    let queue = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    let recording = Arc::new(RecordingRepository::new());
    recording.fail_pair("EURUSD");
    let repo: Arc<dyn CandleRepository> = Arc::new(RetryingRepository::new(
        recording.clone(),
        RetryPolicy::bounded(3, std::time::Duration::from_millis(20)),
    ));
    let (pipeline, dispatcher) = bare_pipeline(
        queue.clone(),
        repo,
        blobs.clone(),
        std::time::Duration::from_millis(5),
    );

    queue.enqueue(ask("EURUSD", 0)).await?;
    let batch = dispatcher.dispatch();
    let stopped = pipeline.shutdown().await?;

    // 放弃重试后放回队列的 K 线进入快照
    assert_eq!(stopped.awaited_batches, 1);
    assert_eq!(stopped.saved_candles, 1);
    let saved: Vec<Candle> = blobs.load_json(QUEUE_KEY).await?.unwrap_or_default();
    assert_eq!(saved, vec![ask("EURUSD", 0)]);
    assert_eq!(batch.await?.failed_groups, 1);
    assert!(recording.candles().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_persist_threshold_wakes_dispatcher() -> anyhow::Result<()> {
    let config = QueueConfig {
        persist_threshold: 3,
        ..queue_config()
    };
    let queue = Arc::new(WriteQueue::new(config.clone(), telemetry()));
    let repo = Arc::new(RecordingRepository::new());
    let dispatcher = Arc::new(Dispatcher::new(queue.clone(), repo.clone(), telemetry(), config));

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let running = tokio::spawn(dispatcher.clone().run(stop_rx));

    for minute in 0..3 {
        queue.enqueue(ask("EURUSD", minute)).await?;
    }
    let persisted = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while repo.candles().len() < 3 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(persisted.is_ok());

    stop_tx.send(true)?;
    running.await?;
    Ok(())
}

#[tokio::test]
async fn test_ingestor_rejects_unsupported_series() -> anyhow::Result<()> {
    let cache = Arc::new(SlidingWindowCache::new(10));
    let queue = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    let ingestor = CandleIngestor::new(catalog(&["EURUSD"]), cache.clone(), queue.clone());

    assert_eq!(ingestor.process(ask("GBPUSD", 0)).await?, Admission::Rejected);
    assert_eq!(cache.series_len(&series("GBPUSD")).await?, 0);
    assert!(queue.is_empty());

    assert_eq!(ingestor.process(ask("EURUSD", 0)).await?, Admission::Admitted);
    assert_eq!(cache.series_len(&series("EURUSD")).await?, 1);
    assert_eq!(queue.len(), 1);

    let update = CandleUpdate {
        asset_pair: "EURUSD".to_string(),
        price_type: PriceType::Ask,
        interval: Interval::Minute,
        open: dec!(1.1),
        close: dec!(1.2),
        high: dec!(1.3),
        low: dec!(1.0),
        volume: dec!(0),
        opposite_volume: dec!(0),
        timestamp: base() + Duration::minutes(7) + Duration::seconds(42),
        update_timestamp: base() + Duration::minutes(8),
        last_trade_price: None,
    };
    assert_eq!(ingestor.process_update(update).await?, Admission::Admitted);
    let cached = cache
        .query(&series("EURUSD"), base() + Duration::minutes(7), base() + Duration::minutes(8))
        .await?;
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].timestamp, base() + Duration::minutes(7));

    queue.stop();
    let err = ingestor.process(ask("EURUSD", 9)).await.unwrap_err();
    assert!(matches!(err, IngestError::Queue { .. }));
    Ok(())
}

#[tokio::test]
async fn test_pipeline_start_and_shutdown_keep_every_candle() -> anyhow::Result<()> {
    let blobs = Arc::new(MemBlobStore::new());
    let queued = vec![ask("EURUSD", 0), ask("EURUSD", 1)];
    blobs.save_json(QUEUE_KEY, &queued).await?;
    blobs
        .save_json(
            CACHE_KEY,
            &CacheSnapshot {
                series: vec![SeriesSnapshot {
                    series: series("EURUSD"),
                    candles: vec![ask("EURUSD", 0)],
                }],
            },
        )
        .await?;

    let repo = Arc::new(RecordingRepository::new());
    let history = vec![ask("GBPUSD", 0), ask("GBPUSD", 1)];
    repo.insert_or_merge(&history).await?;

    let cache = Arc::new(SlidingWindowCache::new(10));
    let queue = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    let clock = Arc::new(FixedClock(base() + Duration::hours(1)));
    let catalog = catalog(&["EURUSD", "GBPUSD"]);
    let dispatcher = Dispatcher::new(queue.clone(), repo.clone(), telemetry(), queue_config());
    let pipeline = CandlePipeline::new(
        PipelineParts {
            queue: queue.clone(),
            cache: cache.clone(),
            dispatcher: Arc::new(dispatcher),
            warmer: CacheWarmer::new(repo.clone(), cache.clone(), clock, 10),
            catalog: catalog.clone(),
            blobs: blobs.clone(),
        },
        CACHE_KEY,
        queue_config().shutdown_grace(),
    );

    let started = pipeline.start().await?;
    assert_eq!(started.restored_candles, 2);
    assert_eq!(started.restored_series, 1);
    assert_eq!(started.warmup.warmed, 1);
    assert_eq!(cache.series_len(&series("GBPUSD")).await?, 2);
    assert!(matches!(pipeline.start().await, Err(PipelineError::AlreadyStarted)));

    let ingestor = CandleIngestor::new(catalog, cache.clone(), queue.clone());
    ingestor.process(ask("EURUSD", 2)).await?;

    let stopped = pipeline.shutdown().await?;
    assert_eq!(stopped.saved_series, Some(2));
    assert!(!pipeline.is_running());

    // 已落库与仍在快照中的 K 线合起来恰好是全部输入
    let saved: Vec<Candle> = blobs.load_json(QUEUE_KEY).await?.unwrap_or_default();
    assert_eq!(saved.len(), stopped.saved_candles);
    let mut settled: Vec<Candle> = repo
        .candles()
        .into_iter()
        .filter(|c| c.asset_pair == "EURUSD")
        .collect();
    settled.extend(saved);
    assert_eq!(
        sorted(settled),
        vec![ask("EURUSD", 0), ask("EURUSD", 1), ask("EURUSD", 2)]
    );
    Ok(())
}

#[tokio::test]
async fn test_pipeline_warms_all_series_without_cache_snapshots() -> anyhow::Result<()> {
    let blobs = Arc::new(MemBlobStore::new());
    blobs
        .save_json(
            CACHE_KEY,
            &CacheSnapshot {
                series: vec![SeriesSnapshot {
                    series: series("EURUSD"),
                    candles: vec![ask("EURUSD", 0)],
                }],
            },
        )
        .await?;

    // 真实仓储链路：重试装饰器 → 分区仓储 → 内存行存储
    let factory = Arc::new(MemRowStoreFactory::new());
    let repo: Arc<dyn CandleRepository> = Arc::new(RetryingRepository::new(
        Arc::new(PartitionedRepository::new(factory.clone(), RepositoryConfig::default())),
        RetryPolicy::bounded(3, std::time::Duration::from_millis(1)),
    ));
    repo.insert_or_merge(&[ask("EURUSD", 0), ask("EURUSD", 1)]).await?;

    let cache: Arc<dyn CandleCache> = Arc::new(SortedSetCandleCache::new(
        Arc::new(MemSortedSetStore::new()),
        MaintenanceGate::new(),
        10,
    ));
    let queue = Arc::new(WriteQueue::new(queue_config(), telemetry()));
    let dispatcher = Dispatcher::new(queue.clone(), repo.clone(), telemetry(), queue_config());
    let pipeline = CandlePipeline::new(
        PipelineParts {
            queue: queue.clone(),
            cache: cache.clone(),
            dispatcher: Arc::new(dispatcher),
            warmer: CacheWarmer::new(
                repo.clone(),
                cache.clone(),
                Arc::new(FixedClock(base() + Duration::minutes(30))),
                10,
            ),
            catalog: catalog(&["EURUSD", "GBPUSD"]),
            blobs: blobs.clone(),
        },
        CACHE_KEY,
        queue_config().shutdown_grace(),
    );

    let started = pipeline.start().await?;
    assert_eq!(started.restored_series, 0);
    assert_eq!(started.warmup.warmed, 2);
    assert_eq!(cache.series_len(&series("EURUSD")).await?, 2);

    queue.enqueue(ask("EURUSD", 2)).await?;
    let stopped = pipeline.shutdown().await?;
    assert_eq!(stopped.saved_series, None);

    let rows = factory.rows("EURUSD", Interval::Minute);
    let stored: usize = rows.iter().map(|r| r.ticks.len()).sum();
    assert_eq!(stored + stopped.saved_candles, 3);
    Ok(())
}
