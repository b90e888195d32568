mod feed;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use candela_cache::window::SlidingWindowCache;
use candela_core::cache::port::CandleCache;
use candela_core::common::time::SystemClock;
use candela_core::config::LogConfig;
use candela_core::store::port::CandleRepository;
use candela_core::telemetry::port::{Telemetry, TracingTelemetry};
use candela_ingest::catalog::StaticSeriesCatalog;
use candela_ingest::dispatcher::Dispatcher;
use candela_ingest::lifecycle::{CandlePipeline, PipelineParts};
use candela_ingest::orchestrator::CandleIngestor;
use candela_ingest::queue::WriteQueue;
use candela_ingest::warmup::CacheWarmer;
use candela_store::blob::SqliteBlobStore;
use candela_store::repository::PartitionedRepository;
use candela_store::retry::RetryingRepository;
use candela_store::sqlite::SqliteRowStoreFactory;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件并通过 Arc<dyn Trait> 注入到摄入流水线。
///
/// # Logic
/// 1. 加载配置并初始化日志。
/// 2. 实例化基础设施层（行存储、快照存储）。
/// 3. 实例化领域实现层（仓储、缓存、写队列、调度器）。
/// 4. 启动流水线并开始读取上游事件。
/// 5. 收到退出信号后按序停机，最后停止上游读取。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 配置与日志
    let config = settings::load()?;
    let _log_guard = init_tracing(&config.log)?;
    info!("Candela starting...");

    // 2. 实例化基础设施层
    let data_dir = PathBuf::from(&config.store.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let row_stores = Arc::new(SqliteRowStoreFactory::new(data_dir.join("rows"))?);
    let blobs = Arc::new(SqliteBlobStore::new(data_dir.join("snapshots.db")).await?);
    let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry);

    // 3. 实例化领域实现层
    let repository: Arc<dyn CandleRepository> = Arc::new(RetryingRepository::new(
        Arc::new(PartitionedRepository::new(row_stores, config.repository.clone())),
        config.retry.policy(),
    ));
    let cache: Arc<dyn CandleCache> = Arc::new(SlidingWindowCache::new(config.cache.capacity));
    let catalog = Arc::new(StaticSeriesCatalog::from_config(&config.series));
    let queue = Arc::new(WriteQueue::new(config.queue.clone(), telemetry.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        repository.clone(),
        telemetry,
        config.queue.clone(),
    ));
    let warmer = CacheWarmer::new(
        repository,
        cache.clone(),
        Arc::new(SystemClock),
        config.cache.capacity,
    );

    // 4. 启动流水线
    let pipeline = CandlePipeline::new(
        PipelineParts {
            queue: queue.clone(),
            cache: cache.clone(),
            dispatcher,
            warmer,
            catalog: catalog.clone(),
            blobs,
        },
        config.cache.snapshot_key.clone(),
        config.queue.shutdown_grace(),
    );
    let startup = pipeline.start().await?;
    info!(
        "Pipeline ready: {} series warmed, {} candles pending",
        startup.warmup.warmed,
        queue.len()
    );

    let ingestor = Arc::new(CandleIngestor::new(catalog, cache, queue));
    let upstream = tokio::spawn(feed::read_stdin(ingestor));

    // 5. 挂起主线程，等待外部退出信号
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping pipeline...");

    let report = pipeline.shutdown().await?;
    upstream.abort();
    info!(
        "Stopped: {} candles kept in snapshot, {} in-flight batches awaited",
        report.saved_candles, report.awaited_batches
    );

    Ok(())
}

/// # Summary
/// 初始化全局日志。
///
/// # Logic
/// 1. `RUST_LOG` 优先，否则使用配置中的级别。
/// 2. 始终输出到标准输出；配置了目录时额外按天滚动写文件。
///
/// # Returns
/// 文件写入器的守卫，须存活至进程退出。
fn init_tracing(log: &LogConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log.level))?;
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "candela.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            registry.try_init()?;
            Ok(None)
        }
    }
}
