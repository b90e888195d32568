use candela_core::candle::entity::CandleUpdate;
use candela_core::ingest::error::{IngestError, QueueError};
use candela_ingest::orchestrator::{Admission, CandleIngestor};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

/// 解析一行 NDJSON，空行返回 None。
pub fn parse_line(line: &str) -> Option<Result<CandleUpdate, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// # Summary
/// 从标准输入逐行读取 K 线更新事件并交给摄入编排器。
///
/// # Logic
/// 1. 格式错误的行记录后跳过。
/// 2. 写队列停止后退出。
/// 3. 输入结束或读取失败时退出。
pub async fn read_stdin(ingestor: Arc<CandleIngestor>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut admitted: u64 = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Ingestion input closed after {} candles", admitted);
                break;
            }
            Err(e) => {
                error!("Failed to read ingestion input: {}", e);
                break;
            }
        };

        let update = match parse_line(&line) {
            Some(Ok(update)) => update,
            Some(Err(e)) => {
                warn!("Skipping malformed update: {}", e);
                continue;
            }
            None => continue,
        };

        match ingestor.process_update(update).await {
            Ok(Admission::Admitted) => admitted += 1,
            Ok(Admission::Rejected) => {}
            Err(IngestError::Queue {
                source: QueueError::Stopped,
                ..
            }) => {
                debug!("Write queue stopped, ending ingestion");
                break;
            }
            Err(e) => warn!("{}", e),
        }
    }
}
