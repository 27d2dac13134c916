// 分片上传线程池
//
// 核心功能：
// 1. 固定数量的上传线程共享同一个分片通道；线程取走分片时回执，
//    写入方等到回执才返回（交接点，写入方最多领先线程池一个正在封装的分片）
// 2. 每个线程启动时独立获取一个分片上传地址，之后复用
// 3. 上传失败的分片重新投递到同一通道，可能由任意线程重试
// 4. 重试次数受 total_retries 约束，耗尽后上报失败
//
// 退出条件：通道关闭且已取空，或关闭令牌被触发

use crate::b2::api::{cancellable, B2Api};
use crate::b2::error::B2Error;
use crate::b2::types::{LargeFile, PartUploadUrl};
use crate::uploader::chunk::UploadChunk;
use crate::uploader::status::WriterStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 初始退避延迟（毫秒）
const INITIAL_BACKOFF_MS: u64 = 100;

/// 最大退避延迟（毫秒）
const MAX_BACKOFF_MS: u64 = 5000;

/// 计算重新投递前的等待时间
///
/// # 延迟序列
/// - attempt=1: 100ms
/// - attempt=2: 200ms
/// - attempt=3: 400ms
/// - 最大: 5000ms
pub fn calculate_backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = INITIAL_BACKOFF_MS.saturating_mul(1u64 << exp);
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

/// 已确认的分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 分片序号
    pub part_number: u32,
    /// 成功前失败的次数
    pub attempts: u32,
    pub size: usize,
    pub sha1: String,
}

/// 上传线程上报的结果
pub(crate) type PartOutcome = Result<CompletedPart, B2Error>;

/// 通道中传递的分片
///
/// 写入方投递的分片带回执，线程取走时立即回执；重新投递的分片不带
#[derive(Debug)]
pub(crate) struct Handoff {
    pub chunk: UploadChunk,
    pub ack: Option<oneshot::Sender<()>>,
}

impl Handoff {
    /// 新分片，返回回执接收端
    pub(crate) fn new(chunk: UploadChunk) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                chunk,
                ack: Some(tx),
            },
            rx,
        )
    }

    fn retry(chunk: UploadChunk) -> Self {
        Self { chunk, ack: None }
    }
}

/// 线程共享上下文
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub api: Arc<dyn B2Api>,
    pub file: Arc<LargeFile>,
    /// 分片通道接收端（所有线程共享）
    pub queue: Arc<Mutex<mpsc::Receiver<Handoff>>>,
    /// 失败分片的重新投递端；弱引用，不阻止通道关闭
    pub requeue: mpsc::WeakSender<Handoff>,
    pub outcomes: mpsc::UnboundedSender<PartOutcome>,
    pub shutdown: CancellationToken,
    pub total_retries: u32,
    pub status: Arc<WriterStatus>,
}

/// 上传线程池
pub struct UploadWorkerPool {
    workers: JoinSet<()>,
    size: usize,
}

impl UploadWorkerPool {
    /// 启动 `max(1, concurrency)` 个上传线程
    pub(crate) fn spawn(ctx: WorkerContext, concurrency: usize) -> Self {
        let size = concurrency.max(1);
        let mut workers = JoinSet::new();
        for worker_id in 0..size {
            workers.spawn(run_worker(worker_id, ctx.clone()));
        }
        ctx.status.set_workers(size);

        info!(
            "[上传线程池] 已启动 {} 个上传线程: file={}",
            size, ctx.file.file_name
        );
        Self { workers, size }
    }

    /// 线程数量
    pub fn size(&self) -> usize {
        self.size
    }

    /// 等待全部线程退出
    ///
    /// 调用前应先关闭分片通道（或触发关闭令牌），否则空闲线程会一直等待
    pub async fn join(mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!("[上传线程池] 线程异常退出: {}", e);
            }
        }
    }
}

async fn run_worker(worker_id: usize, ctx: WorkerContext) {
    let endpoint = match cancellable(&ctx.shutdown, ctx.api.get_upload_part_url(&ctx.file)).await {
        Ok(endpoint) => endpoint,
        Err(B2Error::Cancelled) => return,
        Err(e) => {
            warn!("[线程#{}] 获取分片上传地址失败: {}", worker_id, e);
            let _ = ctx.outcomes.send(Err(e));
            return;
        }
    };

    debug!("[线程#{}] 就绪: {}", worker_id, endpoint.upload_url);

    while let Some(Handoff { chunk, ack }) = next_chunk(&ctx).await {
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        upload_one(worker_id, &ctx, &endpoint, chunk).await;
    }

    debug!("[线程#{}] 退出", worker_id);
}

/// 从共享通道取下一个分片
///
/// 通道关闭且取空、或关闭令牌触发时返回 None
async fn next_chunk(ctx: &WorkerContext) -> Option<Handoff> {
    let mut queue = tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => return None,
        queue = ctx.queue.lock() => queue,
    };
    tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => None,
        chunk = queue.recv() => chunk,
    }
}

async fn upload_one(
    worker_id: usize,
    ctx: &WorkerContext,
    endpoint: &PartUploadUrl,
    mut chunk: UploadChunk,
) {
    debug!(
        "[线程#{}] 上传分片 #{} (大小: {} bytes, 第 {} 次尝试)",
        worker_id,
        chunk.id,
        chunk.size,
        chunk.attempt + 1
    );

    let result = cancellable(
        &ctx.shutdown,
        ctx.api
            .upload_part(endpoint, &chunk.data, &chunk.sha1, chunk.id),
    )
    .await;

    match result {
        Ok(receipt) => {
            ctx.status.part_uploaded();
            debug!(
                "[线程#{}] ✓ 分片 #{} 上传成功 ({} bytes)",
                worker_id, receipt.part_number, receipt.content_length
            );
            let _ = ctx.outcomes.send(Ok(CompletedPart {
                part_number: chunk.id,
                attempts: chunk.attempt,
                size: chunk.size,
                sha1: chunk.sha1,
            }));
        }
        Err(B2Error::Cancelled) => {}
        Err(e) => {
            chunk.attempt += 1;
            if chunk.attempt > ctx.total_retries {
                error!(
                    "[线程#{}] 分片 #{} 上传失败，已达最大重试次数 ({}): {}",
                    worker_id, chunk.id, ctx.total_retries, e
                );
                let _ = ctx.outcomes.send(Err(B2Error::PartFailed {
                    part: chunk.id,
                    attempts: chunk.attempt,
                    message: e.to_string(),
                }));
                return;
            }

            ctx.status.part_retried();
            let delay = calculate_backoff_delay(chunk.attempt);
            warn!(
                "[线程#{}] 分片 #{} 上传失败，{}ms 后重新投递 ({}/{}): {}",
                worker_id,
                chunk.id,
                delay.as_millis(),
                chunk.attempt,
                ctx.total_retries,
                e
            );
            requeue(ctx, chunk, delay);
        }
    }
}

/// 将失败分片重新投递到共享通道
///
/// 投递在独立任务中进行：通道容量有限，线程若自己等待投递，
/// 所有线程可能同时阻塞在发送上而无人接收
fn requeue(ctx: &WorkerContext, chunk: UploadChunk, delay: Duration) {
    let Some(sender) = ctx.requeue.upgrade() else {
        debug!("分片通道已关闭，放弃重新投递分片 #{}", chunk.id);
        return;
    };
    let shutdown = ctx.shutdown.clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {}
            _ = async {
                tokio::time::sleep(delay).await;
                let _ = sender.send(Handoff::retry(chunk)).await;
            } => {}
        }
    });
}
