// 流式写入器
//
// 上传流程：
// 1. 写入的数据进入分片缓冲，SHA1 同步更新
// 2. 缓冲首次溢出时开启大文件会话并启动上传线程池（只发生一次）
// 3. 此后每次溢出封装一个分片，等到某个线程取走后才返回（背压）
// 4. close 时：
//    - 从未溢出：整体上传（b2_get_upload_url + b2_upload_file）
//    - 已溢出：封装剩余数据为最后一片，等待全部分片确认，
//      关闭通道并等待线程退出，最后 b2_finish_large_file
//
// close 幂等，重复调用直接返回 Ok

use crate::b2::api::{cancellable, B2Api};
use crate::b2::error::{B2Error, Result};
use crate::b2::types::{BucketInfo, FileInfo, FileInfoMap, LargeFile};
use crate::config::UploadConfig;
use crate::uploader::chunk::ChunkBuffer;
use crate::uploader::status::{WriterState, WriterStatus};
use crate::uploader::worker::{
    CompletedPart, Handoff, PartOutcome, UploadWorkerPool, WorkerContext,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// copy_from 每次读取的字节数
const COPY_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// 进行中的大文件会话
struct LargeFileSession {
    file: Arc<LargeFile>,
    handoff: mpsc::Sender<Handoff>,
    outcomes: mpsc::UnboundedReceiver<PartOutcome>,
    pool: UploadWorkerPool,
}

/// B2 流式写入器
///
/// 对象不超过分片大小时整体上传，否则自动切换为大文件分片上传。
/// 由于 B2 的接口限制，每个写入器最多缓冲一个分片（默认 1e8 字节），
/// 线程池中每个线程也可能持有一个分片。
pub struct Writer {
    /// 并发上传线程数，小于 1 时按 1 处理；需在首次溢出前设置
    pub concurrent_uploads: usize,
    /// 单个分片失败后的最大重试次数，超过后上传失败
    pub total_retries: u32,

    api: Arc<dyn B2Api>,
    bucket: BucketInfo,
    name: String,
    content_type: String,
    info: FileInfoMap,

    /// 外部取消令牌，贯穿所有远程调用
    cancel: CancellationToken,
    /// 线程池关闭令牌（外部令牌的子令牌），写入器结束或被丢弃时触发
    shutdown: CancellationToken,

    buffer: ChunkBuffer,
    /// 已封装的分片数
    sealed: u32,
    large_file_started: AtomicBool,
    finalized: AtomicBool,
    aborted: bool,
    session: Option<LargeFileSession>,

    completed: Vec<CompletedPart>,
    file_info: Option<FileInfo>,
    workers_spawned: usize,
    status: Arc<WriterStatus>,
}

impl Writer {
    pub(crate) fn new(
        api: Arc<dyn B2Api>,
        bucket: BucketInfo,
        cancel: CancellationToken,
        name: String,
        content_type: String,
        info: FileInfoMap,
        config: &UploadConfig,
    ) -> Self {
        let status = Arc::new(WriterStatus::new(&bucket.bucket_name, &name));
        let shutdown = cancel.child_token();
        Self {
            concurrent_uploads: config.concurrent_uploads,
            total_retries: config.total_retries,
            api,
            bucket,
            name,
            content_type,
            info,
            cancel,
            shutdown,
            buffer: ChunkBuffer::new(config.part_size),
            sealed: 0,
            large_file_started: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            aborted: false,
            session: None,
            completed: Vec::new(),
            file_info: None,
            workers_spawned: 0,
            status,
        }
    }

    /// 调整分片大小（不超过 `LARGE_FILE_THRESHOLD`），只能在写入数据之前调用
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        debug_assert!(self.buffer.is_empty() && self.sealed == 0);
        self.buffer = ChunkBuffer::new(part_size);
        self
    }

    /// 注册表键："存储桶/对象名"
    pub fn key(&self) -> String {
        self.status.key()
    }

    /// 对象名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 共享状态句柄
    pub fn status(&self) -> Arc<WriterStatus> {
        self.status.clone()
    }

    /// 分片大小
    pub fn part_size(&self) -> usize {
        self.buffer.capacity()
    }

    /// 已确认的分片（close 成功后按分片序号排列）
    pub fn completed_parts(&self) -> &[CompletedPart] {
        &self.completed
    }

    /// 上传完成后的文件信息
    pub fn file_info(&self) -> Option<&FileInfo> {
        self.file_info.as_ref()
    }

    /// 实际启动的上传线程数（未进入大文件模式时为 0）
    pub fn workers_spawned(&self) -> usize {
        self.workers_spawned
    }

    /// 写入数据
    ///
    /// 返回写入的字节数。缓冲溢出时在本次调用内封装并投递分片，
    /// 投递或开启大文件失败会使写入器中止。
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(B2Error::Closed);
        }
        if self.aborted {
            return Err(B2Error::Aborted);
        }

        let mut written = 0;
        let mut rest = data;
        loop {
            let before = rest.len();
            rest = self.buffer.fill(rest);
            written += before - rest.len();
            if rest.is_empty() {
                break;
            }
            if let Err(e) = self.send_chunk().await {
                self.status.add_bytes(written);
                self.abort(&e);
                return Err(e);
            }
        }

        self.status.add_bytes(written);
        Ok(written)
    }

    /// 从异步读取源复制全部数据，返回复制的字节数
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(B2Error::Cancelled),
                n = reader.read(&mut buf) => n?,
            };
            if n == 0 {
                break;
            }
            self.write(&buf[..n]).await?;
            total += n as u64;
        }
        Ok(total)
    }

    /// 封装当前缓冲并投递给线程池
    ///
    /// 首次调用时开启大文件会话并启动线程池
    async fn send_chunk(&mut self) -> Result<()> {
        if !self.large_file_started.swap(true, Ordering::SeqCst) {
            self.start_large_file().await?;
        }

        let session = self.session.as_mut().ok_or(B2Error::Aborted)?;

        // 先收取已完成的结果，尽早发现耗尽重试的分片
        while let Ok(outcome) = session.outcomes.try_recv() {
            self.completed.push(outcome?);
        }

        let chunk = self.buffer.seal(self.sealed + 1);
        let (id, size) = (chunk.id, chunk.size);
        let (handoff, ack) = Handoff::new(chunk);

        // 等到某个线程取走分片
        let delivered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(B2Error::Cancelled),
            delivered = async {
                session.handoff.send(handoff).await.ok()?;
                ack.await.ok()
            } => delivered.is_some(),
        };
        if !delivered {
            return Err(first_failure(&mut session.outcomes));
        }

        self.sealed = id;
        self.status.part_sealed();
        debug!("[{}] 分片 #{} 已投递 ({} bytes)", self.name, id, size);
        Ok(())
    }

    /// 开启大文件会话，分配分片通道并启动线程池
    async fn start_large_file(&mut self) -> Result<()> {
        let file = cancellable(
            &self.cancel,
            self.api
                .start_large_file(&self.bucket, &self.name, &self.content_type, &self.info),
        )
        .await?;
        info!(
            "开启大文件上传: bucket={}, name={}, file_id={}",
            self.bucket.bucket_name, self.name, file.file_id
        );

        let file = Arc::new(file);
        let (handoff, queue) = mpsc::channel(1);
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();

        let ctx = WorkerContext {
            api: self.api.clone(),
            file: file.clone(),
            queue: Arc::new(Mutex::new(queue)),
            requeue: handoff.downgrade(),
            outcomes: outcome_tx,
            shutdown: self.shutdown.clone(),
            total_retries: self.total_retries,
            status: self.status.clone(),
        };
        let pool = UploadWorkerPool::spawn(ctx, self.concurrent_uploads);
        self.workers_spawned = pool.size();
        self.status.set_state(WriterState::LargeFile);

        self.session = Some(LargeFileSession {
            file,
            handoff,
            outcomes,
            pool,
        });
        Ok(())
    }

    /// 关闭写入器，完成上传
    ///
    /// 只执行一次；之后的调用直接返回 Ok，不再发起远程请求
    pub async fn close(&mut self) -> Result<()> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.status.set_state(WriterState::Finishing);

        let result = self.finalize().await;
        match &result {
            Ok(()) => self.status.set_state(WriterState::Completed),
            Err(e) => {
                error!("[{}] 上传失败: {}", self.key(), e);
                self.status.set_state(WriterState::Failed);
            }
        }

        // 释放仍在等待的线程与重新投递任务
        self.shutdown.cancel();
        self.session = None;
        result
    }

    async fn finalize(&mut self) -> Result<()> {
        if self.aborted {
            return Err(B2Error::Aborted);
        }
        if self.sealed == 0 {
            return self.simple_write_file().await;
        }

        if !self.buffer.is_empty() {
            self.send_chunk().await?;
        }

        let LargeFileSession {
            file,
            handoff,
            mut outcomes,
            pool,
        } = self.session.take().ok_or(B2Error::Aborted)?;

        // 等待全部分片确认；期间失败分片仍需通过通道重新投递，通道保持打开
        while self.completed.len() < self.sealed as usize {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(B2Error::Cancelled),
                outcome = outcomes.recv() => outcome,
            };
            match outcome {
                Some(Ok(part)) => self.completed.push(part),
                Some(Err(e)) => return Err(e),
                None => return Err(B2Error::WorkersGone),
            }
        }

        drop(handoff);
        pool.join().await;

        self.completed.sort_by_key(|p| p.part_number);
        let part_sha1s: Vec<String> = self.completed.iter().map(|p| p.sha1.clone()).collect();

        let info = cancellable(&self.cancel, self.api.finish_large_file(&file, &part_sha1s)).await?;
        info!(
            "大文件上传完成: {} ({} 个分片, {} bytes)",
            info.file_name,
            part_sha1s.len(),
            info.content_length
        );
        self.file_info = Some(info);
        Ok(())
    }

    /// 整体上传（对象未超过分片大小）
    async fn simple_write_file(&mut self) -> Result<()> {
        let url = cancellable(&self.cancel, self.api.get_upload_url(&self.bucket)).await?;
        let sha1 = self.buffer.sha1_hex();
        let info = cancellable(
            &self.cancel,
            self.api.upload_file(
                &url,
                self.buffer.as_slice(),
                &self.name,
                &self.content_type,
                &sha1,
                &self.info,
            ),
        )
        .await?;

        info!(
            "整体上传完成: {} ({} bytes, sha1={})",
            info.file_name, info.content_length, sha1
        );
        self.file_info = Some(info);
        Ok(())
    }

    fn abort(&mut self, e: &B2Error) {
        error!("[{}] 写入中止: {}", self.key(), e);
        self.aborted = true;
        self.status.set_state(WriterState::Failed);
        self.shutdown.cancel();
        self.session = None;
    }
}

/// 线程全部退出后，取出它们上报的第一个错误
fn first_failure(outcomes: &mut mpsc::UnboundedReceiver<PartOutcome>) -> B2Error {
    while let Ok(outcome) = outcomes.try_recv() {
        if let Err(e) = outcome {
            return e;
        }
    }
    B2Error::WorkersGone
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.finalized.load(Ordering::SeqCst) && self.session.is_some() {
            warn!("[{}] 写入器未关闭即被丢弃，停止上传线程", self.key());
        }
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("key", &self.key())
            .field("concurrent_uploads", &self.concurrent_uploads)
            .field("total_retries", &self.total_retries)
            .field("buffer", &self.buffer)
            .field("sealed", &self.sealed)
            .field("state", &self.status.state())
            .finish()
    }
}
