// 写入器运行状态
//
// 由写入器与上传线程共同更新（原子操作），注册表与诊断页面只读

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// 写入器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterState {
    /// 数据仍在缓冲中，尚未开启大文件
    Buffering,
    /// 大文件会话已开启，分片上传中
    LargeFile,
    /// 已调用 close，等待分片全部确认并完成上传
    Finishing,
    /// 上传完成
    Completed,
    /// 上传失败或被取消
    Failed,
}

impl WriterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WriterState::Buffering,
            1 => WriterState::LargeFile,
            2 => WriterState::Finishing,
            3 => WriterState::Completed,
            _ => WriterState::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WriterState::Buffering => 0,
            WriterState::LargeFile => 1,
            WriterState::Finishing => 2,
            WriterState::Completed => 3,
            WriterState::Failed => 4,
        }
    }
}

/// 写入器共享状态
#[derive(Debug)]
pub struct WriterStatus {
    bucket: String,
    name: String,
    started_at: DateTime<Local>,
    state: AtomicU8,
    bytes_written: AtomicU64,
    parts_sealed: AtomicU32,
    parts_uploaded: AtomicU32,
    part_retries: AtomicU32,
    workers: AtomicUsize,
}

impl WriterStatus {
    pub fn new(bucket: &str, name: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            name: name.to_string(),
            started_at: Local::now(),
            state: AtomicU8::new(WriterState::Buffering.as_u8()),
            bytes_written: AtomicU64::new(0),
            parts_sealed: AtomicU32::new(0),
            parts_uploaded: AtomicU32::new(0),
            part_retries: AtomicU32::new(0),
            workers: AtomicUsize::new(0),
        }
    }

    /// 注册表键："存储桶/对象名"
    pub fn key(&self) -> String {
        format!("{}/{}", self.bucket, self.name)
    }

    pub fn state(&self) -> WriterState {
        WriterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: WriterState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    pub fn parts_sealed(&self) -> u32 {
        self.parts_sealed.load(Ordering::SeqCst)
    }

    pub fn parts_uploaded(&self) -> u32 {
        self.parts_uploaded.load(Ordering::SeqCst)
    }

    pub fn part_retries(&self) -> u32 {
        self.part_retries.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    pub(crate) fn add_bytes(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::SeqCst);
    }

    pub(crate) fn part_sealed(&self) {
        self.parts_sealed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn part_uploaded(&self) {
        self.parts_uploaded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn part_retried(&self) {
        self.part_retries.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn set_workers(&self, workers: usize) {
        self.workers.store(workers, Ordering::SeqCst);
    }

    /// 生成可序列化快照
    pub fn snapshot(&self) -> WriterSnapshot {
        WriterSnapshot {
            key: self.key(),
            bucket: self.bucket.clone(),
            name: self.name.clone(),
            state: self.state(),
            bytes_written: self.bytes_written(),
            parts_sealed: self.parts_sealed(),
            parts_uploaded: self.parts_uploaded(),
            part_retries: self.part_retries(),
            workers: self.workers(),
            started_at: self.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// 写入器状态快照（诊断页面输出）
#[derive(Debug, Clone, Serialize)]
pub struct WriterSnapshot {
    pub key: String,
    pub bucket: String,
    pub name: String,
    pub state: WriterState,
    pub bytes_written: u64,
    pub parts_sealed: u32,
    pub parts_uploaded: u32,
    pub part_retries: u32,
    pub workers: usize,
    pub started_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        let status = WriterStatus::new("media", "a.bin");
        assert_eq!(status.state(), WriterState::Buffering);
        for state in [
            WriterState::LargeFile,
            WriterState::Finishing,
            WriterState::Completed,
            WriterState::Failed,
        ] {
            status.set_state(state);
            assert_eq!(status.state(), state);
        }
    }

    #[test]
    fn test_snapshot_serializes() {
        let status = WriterStatus::new("media", "a.bin");
        status.add_bytes(42);
        status.part_sealed();
        let json = serde_json::to_value(status.snapshot()).unwrap();
        assert_eq!(json["key"], "media/a.bin");
        assert_eq!(json["state"], "buffering");
        assert_eq!(json["bytes_written"], 42);
        assert_eq!(json["parts_sealed"], 1);
    }
}
