// 上传引擎模块
//
// 流式写入 B2：
// - 不超过分片大小的对象整体上传
// - 超过后切换为大文件分片上传（一次性切换）
// - 固定大小的上传线程池并发上传分片，失败分片重新投递
// - 写入器注册表供诊断页面使用

pub mod chunk;
pub mod registry;
pub mod status;
pub mod worker;
pub mod writer;

pub use chunk::{ChunkBuffer, UploadChunk, LARGE_FILE_THRESHOLD};
pub use registry::WriterRegistry;
pub use status::{WriterSnapshot, WriterState, WriterStatus};
pub use worker::{calculate_backoff_delay, CompletedPart, UploadWorkerPool};
pub use writer::Writer;
