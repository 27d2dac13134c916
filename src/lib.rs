// B2 流式上传库
// 将任意长度的字节流写入 B2 对象，超过分片大小时自动切换为并发分片上传

// 远程存储 API 模块
pub mod b2;

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 诊断状态页模块
pub mod server;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use b2::{B2Api, B2Error, Bucket, Client, FileInfo, FileInfoMap, MemoryB2};
pub use config::{AppConfig, LogConfig, UploadConfig};
pub use uploader::{
    CompletedPart, Writer, WriterRegistry, WriterSnapshot, WriterState, LARGE_FILE_THRESHOLD,
};
