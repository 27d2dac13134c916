// B2 错误类型
//
// 库层统一使用 B2Error，应用层（配置、诊断服务、命令行）使用 anyhow

use thiserror::Error;

/// B2 操作结果
pub type Result<T> = std::result::Result<T, B2Error>;

/// B2 上传错误
#[derive(Debug, Error)]
pub enum B2Error {
    /// 存储桶不存在（查找失败，不会创建写入器）
    #[error("{0}: 存储桶不存在")]
    NoSuchBucket(String),

    /// 远程 API 调用失败
    #[error("{op} 调用失败: {message}")]
    Api {
        /// 接口名称，如 b2_start_large_file
        op: &'static str,
        /// 服务端或传输层返回的错误信息
        message: String,
    },

    /// 分片重试次数耗尽
    #[error("分片 #{part} 上传失败（已尝试 {attempts} 次）: {message}")]
    PartFailed {
        part: u32,
        attempts: u32,
        message: String,
    },

    /// 上传被外部取消
    #[error("上传已取消")]
    Cancelled,

    /// 所有上传线程均已退出，分片无人接收
    #[error("上传线程已全部退出")]
    WorkersGone,

    /// 写入器已关闭
    #[error("写入器已关闭")]
    Closed,

    /// 写入器此前已失败，拒绝继续写入
    #[error("写入器已因先前的错误中止")]
    Aborted,

    /// 读取数据源失败
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl B2Error {
    /// 构造 API 错误
    pub fn api(op: &'static str, message: impl Into<String>) -> Self {
        B2Error::Api {
            op,
            message: message.into(),
        }
    }

    /// 是否为取消导致的错误
    pub fn is_cancelled(&self) -> bool {
        matches!(self, B2Error::Cancelled)
    }
}
