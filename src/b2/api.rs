// 远程存储 API 抽象
//
// 上传管线只依赖这个 trait；线协议实现不在本 crate 范围内，
// 测试与演示程序使用进程内实现 MemoryB2。

use crate::b2::error::{B2Error, Result};
use crate::b2::types::{
    AccountAuthorization, BucketInfo, FileInfo, FileInfoMap, LargeFile, PartReceipt,
    PartUploadUrl, UploadUrl,
};
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// B2 远程接口
#[async_trait]
pub trait B2Api: Send + Sync {
    /// 账户授权（b2_authorize_account）
    async fn authorize_account(
        &self,
        account_id: &str,
        application_key: &str,
    ) -> Result<AccountAuthorization>;

    /// 列出存储桶（b2_list_buckets）
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    /// 获取小文件上传地址（b2_get_upload_url）
    async fn get_upload_url(&self, bucket: &BucketInfo) -> Result<UploadUrl>;

    /// 整体上传小文件（b2_upload_file）
    async fn upload_file(
        &self,
        url: &UploadUrl,
        data: &[u8],
        file_name: &str,
        content_type: &str,
        sha1: &str,
        info: &FileInfoMap,
    ) -> Result<FileInfo>;

    /// 开启大文件会话（b2_start_large_file）
    async fn start_large_file(
        &self,
        bucket: &BucketInfo,
        file_name: &str,
        content_type: &str,
        info: &FileInfoMap,
    ) -> Result<LargeFile>;

    /// 获取分片上传地址（b2_get_upload_part_url）
    async fn get_upload_part_url(&self, file: &LargeFile) -> Result<PartUploadUrl>;

    /// 上传单个分片（b2_upload_part），part_number 从 1 开始
    async fn upload_part(
        &self,
        url: &PartUploadUrl,
        data: &[u8],
        sha1: &str,
        part_number: u32,
    ) -> Result<PartReceipt>;

    /// 完成大文件（b2_finish_large_file），part_sha1s 按分片序号排列
    async fn finish_large_file(&self, file: &LargeFile, part_sha1s: &[String])
        -> Result<FileInfo>;
}

/// 以取消令牌包裹一次远程调用
///
/// 令牌触发时立即返回 `B2Error::Cancelled`，未完成的请求随 future 一起被丢弃
pub(crate) async fn cancellable<T, F>(token: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(B2Error::Cancelled),
        result = call => result,
    }
}
