// B2 API 数据类型

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 对象自定义元数据（X-Bz-Info-*）
pub type FileInfoMap = HashMap<String, String>;

/// 账户授权结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountAuthorization {
    /// 账户 ID
    pub account_id: String,
    /// API 地址
    pub api_url: String,
    /// 授权令牌
    pub authorization_token: String,
    /// 服务端建议的分片大小
    pub recommended_part_size: u64,
}

/// 存储桶
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketInfo {
    pub bucket_id: String,
    pub bucket_name: String,
}

/// 小文件上传地址（b2_get_upload_url）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadUrl {
    pub bucket_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

/// 大文件会话（b2_start_large_file）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LargeFile {
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub file_info: FileInfoMap,
}

/// 分片上传地址（b2_get_upload_part_url）
///
/// 每个上传线程独占一个地址，可连续上传多个分片
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartUploadUrl {
    pub file_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

/// 分片上传结果（b2_upload_part）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartReceipt {
    pub file_id: String,
    pub part_number: u32,
    pub content_length: u64,
    pub content_sha1: String,
}

/// 上传完成后的文件信息（b2_upload_file / b2_finish_large_file）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    pub file_id: String,
    pub file_name: String,
    pub content_length: u64,
    pub content_type: String,
    /// 小文件为整体 SHA1；大文件服务端不计算整体摘要，固定为 "none"
    pub content_sha1: String,
    #[serde(default)]
    pub file_info: FileInfoMap,
}
