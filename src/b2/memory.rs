// 进程内 B2 实现
//
// 在内存中模拟 B2 的上传接口：
// - 校验每次上传的 SHA1（与服务端行为一致）
// - 按分片序号组装大文件，要求分片连续且摘要列表一致
// - 统计各接口调用次数，供测试断言
// - 支持按分片序号注入失败、按接口名注入失败、模拟分片上传耗时

use crate::b2::api::B2Api;
use crate::b2::error::{B2Error, Result};
use crate::b2::types::{
    AccountAuthorization, BucketInfo, FileInfo, FileInfoMap, LargeFile, PartReceipt,
    PartUploadUrl, UploadUrl,
};
use crate::uploader::LARGE_FILE_THRESHOLD;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// 已存储的对象
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    pub content_sha1: String,
    pub file_info: FileInfoMap,
    pub data: Vec<u8>,
    /// 大文件的分片数；小文件为 0
    pub part_count: u32,
}

/// 未完成的大文件
#[derive(Debug)]
struct PendingLargeFile {
    bucket_id: String,
    file_name: String,
    content_type: String,
    file_info: FileInfoMap,
    /// part_number -> (sha1, data)
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

/// 接口调用计数快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallStats {
    pub authorize_account: u64,
    pub list_buckets: u64,
    pub get_upload_url: u64,
    pub upload_file: u64,
    pub start_large_file: u64,
    pub get_upload_part_url: u64,
    pub upload_part: u64,
    pub finish_large_file: u64,
}

#[derive(Debug, Default)]
struct CallCounters {
    authorize_account: AtomicU64,
    list_buckets: AtomicU64,
    get_upload_url: AtomicU64,
    upload_file: AtomicU64,
    start_large_file: AtomicU64,
    get_upload_part_url: AtomicU64,
    upload_part: AtomicU64,
    finish_large_file: AtomicU64,
}

impl CallCounters {
    fn snapshot(&self) -> CallStats {
        CallStats {
            authorize_account: self.authorize_account.load(Ordering::SeqCst),
            list_buckets: self.list_buckets.load(Ordering::SeqCst),
            get_upload_url: self.get_upload_url.load(Ordering::SeqCst),
            upload_file: self.upload_file.load(Ordering::SeqCst),
            start_large_file: self.start_large_file.load(Ordering::SeqCst),
            get_upload_part_url: self.get_upload_part_url.load(Ordering::SeqCst),
            upload_part: self.upload_part.load(Ordering::SeqCst),
            finish_large_file: self.finish_large_file.load(Ordering::SeqCst),
        }
    }
}

/// 进程内 B2 服务
#[derive(Debug, Default)]
pub struct MemoryB2 {
    buckets: RwLock<Vec<BucketInfo>>,
    /// "bucket_id/file_name" -> 对象
    objects: DashMap<String, StoredObject>,
    /// file_id -> 未完成的大文件
    large_files: DashMap<String, PendingLargeFile>,
    calls: CallCounters,
    /// 分片序号 -> 剩余失败次数
    part_failures: Mutex<HashMap<u32, u32>>,
    /// 总是失败的接口
    failing_ops: Mutex<HashSet<&'static str>>,
    /// 成功上传的分片序号（按确认顺序）
    acked_parts: Mutex<Vec<u32>>,
    part_delay: Option<Duration>,
    inflight_parts: AtomicUsize,
    max_inflight_parts: AtomicUsize,
}

impl MemoryB2 {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个存储桶
    pub fn with_bucket(self, name: &str) -> Self {
        self.buckets.write().push(BucketInfo {
            bucket_id: Uuid::new_v4().simple().to_string(),
            bucket_name: name.to_string(),
        });
        self
    }

    /// 每次分片上传额外耗时（用于观察并发）
    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    /// 让指定分片的前 `times` 次上传失败
    pub fn fail_part(&self, part_number: u32, times: u32) {
        self.part_failures.lock().insert(part_number, times);
    }

    /// 让指定接口（如 "b2_start_large_file"）始终失败
    pub fn fail_operation(&self, op: &'static str) {
        self.failing_ops.lock().insert(op);
    }

    /// 调用计数快照
    pub fn calls(&self) -> CallStats {
        self.calls.snapshot()
    }

    /// 按确认顺序返回成功上传的分片序号
    pub fn acked_parts(&self) -> Vec<u32> {
        self.acked_parts.lock().clone()
    }

    /// 同时进行中的分片上传峰值
    pub fn max_inflight_parts(&self) -> usize {
        self.max_inflight_parts.load(Ordering::SeqCst)
    }

    /// 未完成的大文件数量
    pub fn pending_large_files(&self) -> usize {
        self.large_files.len()
    }

    /// 读取已完成的对象
    pub fn object(&self, bucket_name: &str, file_name: &str) -> Option<StoredObject> {
        let bucket_id = self.bucket_id(bucket_name)?;
        self.objects
            .get(&object_key(&bucket_id, file_name))
            .map(|o| o.value().clone())
    }

    fn bucket_id(&self, bucket_name: &str) -> Option<String> {
        self.buckets
            .read()
            .iter()
            .find(|b| b.bucket_name == bucket_name)
            .map(|b| b.bucket_id.clone())
    }

    fn check_op(&self, op: &'static str) -> Result<()> {
        if self.failing_ops.lock().contains(op) {
            return Err(B2Error::api(op, "injected failure"));
        }
        Ok(())
    }

    fn take_part_failure(&self, part_number: u32) -> bool {
        let mut failures = self.part_failures.lock();
        match failures.get_mut(&part_number) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

fn object_key(bucket_id: &str, file_name: &str) -> String {
    format!("{}/{}", bucket_id, file_name)
}

fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// 进行中分片计数守卫
struct InflightGuard<'a>(&'a AtomicUsize);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl B2Api for MemoryB2 {
    async fn authorize_account(
        &self,
        account_id: &str,
        _application_key: &str,
    ) -> Result<AccountAuthorization> {
        self.calls.authorize_account.fetch_add(1, Ordering::SeqCst);
        self.check_op("b2_authorize_account")?;
        Ok(AccountAuthorization {
            account_id: account_id.to_string(),
            api_url: "memory://b2".to_string(),
            authorization_token: Uuid::new_v4().to_string(),
            recommended_part_size: LARGE_FILE_THRESHOLD as u64,
        })
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.calls.list_buckets.fetch_add(1, Ordering::SeqCst);
        self.check_op("b2_list_buckets")?;
        Ok(self.buckets.read().clone())
    }

    async fn get_upload_url(&self, bucket: &BucketInfo) -> Result<UploadUrl> {
        self.calls.get_upload_url.fetch_add(1, Ordering::SeqCst);
        self.check_op("b2_get_upload_url")?;
        Ok(UploadUrl {
            bucket_id: bucket.bucket_id.clone(),
            upload_url: format!("memory://upload/{}", bucket.bucket_id),
            authorization_token: Uuid::new_v4().to_string(),
        })
    }

    async fn upload_file(
        &self,
        url: &UploadUrl,
        data: &[u8],
        file_name: &str,
        content_type: &str,
        sha1: &str,
        info: &FileInfoMap,
    ) -> Result<FileInfo> {
        self.calls.upload_file.fetch_add(1, Ordering::SeqCst);
        self.check_op("b2_upload_file")?;

        if data.len() > LARGE_FILE_THRESHOLD {
            return Err(B2Error::api(
                "b2_upload_file",
                format!("{} bytes exceeds the single upload limit", data.len()),
            ));
        }
        let actual = sha1_hex(data);
        if actual != sha1 {
            return Err(B2Error::api(
                "b2_upload_file",
                format!("sha1 mismatch: expected {}, got {}", sha1, actual),
            ));
        }

        let file_id = Uuid::new_v4().to_string();
        self.objects.insert(
            object_key(&url.bucket_id, file_name),
            StoredObject {
                file_id: file_id.clone(),
                file_name: file_name.to_string(),
                content_type: content_type.to_string(),
                content_sha1: actual.clone(),
                file_info: info.clone(),
                data: data.to_vec(),
                part_count: 0,
            },
        );
        debug!("memory b2: stored {} ({} bytes)", file_name, data.len());

        Ok(FileInfo {
            file_id,
            file_name: file_name.to_string(),
            content_length: data.len() as u64,
            content_type: content_type.to_string(),
            content_sha1: actual,
            file_info: info.clone(),
        })
    }

    async fn start_large_file(
        &self,
        bucket: &BucketInfo,
        file_name: &str,
        content_type: &str,
        info: &FileInfoMap,
    ) -> Result<LargeFile> {
        self.calls.start_large_file.fetch_add(1, Ordering::SeqCst);
        self.check_op("b2_start_large_file")?;

        let file_id = Uuid::new_v4().to_string();
        self.large_files.insert(
            file_id.clone(),
            PendingLargeFile {
                bucket_id: bucket.bucket_id.clone(),
                file_name: file_name.to_string(),
                content_type: content_type.to_string(),
                file_info: info.clone(),
                parts: BTreeMap::new(),
            },
        );

        Ok(LargeFile {
            file_id,
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            file_info: info.clone(),
        })
    }

    async fn get_upload_part_url(&self, file: &LargeFile) -> Result<PartUploadUrl> {
        self.calls.get_upload_part_url.fetch_add(1, Ordering::SeqCst);
        self.check_op("b2_get_upload_part_url")?;
        if !self.large_files.contains_key(&file.file_id) {
            return Err(B2Error::api("b2_get_upload_part_url", "unknown file id"));
        }
        Ok(PartUploadUrl {
            file_id: file.file_id.clone(),
            upload_url: format!("memory://part/{}", Uuid::new_v4().simple()),
            authorization_token: Uuid::new_v4().to_string(),
        })
    }

    async fn upload_part(
        &self,
        url: &PartUploadUrl,
        data: &[u8],
        sha1: &str,
        part_number: u32,
    ) -> Result<PartReceipt> {
        self.calls.upload_part.fetch_add(1, Ordering::SeqCst);

        let current = self.inflight_parts.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InflightGuard(&self.inflight_parts);
        self.max_inflight_parts.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }

        self.check_op("b2_upload_part")?;
        if self.take_part_failure(part_number) {
            return Err(B2Error::api(
                "b2_upload_part",
                format!("injected failure for part {}", part_number),
            ));
        }
        if part_number == 0 || data.len() > LARGE_FILE_THRESHOLD {
            return Err(B2Error::api("b2_upload_part", "invalid part"));
        }

        let actual = sha1_hex(data);
        if actual != sha1 {
            return Err(B2Error::api(
                "b2_upload_part",
                format!("sha1 mismatch on part {}", part_number),
            ));
        }

        {
            let mut pending = self
                .large_files
                .get_mut(&url.file_id)
                .ok_or_else(|| B2Error::api("b2_upload_part", "unknown file id"))?;
            pending
                .parts
                .insert(part_number, (actual.clone(), data.to_vec()));
        }
        self.acked_parts.lock().push(part_number);

        Ok(PartReceipt {
            file_id: url.file_id.clone(),
            part_number,
            content_length: data.len() as u64,
            content_sha1: actual,
        })
    }

    async fn finish_large_file(
        &self,
        file: &LargeFile,
        part_sha1s: &[String],
    ) -> Result<FileInfo> {
        self.calls.finish_large_file.fetch_add(1, Ordering::SeqCst);
        self.check_op("b2_finish_large_file")?;

        let (_, pending) = self
            .large_files
            .remove(&file.file_id)
            .ok_or_else(|| B2Error::api("b2_finish_large_file", "unknown file id"))?;

        let expected: Vec<u32> = (1..=part_sha1s.len() as u32).collect();
        let uploaded: Vec<u32> = pending.parts.keys().copied().collect();
        if uploaded != expected {
            let message = format!("parts {:?} do not match sha1 list of {}", uploaded, expected.len());
            self.large_files.insert(file.file_id.clone(), pending);
            return Err(B2Error::api("b2_finish_large_file", message));
        }
        if pending
            .parts
            .values()
            .zip(part_sha1s)
            .any(|((stored, _), given)| stored != given)
        {
            self.large_files.insert(file.file_id.clone(), pending);
            return Err(B2Error::api("b2_finish_large_file", "part sha1 mismatch"));
        }

        let part_count = pending.parts.len() as u32;
        let data: Vec<u8> = pending
            .parts
            .into_values()
            .flat_map(|(_, bytes)| bytes)
            .collect();
        let content_length = data.len() as u64;

        self.objects.insert(
            object_key(&pending.bucket_id, &pending.file_name),
            StoredObject {
                file_id: file.file_id.clone(),
                file_name: pending.file_name.clone(),
                content_type: pending.content_type.clone(),
                content_sha1: "none".to_string(),
                file_info: pending.file_info.clone(),
                data,
                part_count,
            },
        );

        Ok(FileInfo {
            file_id: file.file_id.clone(),
            file_name: pending.file_name,
            content_length,
            content_type: pending.content_type,
            content_sha1: "none".to_string(),
            file_info: pending.file_info,
        })
    }
}
