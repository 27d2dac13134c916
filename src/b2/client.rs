// B2 客户端
//
// 账户授权、存储桶查找与写入器创建都是对远程 API 的薄封装，
// 唯一带状态的部分是写入器注册表（供诊断页面读取）。

use crate::b2::api::{cancellable, B2Api};
use crate::b2::error::{B2Error, Result};
use crate::b2::types::{AccountAuthorization, BucketInfo, FileInfoMap};
use crate::config::UploadConfig;
use crate::uploader::{Writer, WriterRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// B2 客户端
#[derive(Clone)]
pub struct Client {
    api: Arc<dyn B2Api>,
    account: AccountAuthorization,
    registry: Arc<WriterRegistry>,
    upload_config: UploadConfig,
}

impl Client {
    /// 授权账户并创建客户端
    ///
    /// 令牌触发时返回 `B2Error::Cancelled`
    pub async fn authorize(
        cancel: &CancellationToken,
        api: Arc<dyn B2Api>,
        account_id: &str,
        application_key: &str,
    ) -> Result<Self> {
        let account =
            cancellable(cancel, api.authorize_account(account_id, application_key)).await?;
        info!("账户授权成功: account={}, api={}", account.account_id, account.api_url);

        Ok(Self {
            api,
            account,
            registry: Arc::new(WriterRegistry::new()),
            upload_config: UploadConfig::default(),
        })
    }

    /// 设置新建写入器的默认上传参数
    pub fn with_upload_config(mut self, config: UploadConfig) -> Self {
        self.upload_config = config;
        self
    }

    /// 账户授权信息
    pub fn account(&self) -> &AccountAuthorization {
        &self.account
    }

    /// 写入器注册表
    pub fn registry(&self) -> &Arc<WriterRegistry> {
        &self.registry
    }

    /// 按名称查找存储桶
    ///
    /// 不存在时返回 `B2Error::NoSuchBucket`
    pub async fn bucket(&self, cancel: &CancellationToken, name: &str) -> Result<Bucket> {
        let buckets = cancellable(cancel, self.api.list_buckets()).await?;
        let info = buckets
            .into_iter()
            .find(|b| b.bucket_name == name)
            .ok_or_else(|| B2Error::NoSuchBucket(name.to_string()))?;

        Ok(Bucket {
            api: self.api.clone(),
            info,
            upload_config: self.upload_config.clone(),
        })
    }

    /// 在指定地址启动诊断页面
    ///
    /// 返回实际监听地址（addr 端口为 0 时由系统分配）与服务任务句柄
    pub async fn show_stats(&self, addr: &str) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
        crate::server::spawn_stats_server(addr, self.registry.clone()).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("account_id", &self.account.account_id)
            .field("active_writers", &self.registry.len())
            .finish()
    }
}

/// 存储桶句柄
#[derive(Clone)]
pub struct Bucket {
    api: Arc<dyn B2Api>,
    info: BucketInfo,
    upload_config: UploadConfig,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("bucket_id", &self.info.bucket_id)
            .field("bucket_name", &self.info.bucket_name)
            .finish()
    }
}

impl Bucket {
    /// 存储桶名称
    pub fn name(&self) -> &str {
        &self.info.bucket_name
    }

    /// 存储桶信息
    pub fn info(&self) -> &BucketInfo {
        &self.info
    }

    /// 创建写入器
    ///
    /// 写入器不会自动登记到注册表，需要诊断时由调用方 `registry().add(&writer)`
    pub fn new_writer(
        &self,
        cancel: CancellationToken,
        name: impl Into<String>,
        content_type: impl Into<String>,
        info: FileInfoMap,
    ) -> Writer {
        Writer::new(
            self.api.clone(),
            self.info.clone(),
            cancel,
            name.into(),
            content_type.into(),
            info,
            &self.upload_config,
        )
    }
}
