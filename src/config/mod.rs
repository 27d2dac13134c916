// 配置管理模块

use crate::uploader::LARGE_FILE_THRESHOLD;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 诊断页面配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 账户配置
    #[serde(default)]
    pub account: AccountConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（按天滚动，最多保留的文件数）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 诊断页面配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 是否启动诊断页面
    #[serde(default)]
    pub enabled: bool,
    /// 监听地址
    #[serde(default = "default_stats_addr")]
    pub stats_addr: String,
}

fn default_stats_addr() -> String {
    "127.0.0.1:18889".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stats_addr: default_stats_addr(),
        }
    }
}

/// 账户配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// 账户 ID
    #[serde(default)]
    pub account_id: String,
    /// 应用密钥
    #[serde(default)]
    pub application_key: String,
    /// 目标存储桶
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_bucket() -> String {
    "uploads".to_string()
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            application_key: String::new(),
            bucket: default_bucket(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 大文件并发上传线程数（小于 1 按 1 处理）
    ///
    /// 每个线程使用独立的上传地址，但每个线程也可能持有一个完整分片的内存
    #[serde(default = "default_concurrent_uploads")]
    pub concurrent_uploads: usize,
    /// 单个分片失败后的最大重试次数
    #[serde(default = "default_total_retries")]
    pub total_retries: u32,
    /// 分片大小（字节），上限 1e8
    #[serde(default = "default_part_size")]
    pub part_size: usize,
}

fn default_concurrent_uploads() -> usize {
    2
}

fn default_total_retries() -> u32 {
    3
}

fn default_part_size() -> usize {
    LARGE_FILE_THRESHOLD
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrent_uploads: default_concurrent_uploads(),
            total_retries: default_total_retries(),
            part_size: default_part_size(),
        }
    }
}

impl UploadConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.part_size == 0 || self.part_size > LARGE_FILE_THRESHOLD {
            anyhow::bail!(
                "分片大小必须在 1 到 {} 字节之间，当前: {}",
                LARGE_FILE_THRESHOLD,
                self.part_size
            );
        }
        if self.concurrent_uploads > 32 {
            anyhow::bail!(
                "并发上传线程数不能超过 32（每个线程最多占用一个分片的内存），当前: {}",
                self.concurrent_uploads
            );
        }
        Ok(())
    }
}

impl AppConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        self.upload.validate().context("上传配置验证失败")?;
        if self.server.enabled && self.server.stats_addr.trim().is_empty() {
            anyhow::bail!("已启用诊断页面但未配置监听地址");
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载配置，失败时使用默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.upload.concurrent_uploads, 2);
        assert_eq!(config.upload.total_retries, 3);
        assert_eq!(config.upload.part_size, 100_000_000);
        assert!(!config.server.enabled);
        assert_eq!(config.account.bucket, "uploads");
        assert!(config.upload.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/app.toml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.upload.concurrent_uploads = 8;
        config.account.bucket = "backups".to_string();
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.upload.concurrent_uploads, 8);
        assert_eq!(loaded.account.bucket, "backups");
        assert_eq!(loaded.log.level, "info");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [upload]
            total_retries = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.upload.total_retries, 10);
        assert_eq!(config.upload.concurrent_uploads, 2);
        assert_eq!(config.upload.part_size, LARGE_FILE_THRESHOLD);
        assert_eq!(config.log.retention_days, 7);
    }

    #[test]
    fn test_invalid_part_size() {
        let upload = UploadConfig {
            part_size: LARGE_FILE_THRESHOLD + 1,
            ..UploadConfig::default()
        };
        assert!(upload.validate().is_err());

        let upload = UploadConfig {
            part_size: 0,
            ..UploadConfig::default()
        };
        assert!(upload.validate().is_err());
    }

    #[test]
    fn test_enabled_server_requires_address() {
        let mut config = AppConfig::default();
        config.server.enabled = true;
        assert!(config.validate().is_ok());
        config.server.stats_addr = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let config = AppConfig::load_or_default("/nonexistent/app.toml").await;
        assert_eq!(config.upload.total_retries, 3);
    }
}
