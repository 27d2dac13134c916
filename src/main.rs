use anyhow::Context;
use b2_uploader::{
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    logging, Client, FileInfoMap, MemoryB2,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 加载日志配置
///
/// 尝试从配置文件加载，失败时返回默认配置
async fn load_log_config() -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(DEFAULT_CONFIG_PATH).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先加载日志配置，_log_guard 必须保持存活
    let log_config = load_log_config().await;
    let _log_guard = logging::init_logging(&log_config);

    info!("B2 Uploader v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let source = args
        .next()
        .context("用法: b2-uploader <本地文件> [对象名]")?;
    let object_name = match args.next() {
        Some(name) => name,
        None => Path::new(&source)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("无法从路径推断对象名")?,
    };

    let config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("收到 Ctrl+C，取消上传...");
                cancel.cancel();
            }
        });
    }

    let api = Arc::new(MemoryB2::new().with_bucket(&config.account.bucket));
    let client = Client::authorize(
        &cancel,
        api,
        &config.account.account_id,
        &config.account.application_key,
    )
    .await?
    .with_upload_config(config.upload.clone());
    info!("账户授权完成: {}", client.account().account_id);

    let stats = if config.server.enabled {
        match client.show_stats(&config.server.stats_addr).await {
            Ok((addr, handle)) => {
                info!("诊断页面: http://{}/", addr);
                Some(handle)
            }
            Err(e) => {
                warn!("诊断页面启动失败: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let bucket = client.bucket(&cancel, &config.account.bucket).await?;
    let mut file = tokio::fs::File::open(&source)
        .await
        .with_context(|| format!("打开文件失败: {}", source))?;

    let mut writer = bucket.new_writer(
        cancel,
        &object_name,
        "application/octet-stream",
        FileInfoMap::new(),
    );
    client.registry().add(&writer);

    let result = async {
        let copied = writer.copy_from(&mut file).await?;
        writer.close().await?;
        Ok::<u64, b2_uploader::B2Error>(copied)
    }
    .await;

    client.registry().remove(&writer);

    match result {
        Ok(copied) => {
            info!("上传完成: {} 字节, 分片数={}", copied, writer.completed_parts().len());
            if let Some(file_info) = writer.file_info() {
                println!("{}", serde_json::to_string_pretty(file_info)?);
            }
        }
        Err(e) => {
            error!("上传失败: {}", e);
            if let Some(handle) = stats {
                handle.abort();
            }
            return Err(e.into());
        }
    }

    if let Some(handle) = stats {
        handle.abort();
    }
    info!("应用已安全退出");
    Ok(())
}
