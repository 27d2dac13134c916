// 诊断状态页服务

pub mod handlers;

use crate::uploader::WriterRegistry;
use anyhow::Context;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// 构建状态页路由
pub fn router(registry: Arc<WriterRegistry>) -> Router {
    Router::new()
        .route("/", get(handlers::stats_page))
        .route("/api/v1/uploads", get(handlers::list_uploads))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http())) // HTTP 请求日志
        .with_state(registry)
}

/// 绑定地址并在后台运行状态页
///
/// 返回实际监听地址与服务任务句柄
pub async fn spawn_stats_server(
    addr: &str,
    registry: Arc<WriterRegistry>,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("绑定状态页地址失败: {}", addr))?;
    let local_addr = listener.local_addr()?;

    info!("状态页启动在: http://{}", local_addr);
    info!("API 基础路径: http://{}/api/v1", local_addr);

    let app = router(registry);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("状态页服务错误: {}", e);
        }
    });

    Ok((local_addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::b2::{Client, FileInfoMap, MemoryB2};
    use crate::uploader::Writer;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    async fn client_with_writer() -> (Client, Writer) {
        let api = Arc::new(MemoryB2::new().with_bucket("media"));
        let client = Client::authorize(&CancellationToken::new(), api, "acct", "key")
            .await
            .unwrap();
        let bucket = client.bucket(&CancellationToken::new(), "media").await.unwrap();
        let mut writer = bucket.new_writer(
            CancellationToken::new(),
            "video.mp4",
            "video/mp4",
            FileInfoMap::new(),
        );
        writer.write(b"abc").await.unwrap();
        client.registry().add(&writer);
        (client, writer)
    }

    #[tokio::test]
    async fn test_uploads_api_lists_registered_writer() {
        let (client, _writer) = client_with_writer().await;
        let app = router(client.registry().clone());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/uploads")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"]["total"], 1);
        assert_eq!(json["data"]["writers"][0]["key"], "media/video.mp4");
        assert_eq!(json["data"]["writers"][0]["state"], "buffering");
        assert_eq!(json["data"]["writers"][0]["bytes_written"], 3);
    }

    #[tokio::test]
    async fn test_text_page_after_remove() {
        let (client, writer) = client_with_writer().await;
        client.registry().remove(&writer);
        let app = router(client.registry().clone());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"active writers: 0\n");
    }

    #[tokio::test]
    async fn test_show_stats_binds_ephemeral_port() {
        let (client, _writer) = client_with_writer().await;
        let (addr, handle) = client.show_stats("127.0.0.1:0").await.unwrap();
        assert_ne!(addr.port(), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn test_show_stats_bad_address() {
        let (client, _writer) = client_with_writer().await;
        assert!(client.show_stats("not-an-address").await.is_err());
    }
}
