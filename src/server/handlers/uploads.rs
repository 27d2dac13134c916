// 活跃上传查询 API

use crate::server::handlers::ApiResponse;
use crate::uploader::{WriterRegistry, WriterSnapshot};
use axum::{extract::State, Json};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// 活跃上传列表
#[derive(Debug, Serialize)]
pub struct UploadsResponse {
    pub total: usize,
    pub writers: Vec<WriterSnapshot>,
}

/// 获取活跃上传列表
///
/// GET /api/v1/uploads
pub async fn list_uploads(
    State(registry): State<Arc<WriterRegistry>>,
) -> Json<ApiResponse<UploadsResponse>> {
    let writers = registry.snapshot();
    debug!("API: 查询活跃上传, 数量={}", writers.len());

    Json(ApiResponse::success(UploadsResponse {
        total: writers.len(),
        writers,
    }))
}

/// 纯文本状态页
///
/// GET /
pub async fn stats_page(State(registry): State<Arc<WriterRegistry>>) -> String {
    render_stats(&registry.snapshot())
}

fn render_stats(writers: &[WriterSnapshot]) -> String {
    let mut out = format!("active writers: {}\n", writers.len());
    for w in writers {
        // 写入 String 不会失败
        let _ = writeln!(
            out,
            "{}\tstate={:?}\tbytes={}\tparts={}/{}\tretries={}\tworkers={}\tsince={}",
            w.key,
            w.state,
            w.bytes_written,
            w.parts_uploaded,
            w.parts_sealed,
            w.part_retries,
            w.workers,
            w.started_at,
        );
    }
    out
}
