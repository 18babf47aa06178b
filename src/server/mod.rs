//! HTTP 和 WebSocket 接口
//!
//! - `GET    /api/v1/downloads` 任务列表（`status`、`category`、`limit`）
//! - `POST   /api/v1/downloads` 通用提交，按 `type`（url、magnet、batch）分派
//! - `GET    /api/v1/downloads/{id}` 单个任务
//! - `POST   /api/v1/downloads/url|magnet|batch` 提交（JSON）
//! - `POST   /api/v1/downloads/torrent` 提交种子（原始字节）
//! - `POST   /api/v1/downloads/{id}/pause|resume|retry`
//! - `DELETE /api/v1/downloads/{id}?force=true` 删除，`force` 可选
//! - `GET    /api/v1/statistics`、`GET /api/v1/health`、`POST /api/v1/sync`
//! - `GET    /api/v1/system/test` 守护进程连接检查
//! - `GET    /api/v1/ws` 推送订阅

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::broadcast::BroadcastHub;
use crate::common::config::ServerConfig;
use crate::downloader::DownloadManager;
use crate::parser::torrent::MAX_TORRENT_SIZE;
use crate::sync::Reconciler;

pub mod error;
pub mod handlers;
pub mod ws;

pub use error::ApiError;

/// 各个处理函数共享的状态
pub struct AppState {
    pub manager: DownloadManager,
    pub reconciler: Arc<Reconciler>,
    pub hub: Arc<BroadcastHub>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/downloads",
            get(handlers::list_downloads).post(handlers::submit_download),
        )
        .route("/downloads/url", post(handlers::submit_url))
        .route("/downloads/magnet", post(handlers::submit_magnet))
        .route(
            "/downloads/torrent",
            // 留一点余量，超限由种子校验给出明确错误
            post(handlers::submit_torrent).layer(DefaultBodyLimit::max(MAX_TORRENT_SIZE + 1024)),
        )
        .route("/downloads/batch", post(handlers::submit_batch))
        .route(
            "/downloads/{id}",
            get(handlers::get_download).delete(handlers::remove_download),
        )
        .route("/downloads/{id}/pause", post(handlers::pause_download))
        .route("/downloads/{id}/resume", post(handlers::resume_download))
        .route("/downloads/{id}/retry", post(handlers::retry_download))
        .route("/statistics", get(handlers::statistics))
        .route("/health", get(handlers::health))
        .route("/sync", post(handlers::sync_now))
        .route("/system/test", get(handlers::system_test))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/api/v1", api)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

/// 启动服务，取消令牌触发后优雅退出
pub async fn serve(
    state: Arc<AppState>,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {}", addr))?;
    info!("🚀 服务已启动: http://{}/api/v1", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP 服务异常退出")?;

    info!("服务已停止");
    Ok(())
}
