use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiError;
use crate::common::category::Category;
use crate::downloader::{DownloadError, Submission};
use crate::parser::batch::split_batch_text;
use crate::registry::{TaskFilter, TaskId, TaskStatus};

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

impl ListQuery {
    fn into_filter(self) -> Result<TaskFilter, ApiError> {
        let status = self
            .status
            .filter(|s| !s.is_empty() && s != "all")
            .map(|s| s.parse::<TaskStatus>())
            .transpose()
            .map_err(|e: String| ApiError::bad_request(e))?;
        let category = self
            .category
            .filter(|c| !c.is_empty() && c != "all")
            .map(|c| c.parse::<Category>())
            .transpose()
            .map_err(|e: String| ApiError::bad_request(e))?;
        Ok(TaskFilter {
            status,
            category,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct MagnetRequest {
    pub magnet: String,
}

/// 批量提交：`urls` 数组或整段 `text` 二选一，两者都给时合并
#[derive(Debug, Default, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// 通用提交入口，按 `type` 分派，缺省为 url；磁力链接也可以放在 `url` 字段
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub magnet: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
}

fn default_kind() -> String {
    "url".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveQuery {
    #[serde(default)]
    pub force: bool,
}

fn parse_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::from(DownloadError::TaskNotFound(raw.to_string())))
}

fn submission_response(state: &AppState, submission: Submission) -> ApiResult {
    let task = state.manager.get_task(&submission.task_id)?;
    Ok(Json(json!({
        "success": true,
        "task_id": submission.task_id,
        "daemon_handle": submission.daemon_handle,
        "deferred": submission.deferred,
        "task": task,
    })))
}

pub async fn list_downloads(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let filter = query.into_filter()?;
    let downloads = state.manager.list_tasks(&filter);
    Ok(Json(json!({
        "success": true,
        "count": downloads.len(),
        "downloads": downloads,
    })))
}

pub async fn get_download(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let task = state.manager.get_task(&parse_id(&id)?)?;
    Ok(Json(json!({ "success": true, "task": task })))
}

pub async fn submit_url(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UrlRequest>,
) -> ApiResult {
    let submission = state.manager.submit_url(&req.url).await?;
    submission_response(&state, submission)
}

pub async fn submit_magnet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MagnetRequest>,
) -> ApiResult {
    let submission = state.manager.submit_magnet(&req.magnet).await?;
    submission_response(&state, submission)
}

// 请求体就是种子文件的原始内容
pub async fn submit_torrent(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let submission = state.manager.submit_torrent(body.to_vec()).await?;
    submission_response(&state, submission)
}

pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> ApiResult {
    batch_response(&state, req).await
}

async fn batch_response(state: &AppState, req: BatchRequest) -> ApiResult {
    let mut lines = req.urls;
    if let Some(text) = &req.text {
        lines.extend(split_batch_text(text));
    }
    if lines.is_empty() {
        return Err(ApiError::bad_request("没有提供任何下载地址"));
    }

    let report = state.manager.submit_batch(&lines).await;
    Ok(Json(json!({
        "success": report.success_count > 0 || report.fail_count == 0,
        "success_count": report.success_count,
        "fail_count": report.fail_count,
        "per_line_errors": report.per_line_errors,
        "task_ids": report.task_ids,
    })))
}

pub async fn submit_download(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DownloadRequest>,
) -> ApiResult {
    match req.kind.to_ascii_lowercase().as_str() {
        "url" => {
            let url = req
                .url
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| ApiError::bad_request("缺少 url 字段"))?;
            let submission = state.manager.submit_url(&url).await?;
            submission_response(&state, submission)
        }
        "magnet" => {
            let magnet = req
                .magnet
                .or(req.url)
                .filter(|m| !m.trim().is_empty())
                .ok_or_else(|| ApiError::bad_request("缺少磁力链接"))?;
            let submission = state.manager.submit_magnet(&magnet).await?;
            submission_response(&state, submission)
        }
        "batch" => {
            let batch = BatchRequest {
                urls: req.urls,
                text: req.text,
            };
            batch_response(&state, batch).await
        }
        other => Err(ApiError::bad_request(format!("不支持的下载类型: {}", other))),
    }
}

pub async fn pause_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let task = state.manager.pause(&parse_id(&id)?).await?;
    Ok(Json(json!({ "success": true, "task": task })))
}

pub async fn resume_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let task = state.manager.resume(&parse_id(&id)?).await?;
    Ok(Json(json!({ "success": true, "task": task })))
}

pub async fn retry_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let task = state.manager.retry(&parse_id(&id)?).await?;
    Ok(Json(json!({ "success": true, "task": task })))
}

pub async fn remove_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> ApiResult {
    let task = state.manager.remove(&parse_id(&id)?, query.force).await?;
    Ok(Json(json!({
        "success": true,
        "task_id": task.task_id,
        "force": query.force,
    })))
}

pub async fn statistics(State(state): State<Arc<AppState>>) -> ApiResult {
    let stats = state.manager.statistics().await?;
    Ok(Json(json!({ "success": true, "statistics": stats })))
}

/// 检查守护进程连接，返回版本和启用的特性
pub async fn system_test(State(state): State<Arc<AppState>>) -> ApiResult {
    let version = state.manager.daemon_info().await?;
    Ok(Json(json!({
        "success": true,
        "daemon_reachable": true,
        "version": version.version,
        "enabled_features": version.enabled_features,
    })))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let reachable = state.manager.is_daemon_reachable();
    let status = if reachable { "healthy" } else { "degraded" };
    Json(json!({
        "success": true,
        "status": status,
        "daemon_reachable": reachable,
        "total_tasks": state.manager.registry().len(),
        "subscribers": state.hub.subscriber_count(),
        "delivery_mode": state.hub.delivery_mode(),
    }))
}

pub async fn sync_now(State(state): State<Arc<AppState>>) -> Json<Value> {
    let report = state.reconciler.sync_now().await;
    Json(json!({ "success": true, "cycle": report }))
}
