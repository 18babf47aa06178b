use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::DownloadError;
use crate::common::config::DownloadOptions;
use crate::common::format::format_speed;
use crate::parser::{
    SourceType, UrlParser, detect_source_type, parse_batch_lines, parse_magnet, parse_torrent,
};
use crate::registry::{
    SourceDescriptor, TaskFilter, TaskId, TaskKind, TaskRegistry, TaskStatus, TaskView,
};
use crate::rpc::{DaemonApi, DaemonHandle, DaemonState, DaemonStatus, RpcError, VersionInfo};

/// 一次提交的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub task_id: TaskId,
    pub daemon_handle: Option<DaemonHandle>,
    /// 守护进程暂时不可达，任务已创建，等待同步循环重新提交
    pub deferred: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineError {
    pub line_no: usize,
    pub input: String,
    pub error_code: &'static str,
    pub message: String,
}

/// 批量提交的汇总，批次本身不作为实体保存
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub success_count: usize,
    pub fail_count: usize,
    pub per_line_errors: Vec<LineError>,
    pub task_ids: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub download_speed: u64,
    pub upload_speed: u64,
    pub download_speed_formatted: String,
    pub upload_speed_formatted: String,
    pub num_active: u64,
    pub num_waiting: u64,
    pub num_stopped: u64,
    pub total_tasks: usize,
}

/// 提交入口和用户操作
///
/// 所有 RPC 调用都在注册表锁之外完成，得到守护进程确认之后才修改任务状态。
#[derive(Clone)]
pub struct DownloadManager {
    daemon: Arc<dyn DaemonApi>,
    registry: Arc<TaskRegistry>,
    options: Arc<DownloadOptions>,
    max_retry_attempts: u32,
}

impl DownloadManager {
    pub fn new(
        daemon: Arc<dyn DaemonApi>,
        registry: Arc<TaskRegistry>,
        options: Arc<DownloadOptions>,
        max_retry_attempts: u32,
    ) -> Self {
        Self {
            daemon,
            registry,
            options,
            max_retry_attempts,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn daemon(&self) -> &Arc<dyn DaemonApi> {
        &self.daemon
    }

    pub fn is_daemon_reachable(&self) -> bool {
        self.daemon.is_reachable()
    }

    pub async fn submit_url(&self, url: &str) -> Result<Submission, DownloadError> {
        self.submit_url_as(url, TaskKind::Url).await
    }

    async fn submit_url_as(&self, url: &str, kind: TaskKind) -> Result<Submission, DownloadError> {
        let parsed = UrlParser::parse(url)?;
        self.submit(kind, SourceDescriptor::Url(parsed.url), parsed.file_name)
            .await
    }

    pub async fn submit_magnet(&self, magnet: &str) -> Result<Submission, DownloadError> {
        let link = parse_magnet(magnet)?;
        self.submit(
            TaskKind::Magnet,
            SourceDescriptor::Magnet(link.uri),
            link.display_name,
        )
        .await
    }

    pub async fn submit_torrent(&self, content: Vec<u8>) -> Result<Submission, DownloadError> {
        let meta = parse_torrent(&content)?;
        debug!("种子校验通过: {:?}, {} 个文件", meta.name, meta.file_count);
        self.submit(
            TaskKind::Torrent,
            SourceDescriptor::Torrent {
                name: meta.name.clone(),
                content: Arc::new(content),
            },
            meta.name,
        )
        .await
    }

    /// 逐行提交，单行失败不影响其他行
    pub async fn submit_batch<S: AsRef<str>>(&self, lines: &[S]) -> BatchReport {
        let mut report = BatchReport::default();

        for line in parse_batch_lines(lines) {
            match self.submit_url_as(&line.url, TaskKind::BatchMember).await {
                Ok(submission) => {
                    report.success_count += 1;
                    report.task_ids.push(submission.task_id);
                }
                Err(e) => {
                    debug!("批量提交第 {} 行失败: {}", line.line_no, e);
                    report.fail_count += 1;
                    report.per_line_errors.push(LineError {
                        line_no: line.line_no,
                        input: line.url,
                        error_code: e.code(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "批量提交完成: 成功 {}，失败 {}",
            report.success_count, report.fail_count
        );
        report
    }

    async fn submit(
        &self,
        kind: TaskKind,
        source: SourceDescriptor,
        file_name: Option<String>,
    ) -> Result<Submission, DownloadError> {
        let task = self.registry.create(kind, source.clone(), file_name);

        match self.dispatch(&source).await {
            Ok(handle) => {
                if let Err(e) = self.registry.bind_handle(&task.id, handle.clone()) {
                    // 提交期间任务被删除了
                    self.discard_orphan(&handle).await;
                    return Err(e.into());
                }
                info!("任务 {} 已提交，GID {}", task.id, handle);
                Ok(Submission {
                    task_id: task.id,
                    daemon_handle: Some(handle),
                    deferred: false,
                })
            }
            Err(e) if e.is_unreachable() => {
                warn!("守护进程不可达，任务 {} 延后提交: {}", task.id, e);
                self.registry.mark_deferred(&task.id)?;
                Ok(Submission {
                    task_id: task.id,
                    daemon_handle: None,
                    deferred: true,
                })
            }
            Err(e) => {
                warn!("守护进程拒绝了任务 {}: {}", task.id, e);
                self.registry.discard(&task.id);
                Err(DownloadError::DaemonRejected(e.to_string()))
            }
        }
    }

    /// 按来源类型把任务发给守护进程
    pub async fn dispatch(&self, source: &SourceDescriptor) -> Result<DaemonHandle, RpcError> {
        match source {
            SourceDescriptor::Url(url) => {
                let scheme = match detect_source_type(url) {
                    SourceType::Ftp => "ftp",
                    SourceType::Ftps => "ftps",
                    SourceType::Https => "https",
                    _ => "http",
                };
                self.daemon
                    .add_uri(vec![url.clone()], self.options.uri_options(scheme))
                    .await
            }
            SourceDescriptor::Magnet(uri) => {
                self.daemon
                    .add_magnet(uri, self.options.bt_options())
                    .await
            }
            SourceDescriptor::Torrent { content, .. } => {
                self.daemon
                    .add_torrent(content, self.options.bt_options())
                    .await
            }
        }
    }

    /// 清理守护进程里已经没有任务对应的 GID
    pub(crate) async fn discard_orphan(&self, handle: &DaemonHandle) {
        if let Err(e) = self.daemon.remove(handle).await {
            debug!("清理孤立任务 {} 失败: {}", handle, e);
        }
    }

    fn ensure_reachable(&self, context: &str) -> Result<(), DownloadError> {
        if self.daemon.is_reachable() {
            Ok(())
        } else {
            Err(DownloadError::DaemonUnreachable(format!(
                "守护进程当前不可达，{}",
                context
            )))
        }
    }

    fn bound_task(&self, id: &TaskId) -> Result<(TaskStatus, DaemonHandle), DownloadError> {
        let task = self
            .registry
            .get(id)
            .ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))?;
        self.ensure_reachable("操作未执行")?;
        let handle = task.handle.ok_or(DownloadError::NotBound(*id))?;
        Ok((task.status, handle))
    }

    pub async fn pause(&self, id: &TaskId) -> Result<TaskView, DownloadError> {
        let (status, handle) = self.bound_task(id)?;
        match status {
            TaskStatus::Paused => return self.get_task(id),
            TaskStatus::Queued | TaskStatus::Active => {}
            other => return Err(DownloadError::invalid_state(*id, other, "暂停")),
        }

        self.daemon.pause(&handle).await?;
        let task = self.registry.apply_action(id, TaskStatus::Paused)?;
        info!("任务 {} 已暂停", id);
        Ok(task.view())
    }

    pub async fn resume(&self, id: &TaskId) -> Result<TaskView, DownloadError> {
        let (status, handle) = self.bound_task(id)?;
        match status {
            TaskStatus::Paused => {}
            TaskStatus::Queued | TaskStatus::Active => return self.get_task(id),
            other => return Err(DownloadError::invalid_state(*id, other, "恢复")),
        }

        self.daemon.unpause(&handle).await?;
        let task = self.registry.apply_action(id, TaskStatus::Active)?;
        info!("任务 {} 已恢复", id);
        Ok(task.view())
    }

    /// 删除任务；未绑定的任务只删除本地记录
    ///
    /// `force` 为真时让守护进程立即停止传输，不等待 BT 任务向 tracker 注销。
    pub async fn remove(&self, id: &TaskId, force: bool) -> Result<TaskView, DownloadError> {
        let task = self
            .registry
            .get(id)
            .ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))?;

        if let Some(handle) = &task.handle {
            self.ensure_reachable("无法删除已提交的任务")?;
            // 已停止的任务只能清理结果
            let result = if task.status.is_terminal() {
                self.daemon.remove_download_result(handle).await
            } else if force {
                self.daemon.force_remove(handle).await
            } else {
                self.daemon.remove(handle).await
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_handle_unknown() => {
                    debug!("守护进程已不认识 {}，直接删除本地记录", handle);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let removed = self.registry.remove(id)?;
        info!("任务 {} 已删除{}", id, if force { " (强制)" } else { "" });
        Ok(removed.view())
    }

    /// 重新提交出错的任务，得到新的 GID，任务 ID 不变
    ///
    /// 守护进程不可达时直接返回错误，任务保持 error，重试次数不变。
    pub async fn retry(&self, id: &TaskId) -> Result<TaskView, DownloadError> {
        if self.registry.get(id).is_none() {
            return Err(DownloadError::TaskNotFound(id.to_string()));
        }
        self.ensure_reachable("重试未执行")?;

        let task = self.registry.begin_retry(id, self.max_retry_attempts)?;
        info!(
            "重试任务 {} (第 {}/{} 次)",
            id, task.attempts, self.max_retry_attempts
        );

        // 旧的 GID 可能还留在守护进程的停止列表里
        if let Some(old) = &task.handle {
            if let Err(e) = self.daemon.remove_download_result(old).await {
                debug!("清理旧任务结果 {} 失败: {}", old, e);
            }
        }

        let handle = match self.dispatch(&task.source).await {
            Ok(handle) => handle,
            Err(e) if e.is_unreachable() => {
                warn!("重试任务 {} 时守护进程不可达: {}", id, e);
                self.registry.abort_retry(id, true);
                return Err(DownloadError::DaemonUnreachable(e.to_string()));
            }
            Err(e) => {
                warn!("守护进程拒绝了任务 {} 的重试: {}", id, e);
                self.registry.abort_retry(id, false);
                return Err(DownloadError::DaemonRejected(e.to_string()));
            }
        };

        match self.registry.complete_retry(id, handle.clone()) {
            Ok(task) => {
                info!("任务 {} 已重新提交，GID {}", id, handle);
                Ok(task.view())
            }
            Err(e) => {
                // 提交期间任务被删除了
                self.discard_orphan(&handle).await;
                Err(e.into())
            }
        }
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<TaskView> {
        self.registry.list(filter)
    }

    pub fn get_task(&self, id: &TaskId) -> Result<TaskView, DownloadError> {
        self.registry
            .view(id)
            .ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))
    }

    pub async fn statistics(&self) -> Result<Statistics, DownloadError> {
        let stat = self.daemon.get_global_stat().await?;
        Ok(Statistics {
            download_speed: stat.download_speed,
            upload_speed: stat.upload_speed,
            download_speed_formatted: format_speed(stat.download_speed),
            upload_speed_formatted: format_speed(stat.upload_speed),
            num_active: stat.num_active,
            num_waiting: stat.num_waiting,
            num_stopped: stat.num_stopped,
            total_tasks: self.registry.len(),
        })
    }

    pub async fn daemon_info(&self) -> Result<VersionInfo, DownloadError> {
        Ok(self.daemon.get_version().await?)
    }

    /// 启动时接管守护进程已知的任务，返回新接管的数量
    pub async fn recover_from_daemon(&self) -> Result<usize, DownloadError> {
        let mut statuses = self.daemon.tell_active().await?;
        statuses.extend(self.daemon.tell_waiting().await?);
        statuses.extend(self.daemon.tell_stopped().await?);

        let now = Utc::now();
        let mut adopted = 0;
        for status in &statuses {
            // 元数据任务由它的后续任务代表
            if status.status == DaemonState::Removed || !status.followed_by.is_empty() {
                continue;
            }
            let Some((kind, source)) = recovered_source(status) else {
                debug!("无法还原任务 {} 的来源，跳过", status.gid);
                continue;
            };
            if self.registry.adopt(kind, source, status, now).is_some() {
                adopted += 1;
            }
        }

        info!("从守护进程恢复了 {} 个任务", adopted);
        Ok(adopted)
    }
}

// 守护进程不保存原始提交内容，BT 任务用 info-hash 还原为磁力链接
fn recovered_source(status: &DaemonStatus) -> Option<(TaskKind, SourceDescriptor)> {
    if status.is_bittorrent() {
        let hash = status.info_hash.as_ref()?;
        let mut uri = format!("magnet:?xt=urn:btih:{}", hash);
        if let Some(name) = status.file_name() {
            uri.push_str("&dn=");
            uri.push_str(&urlencoding::encode(&name));
        }
        return Some((TaskKind::Magnet, SourceDescriptor::Magnet(uri)));
    }

    let uri = status.first_uri()?;
    match detect_source_type(&uri) {
        SourceType::Magnet => Some((TaskKind::Magnet, SourceDescriptor::Magnet(uri))),
        _ => Some((TaskKind::Url, SourceDescriptor::Url(uri))),
    }
}
