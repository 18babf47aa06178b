use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::category::Category;
use crate::common::format::{eta_seconds, format_bytes, format_eta, format_speed, percentage};
use crate::rpc::{DaemonHandle, DaemonState, DaemonStatus};

/// 内部任务 ID，创建时生成，整个生命周期内不变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Url,
    Magnet,
    Torrent,
    BatchMember,
}

impl TaskKind {
    pub fn is_bittorrent(&self) -> bool {
        matches!(self, TaskKind::Magnet | TaskKind::Torrent)
    }
}

/// 任务的原始来源，重试时原样重新提交
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDescriptor {
    Url(String),
    Magnet(String),
    Torrent {
        name: Option<String>,
        content: Arc<Vec<u8>>,
    },
}

impl SourceDescriptor {
    /// 展示给观察者的来源描述，种子只展示名称
    pub fn describe(&self) -> String {
        match self {
            SourceDescriptor::Url(url) => url.clone(),
            SourceDescriptor::Magnet(uri) => uri.clone(),
            SourceDescriptor::Torrent { name, content } => match name {
                Some(name) => format!("{}.torrent", name),
                None => format!("torrent ({})", format_bytes(content.len() as u64)),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Active,
    Paused,
    Complete,
    Error,
    Removed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error | TaskStatus::Removed)
    }

    /// 守护进程上报的状态能否让任务从 `self` 变成 `next`
    ///
    /// 终态不会回退；`error -> queued` 只能通过显式重试完成，不走这里。
    pub fn accepts(&self, next: TaskStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            TaskStatus::Removed => false,
            TaskStatus::Complete | TaskStatus::Error => next == TaskStatus::Removed,
            TaskStatus::Queued | TaskStatus::Active | TaskStatus::Paused => true,
        }
    }

    pub fn from_daemon(state: DaemonState) -> Option<Self> {
        match state {
            DaemonState::Active => Some(TaskStatus::Active),
            DaemonState::Waiting => Some(TaskStatus::Queued),
            DaemonState::Paused => Some(TaskStatus::Paused),
            DaemonState::Complete => Some(TaskStatus::Complete),
            DaemonState::Error => Some(TaskStatus::Error),
            DaemonState::Removed => Some(TaskStatus::Removed),
            DaemonState::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
            TaskStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" | "waiting" => Ok(TaskStatus::Queued),
            "active" => Ok(TaskStatus::Active),
            "paused" => Ok(TaskStatus::Paused),
            "complete" => Ok(TaskStatus::Complete),
            "error" => Ok(TaskStatus::Error),
            "removed" => Ok(TaskStatus::Removed),
            other => Err(format!("未知的任务状态: {}", other)),
        }
    }
}

/// 原始进度数据，派生字段在 [`ProgressView`] 中按需计算
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub bytes_completed: u64,
    pub bytes_total: Option<u64>,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub connections: u64,
    /// 只有 BT 任务才有
    pub peers: Option<u64>,
}

impl Progress {
    pub fn from_daemon(status: &DaemonStatus, bittorrent: bool) -> Self {
        let bytes_total = status.known_total();
        let bytes_completed = match bytes_total {
            Some(total) => status.completed_length.min(total),
            None => status.completed_length,
        };
        Self {
            bytes_completed,
            bytes_total,
            download_rate: status.download_speed,
            upload_rate: status.upload_speed,
            connections: status.connections,
            peers: if bittorrent {
                Some(status.num_seeders.unwrap_or(0))
            } else {
                None
            },
        }
    }

    pub fn percentage(&self) -> f64 {
        percentage(self.bytes_completed, self.bytes_total)
    }

    pub fn eta_secs(&self) -> Option<u64> {
        eta_seconds(self.bytes_completed, self.bytes_total, self.download_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCause {
    /// 守护进程报告任务失败
    DaemonReported,
    /// 守护进程不再认识这个 GID
    SessionLost,
    /// 超过了重试次数上限
    RetryExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub cause: ErrorCause,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon_code: Option<String>,
}

impl ErrorDetail {
    pub fn new(cause: ErrorCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
            daemon_code: None,
        }
    }

    pub fn from_daemon(status: &DaemonStatus) -> Self {
        Self {
            cause: ErrorCause::DaemonReported,
            message: status
                .error_message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "下载失败".to_string()),
            daemon_code: status.error_code.clone(),
        }
    }
}

/// 注册表中的任务记录
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    /// 创建顺序，列表按它排序
    pub seq: u64,
    pub kind: TaskKind,
    pub source: SourceDescriptor,
    pub handle: Option<DaemonHandle>,
    pub status: TaskStatus,
    pub progress: Progress,
    pub file_name: Option<String>,
    pub category: Category,
    pub error: Option<ErrorDetail>,
    /// 守护进程不可达时创建，等待同步循环重新提交
    pub deferred: bool,
    /// 守护进程不可达期间的状态只是最后一次已知状态
    pub stale: bool,
    pub attempts: u32,
    /// 重试正在向守护进程提交，同一任务的其他重试请求会被拒绝
    pub retrying: bool,
    /// 用户操作和重新绑定都会递增，用来丢弃过期的同步结果
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        seq: u64,
        kind: TaskKind,
        source: SourceDescriptor,
        file_name: Option<String>,
    ) -> Self {
        let category = file_name
            .as_deref()
            .map(Category::from_file_name)
            .unwrap_or_default();
        Self {
            id: TaskId::new(),
            seq,
            kind,
            source,
            handle: None,
            status: TaskStatus::Queued,
            progress: Progress::default(),
            file_name,
            category,
            error: None,
            deferred: false,
            stale: false,
            attempts: 0,
            retrying: false,
            revision: 0,
            created_at: Utc::now(),
            last_synced_at: None,
        }
    }

    pub fn set_file_name(&mut self, name: String) {
        self.category = Category::from_file_name(&name);
        self.file_name = Some(name);
    }

    pub fn view(&self) -> TaskView {
        TaskView::from(self)
    }
}

/// 推送给观察者和拉取查询返回的任务快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub daemon_handle: Option<DaemonHandle>,
    pub kind: TaskKind,
    pub source: String,
    pub status: TaskStatus,
    pub stale: bool,
    pub deferred: bool,
    pub file_name: Option<String>,
    pub category: Category,
    pub progress: ProgressView,
    pub error: Option<ErrorDetail>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub bytes_completed: u64,
    pub bytes_total: Option<u64>,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub connections: u64,
    pub peers: Option<u64>,
    pub eta_secs: Option<u64>,
    pub percentage: f64,
    pub completed_formatted: String,
    pub total_formatted: String,
    pub rate_formatted: String,
    pub eta_formatted: String,
}

impl From<&Progress> for ProgressView {
    fn from(p: &Progress) -> Self {
        let eta = p.eta_secs();
        Self {
            bytes_completed: p.bytes_completed,
            bytes_total: p.bytes_total,
            download_rate: p.download_rate,
            upload_rate: p.upload_rate,
            connections: p.connections,
            peers: p.peers,
            eta_secs: eta,
            percentage: p.percentage(),
            completed_formatted: format_bytes(p.bytes_completed),
            total_formatted: p
                .bytes_total
                .map(format_bytes)
                .unwrap_or_else(|| "unknown".to_string()),
            rate_formatted: format_speed(p.download_rate),
            eta_formatted: format_eta(eta),
        }
    }
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            daemon_handle: task.handle.clone(),
            kind: task.kind,
            source: task.source.describe(),
            status: task.status,
            stale: task.stale,
            deferred: task.deferred,
            file_name: task.file_name.clone(),
            category: task.category,
            progress: ProgressView::from(&task.progress),
            error: task.error.clone(),
            attempts: task.attempts,
            created_at: task.created_at,
            last_synced_at: task.last_synced_at,
        }
    }
}

/// 拉取查询的过滤条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub category: Option<Category>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|status| task.status == status)
            && self.category.is_none_or(|category| task.category == category)
    }
}
