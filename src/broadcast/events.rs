use serde::Serialize;

use crate::registry::{ErrorCause, TaskId, TaskView};

/// 推送给订阅者的事件
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// 每轮同步结束后的完整任务列表
    ProgressUpdate {
        tasks: Vec<TaskView>,
        daemon_reachable: bool,
    },
    DownloadComplete {
        task_id: TaskId,
        file_name: Option<String>,
    },
    DownloadFailed {
        task_id: TaskId,
        cause: ErrorCause,
        message: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ProgressUpdate { .. } => "progress_update",
            Event::DownloadComplete { .. } => "download_complete",
            Event::DownloadFailed { .. } => "download_failed",
        }
    }
}
