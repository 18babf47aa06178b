use thiserror::Error;

use crate::parser::ParseError;
use crate::registry::{RegistryError, TaskId, TaskStatus};
use crate::rpc::RpcError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DownloadError {
    #[error("输入校验失败: {0}")]
    Validation(#[from] ParseError),

    #[error("守护进程拒绝了请求: {0}")]
    DaemonRejected(String),

    #[error("守护进程不可达: {0}")]
    DaemonUnreachable(String),

    #[error("守护进程已丢失任务会话: {0}")]
    SessionLost(String),

    #[error("任务 {task_id} 已重试 {attempts} 次，不再重试")]
    RetryExhausted { task_id: TaskId, attempts: u32 },

    #[error("任务未找到: {0}")]
    TaskNotFound(String),

    #[error("任务 {0} 尚未绑定到守护进程")]
    NotBound(TaskId),

    #[error("无效的状态变化: {0}")]
    InvalidTransition(String),
}

impl DownloadError {
    /// 对外暴露的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            DownloadError::Validation(_) => "INVALID_INPUT",
            DownloadError::DaemonRejected(_) => "DAEMON_REJECTED",
            DownloadError::DaemonUnreachable(_) => "DAEMON_UNREACHABLE",
            DownloadError::SessionLost(_) => "SESSION_LOST",
            DownloadError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            DownloadError::TaskNotFound(_) => "NOT_FOUND",
            DownloadError::NotBound(_) => "NOT_BOUND",
            DownloadError::InvalidTransition(_) => "INVALID_STATE",
        }
    }

    pub fn invalid_state(task_id: TaskId, status: TaskStatus, action: &str) -> Self {
        DownloadError::InvalidTransition(format!(
            "任务 {} 当前为 {}，无法{}",
            task_id, status, action
        ))
    }
}

impl From<RpcError> for DownloadError {
    fn from(error: RpcError) -> Self {
        if error.is_unreachable() {
            DownloadError::DaemonUnreachable(error.to_string())
        } else if error.is_handle_unknown() {
            DownloadError::SessionLost(error.to_string())
        } else {
            DownloadError::DaemonRejected(error.to_string())
        }
    }
}

impl From<RegistryError> for DownloadError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotFound(id) => DownloadError::TaskNotFound(id.to_string()),
            RegistryError::InvalidTransition { .. } => {
                DownloadError::InvalidTransition(error.to_string())
            }
            RegistryError::RetryExhausted { task_id, attempts } => {
                DownloadError::RetryExhausted { task_id, attempts }
            }
        }
    }
}
