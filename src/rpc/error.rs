use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    #[error("RPC调用超时: {method}")]
    Timeout { method: String },

    #[error("无法连接到守护进程: {0}")]
    Connection(String),

    #[error("守护进程不可用，{}ms 后重连", .retry_in.as_millis())]
    Unavailable { retry_in: Duration },

    #[error("守护进程返回错误 ({code}): {message}")]
    Daemon { code: i64, message: String },

    #[error("响应解析失败: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// 连接层面的失败（超时、连接失败、退避中），意味着守护进程可能不可达
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout { .. } | RpcError::Connection(_) | RpcError::Unavailable { .. }
        )
    }

    /// 守护进程不认识这个 GID（通常是守护进程重启后丢失了会话）
    pub fn is_handle_unknown(&self) -> bool {
        match self {
            RpcError::Daemon { message, .. } => message.contains("is not found"),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
