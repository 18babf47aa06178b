use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::downloader::DownloadError;

/// 统一的错误响应：`{success: false, error, error_code}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_INPUT",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<DownloadError> for ApiError {
    fn from(error: DownloadError) -> Self {
        let status = match &error {
            DownloadError::Validation(_) => StatusCode::BAD_REQUEST,
            DownloadError::DaemonRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DownloadError::DaemonUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DownloadError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            DownloadError::SessionLost(_)
            | DownloadError::RetryExhausted { .. }
            | DownloadError::NotBound(_)
            | DownloadError::InvalidTransition(_) => StatusCode::CONFLICT,
        };
        Self {
            status,
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
            "error_code": self.code,
        }));
        (self.status, body).into_response()
    }
}
