use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::SearchError;

/// API错误类型
pub struct AppError {
    status: StatusCode,
    message: String,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn unauthorized() -> Self {
        Self { status: StatusCode::UNAUTHORIZED, message: "无效的 token".to_string() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: err.to_string() }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        // 输入错误归调用方，后端错误归服务端
        let status = match &err {
            SearchError::InvalidQuery(_) | SearchError::NoFaceDetected => StatusCode::BAD_REQUEST,
            SearchError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: err.to_string() }
    }
}
