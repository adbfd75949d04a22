// 错误类型定义
// 支付流程错误与管理接口错误

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ApiResponse;
use crate::services::ProcessorError;
use crate::storage::StoreError;
use crate::utils::crypto::SigningError;

/// 支付流程错误分类
///
/// webhook 处理器从不直接返回这些错误，而是映射为协议规定的失败结果。
#[derive(Debug, Error)]
pub enum PaymentError {
    /// 找不到可用的网关/通道/凭证，需要管理员修正配置
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 站点未批准或未通过白名单
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// 回调签名校验失败
    #[error("signature error: {0}")]
    Signature(#[from] SigningError),

    /// 与易支付通信失败，调用方可重试
    #[error("transport error: {0}")]
    Transport(String),

    /// 易支付返回了结构化错误，消息原样透传
    #[error("{message}")]
    ProcessorRejected { code: i64, message: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl PaymentError {
    /// 只有通信与存储失败值得调用方重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Transport(_) | PaymentError::Storage(_))
    }
}

impl From<ProcessorError> for PaymentError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Signing(e) => PaymentError::Configuration(e.to_string()),
            other => PaymentError::Transport(other.to_string()),
        }
    }
}

/// 管理接口错误
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AdminError::NotFound(what),
            StoreError::Conflict(what) => AdminError::Conflict(what),
            other => AdminError::Storage(other),
        }
    }
}

impl From<PaymentError> for AdminError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Storage(e) => e.into(),
            PaymentError::Configuration(msg) => AdminError::NotFound(msg),
            other => AdminError::Validation(other.to_string()),
        }
    }
}

impl ResponseError for AdminError {
    fn status_code(&self) -> StatusCode {
        match self {
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Conflict(_) => StatusCode::CONFLICT,
            AdminError::Validation(_) => StatusCode::BAD_REQUEST,
            AdminError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Admin request failed: {}", self);
        }
        // 存储层细节不返回给客户端
        let message = match self {
            AdminError::Storage(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(status).json(ApiResponse::<()>::error(status.as_u16() as i32, message))
    }
}
