// 易支付桥接数据模型定义
// 包含平台凭证、站点、网关通道、订单映射以及平台/处理器报文结构

mod credential;
mod gateway;
mod order;
mod platform;
mod processor;
mod site;

// 重新导出核心类型
pub use credential::*;
pub use gateway::*;
pub use order::*;
pub use platform::*;
pub use processor::*;
pub use site::*;

use serde::Serialize;

/// 标准API响应格式 (管理接口使用)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 响应状态码
    pub code: i32,
    /// 响应消息
    pub message: String,
    /// 响应数据
    pub data: Option<T>,
    /// 响应时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建错误响应
    pub fn error(code: i32, message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.into(),
            data: None,
            timestamp: chrono::Utc::now(),
        }
    }
}
