// 中间件模块
// 包含管理认证、请求日志、跨域配置

pub mod auth;
pub mod cors;
pub mod logging;

// 重新导出中间件
pub use auth::*;
pub use cors::*;
pub use logging::*;
