// API处理器模块
// 平台 webhook、易支付回调、管理接口与健康检查

pub mod admin_handlers;
pub mod health_handlers;
pub mod notify_handlers;
pub mod webhook_handlers;

// 重新导出处理器
pub use admin_handlers::*;
pub use health_handlers::*;
pub use notify_handlers::*;
pub use webhook_handlers::*;

/// 基于内存存储与脚本化处理器的应用状态
#[cfg(test)]
pub(crate) async fn test_app_state(
    webhook_secret: Option<&str>,
) -> (crate::state::AppState, std::sync::Arc<crate::services::test_support::ScriptedProcessor>) {
    use crate::services::test_support::{seeded_store, RecordingPlatform, ScriptedProcessor};
    use std::sync::Arc;

    let (store, _gateway) = seeded_store().await;
    let mut config = crate::config::Config::default();
    config.security.webhook_secret = webhook_secret.map(str::to_string);

    let processor = Arc::new(ScriptedProcessor::new());
    let state = crate::state::AppState::new(
        config,
        store,
        processor.clone(),
        Arc::new(RecordingPlatform::default()),
    );
    (state, processor)
}
