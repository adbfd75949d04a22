// 健康检查处理器
// 探测存储连接并返回版本信息

use actix_web::{http::StatusCode, web, HttpResponse, Result as ActixResult};
use serde::Serialize;

use crate::state::AppState;

/// 系统健康检查响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 版本信息
    pub version: String,
    /// 存储后端
    pub backend: String,
    /// 存储连接状态
    pub database: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// 基础健康检查
///
/// GET /health
///
/// 无需认证
/// 响应: HealthResponse，存储不可用时为 503
pub async fn health_check(data: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let mut health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: data.store.backend_name().to_string(),
        database: "connected".to_string(),
        timestamp: chrono::Utc::now(),
    };

    if let Err(e) = data.store.ping().await {
        log::error!("Store health check failed: {}", e);
        health.database = "disconnected".to_string();
        health.status = "unhealthy".to_string();
    }

    let status = if health.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(HttpResponse::build(status).json(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_app_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_check() {
        let (state, _processor) = test_app_state(None).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["backend"], "memory");
        assert_eq!(body["database"], "connected");
    }
}
