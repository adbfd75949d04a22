// CORS中间件配置
// 管理接口的跨域规则

use actix_cors::Cors;
use actix_web::http::header;

use super::auth::{ADMIN_TOKEN_HEADER, REQUESTER_HEADER};

/// 创建管理接口的CORS中间件
///
/// # Arguments
/// * `allowed_origins` - 允许的源列表，为空时只允许本机来源
pub fn create_cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(ADMIN_TOKEN_HEADER),
            header::HeaderName::from_static(REQUESTER_HEADER),
        ])
        .max_age(3600);

    if allowed_origins.is_empty() {
        cors = cors.allowed_origin_fn(|origin, _req_head| {
            let origin = origin.as_bytes();
            origin.starts_with(b"http://localhost") || origin.starts_with(b"http://127.0.0.1")
        });
    } else {
        for origin in allowed_origins {
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}
