// API路由配置
// 定义所有HTTP接口的路由规则

use actix_web::{dev::HttpServiceFactory, web};

use crate::config::Config;
use crate::handlers::*;
use crate::middleware::{create_cors, AdminAuth};

/// 平台 webhook 路由
fn webhook_routes() -> actix_web::Scope {
    web::scope("/webhooks")
        .route("/transaction-initialize", web::post().to(transaction_initialize))
        .route("/transaction-process", web::post().to(transaction_process))
}

/// 管理路由 (需要管理令牌)
fn admin_routes(config: &Config) -> impl HttpServiceFactory {
    web::scope("/admin")
        .route("/sites", web::get().to(list_sites))
        .route("/sites", web::post().to(register_site))
        .route("/sites/{id}/notes", web::put().to(update_site_notes))
        .route("/sites/{id}/{action}", web::post().to(site_action))
        .route("/whitelist", web::get().to(list_whitelist))
        .route("/whitelist", web::post().to(add_whitelist))
        .route("/whitelist/{id}", web::put().to(toggle_whitelist))
        .route("/gateways", web::get().to(list_gateways))
        .route("/gateways", web::post().to(create_gateway))
        .route("/gateways/{id}", web::put().to(toggle_gateway))
        .route("/gateways/{id}", web::delete().to(delete_gateway))
        .route("/channels", web::get().to(list_channels))
        .route("/channels", web::post().to(create_channel))
        .route("/channels/{id}", web::put().to(toggle_channel))
        .route("/credentials", web::get().to(list_credentials))
        .route("/credentials", web::put().to(upsert_credential))
        .route("/credentials", web::delete().to(reset_credential))
        .route("/credentials/reconcile", web::post().to(reconcile_credential))
        .route("/orders/{reference}", web::get().to(lookup_order))
        .wrap(AdminAuth::new(config.security.admin_token.clone()))
        .wrap(create_cors(&config.security.cors_origins))
}

/// 注册全部路由
pub fn configure(cfg: &mut web::ServiceConfig, config: &Config) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope("/api")
            .service(webhook_routes())
            .route("/notify", web::get().to(epay_notify))
            .route("/notify", web::post().to(epay_notify))
            .route("/return", web::get().to(shopper_return))
            .service(admin_routes(config)),
    );
}
