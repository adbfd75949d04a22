// 管理接口处理器
// 站点审批、白名单、网关/通道、凭证与订单查询

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AdminError;
use crate::middleware::requester_identity;
use crate::models::{
    ApiResponse, CreateChannelRequest, CreateGatewayRequest, CreateWhitelistRequest,
    ReconcileRequest, RegisterSiteRequest, SiteAction, SiteActionRequest, SiteStatus,
    ToggleRequest, UpsertCredentialRequest,
};
use crate::state::AppState;
use crate::utils::client_ip;

type AdminResult = Result<HttpResponse, AdminError>;

#[derive(Debug, Deserialize)]
pub struct SiteListQuery {
    pub status: Option<SiteStatus>,
}

#[derive(Debug, Deserialize)]
pub struct NotesRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EndpointQuery {
    pub endpoint: String,
}

fn parse_action(raw: &str) -> Result<SiteAction, AdminError> {
    match raw {
        "approve" => Ok(SiteAction::Approve),
        "reject" => Ok(SiteAction::Reject),
        "suspend" => Ok(SiteAction::Suspend),
        "restore" => Ok(SiteAction::Restore),
        other => Err(AdminError::Validation(format!("unknown site action {}", other))),
    }
}

/// 站点列表
///
/// GET /api/admin/sites?status=pending
pub async fn list_sites(data: web::Data<AppState>, query: web::Query<SiteListQuery>) -> AdminResult {
    let sites = data.sites.list(query.status).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(sites)))
}

/// 登记站点 (安装回调)
///
/// POST /api/admin/sites
///
/// 未携带 client_ip 时记录请求来源地址
pub async fn register_site(
    data: web::Data<AppState>,
    req: HttpRequest,
    request: web::Json<RegisterSiteRequest>,
) -> AdminResult {
    let mut request = request.into_inner();
    if request.client_ip.is_none() {
        request.client_ip = client_ip(&req);
    }
    let site = data.sites.register(request).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(site)))
}

/// 站点状态操作
///
/// POST /api/admin/sites/{id}/{action}
///
/// action: approve | reject | suspend | restore，非法迁移返回 409
pub async fn site_action(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<(Uuid, String)>,
    body: Option<web::Json<SiteActionRequest>>,
) -> AdminResult {
    let (id, action) = path.into_inner();
    let action = parse_action(&action)?;
    let mut request = body.map(|b| b.into_inner()).unwrap_or_default();
    if request.operator.is_none() {
        request.operator = Some(requester_identity(&req).name.unwrap_or_else(|| "admin".to_string()));
    }

    let site = data.sites.transition(id, action, request).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(site)))
}

/// 更新站点备注
///
/// PUT /api/admin/sites/{id}/notes
pub async fn update_site_notes(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<NotesRequest>,
) -> AdminResult {
    let site = data.sites.update_notes(path.into_inner(), request.into_inner().notes).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(site)))
}

/// GET /api/admin/whitelist
pub async fn list_whitelist(data: web::Data<AppState>) -> AdminResult {
    let entries = data.sites.list_whitelist().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(entries)))
}

/// POST /api/admin/whitelist
pub async fn add_whitelist(data: web::Data<AppState>, request: web::Json<CreateWhitelistRequest>) -> AdminResult {
    let entry = data.sites.add_whitelist(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(entry)))
}

/// PUT /api/admin/whitelist/{id}
pub async fn toggle_whitelist(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<ToggleRequest>,
) -> AdminResult {
    let entry = data.sites.toggle_whitelist(path.into_inner(), request.enabled).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(entry)))
}

/// 网关列表
///
/// GET /api/admin/gateways
///
/// 携带 X-Requester 时只返回该身份可见的网关
pub async fn list_gateways(data: web::Data<AppState>, req: HttpRequest) -> AdminResult {
    let identity = requester_identity(&req);
    let gateways = data
        .catalog
        .accessible_gateways(identity.name.as_deref(), identity.is_admin())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(gateways)))
}

/// POST /api/admin/gateways
pub async fn create_gateway(data: web::Data<AppState>, request: web::Json<CreateGatewayRequest>) -> AdminResult {
    let gateway = data.catalog.create_gateway(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(gateway)))
}

/// PUT /api/admin/gateways/{id}
pub async fn toggle_gateway(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<ToggleRequest>,
) -> AdminResult {
    let gateway = data.catalog.set_gateway_enabled(path.into_inner(), request.enabled).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(gateway)))
}

/// 删除网关，通道一并删除
///
/// DELETE /api/admin/gateways/{id}
pub async fn delete_gateway(data: web::Data<AppState>, path: web::Path<Uuid>) -> AdminResult {
    data.catalog.delete_gateway(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(())))
}

/// GET /api/admin/channels
pub async fn list_channels(data: web::Data<AppState>) -> AdminResult {
    let channels = data.catalog.list_channels().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(channels)))
}

/// POST /api/admin/channels
pub async fn create_channel(data: web::Data<AppState>, request: web::Json<CreateChannelRequest>) -> AdminResult {
    let channel = data.catalog.create_channel(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(channel)))
}

/// PUT /api/admin/channels/{id}
pub async fn toggle_channel(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<ToggleRequest>,
) -> AdminResult {
    let channel = data.catalog.set_channel_enabled(path.into_inner(), request.enabled).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(channel)))
}

/// 凭证列表 (不含令牌)
///
/// GET /api/admin/credentials
pub async fn list_credentials(data: web::Data<AppState>) -> AdminResult {
    let credentials = data.credentials.list().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(credentials)))
}

/// 写入或轮换凭证
///
/// PUT /api/admin/credentials
pub async fn upsert_credential(
    data: web::Data<AppState>,
    request: web::Json<UpsertCredentialRequest>,
) -> AdminResult {
    let record = data.credentials.rotate(request.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(record)))
}

/// 端点修正，可重复执行
///
/// POST /api/admin/credentials/reconcile
pub async fn reconcile_credential(data: web::Data<AppState>, request: web::Json<ReconcileRequest>) -> AdminResult {
    let request = request.into_inner();
    let record = data.credentials.reconcile(&request.from, &request.to).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(record)))
}

/// 删除凭证
///
/// DELETE /api/admin/credentials?endpoint=...
pub async fn reset_credential(data: web::Data<AppState>, query: web::Query<EndpointQuery>) -> AdminResult {
    if !data.credentials.reset(&query.endpoint).await? {
        return Err(AdminError::NotFound(format!("credential {}", query.endpoint)));
    }
    Ok(HttpResponse::Ok().json(ApiResponse::success(())))
}

/// 按订单号或摘要查询订单映射
///
/// GET /api/admin/orders/{reference}
pub async fn lookup_order(data: web::Data<AppState>, path: web::Path<String>) -> AdminResult {
    let reference = path.into_inner();
    let mapping = data
        .orders
        .resolve(&reference)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("order {}", reference)))?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(mapping)))
}
