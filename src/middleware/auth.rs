// 管理接口认证中间件
// 校验管理令牌，并把请求方身份写入请求扩展

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpRequest, HttpResponse,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::models::ApiResponse;
use crate::utils::{constant_time_eq, extract_bearer};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
pub const REQUESTER_HEADER: &str = "x-requester";

/// 请求方身份
///
/// 携带 `X-Requester` 时按该身份做网关可见性过滤，否则视为管理员。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterIdentity {
    pub name: Option<String>,
}

impl RequesterIdentity {
    pub fn is_admin(&self) -> bool {
        self.name.is_none()
    }
}

/// 管理令牌认证中间件
pub struct AdminAuth {
    token: Rc<String>,
}

impl AdminAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Rc::new(token.into()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdminAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AdminAuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AdminAuthMiddleware {
            service: Rc::new(service),
            token: self.token.clone(),
        })
    }
}

pub struct AdminAuthMiddleware<S> {
    service: Rc<S>,
    token: Rc<String>,
}

/// 提取管理令牌 (X-Admin-Token 优先，其次 Bearer)
fn presented_token(req: &HttpRequest) -> Option<String> {
    if let Some(value) = req.headers().get(ADMIN_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }
    extract_bearer(req)
}

fn requester(req: &HttpRequest) -> RequesterIdentity {
    let name = req
        .headers()
        .get(REQUESTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    RequesterIdentity { name }
}

impl<S, B> Service<ServiceRequest> for AdminAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let authorized = presented_token(req.request())
            .map(|presented| constant_time_eq(&presented, &self.token))
            .unwrap_or(false);

        if !authorized {
            log::warn!("Rejected admin request to {}", req.path());
            let response = HttpResponse::Unauthorized().json(ApiResponse::<()>::error(401, "Invalid admin token"));
            return Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) });
        }

        let identity = requester(req.request());
        req.extensions_mut().insert(identity);

        let service = Rc::clone(&self.service);
        Box::pin(async move { Ok(service.call(req).await?.map_into_left_body()) })
    }
}

/// 从请求扩展中获取请求方身份
pub fn requester_identity(req: &HttpRequest) -> RequesterIdentity {
    req.extensions()
        .get::<RequesterIdentity>()
        .cloned()
        .unwrap_or(RequesterIdentity { name: None })
}
