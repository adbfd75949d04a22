// 请求日志中间件
// 记录方法、路径、来源地址、耗时与状态码，webhook 请求附带租户域名

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use std::time::Instant;

use crate::utils::DOMAIN_HEADER;

/// 请求日志中间件
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggingMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLoggingMiddleware { service })
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let tenant = req
            .headers()
            .get(DOMAIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|d| format!(" [{}]", d))
            .unwrap_or_default();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let elapsed = started.elapsed().as_millis();

            match &result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status >= 400 {
                        log::warn!("{} {} {}{} {}ms - {}", remote_addr, method, path, tenant, elapsed, status);
                    } else {
                        log::info!("{} {} {}{} {}ms - {}", remote_addr, method, path, tenant, elapsed, status);
                    }
                }
                Err(e) => {
                    log::error!("{} {} {}{} {}ms - ERROR: {}", remote_addr, method, path, tenant, elapsed, e);
                }
            }

            result
        })
    }
}
