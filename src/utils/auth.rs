// 认证工具函数
// 从请求头中提取令牌、端点、域名与客户端地址

use actix_web::HttpRequest;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::Value;

use crate::models::RequestContext;

/// 平台声明 API 端点的请求头，按优先级排列
pub const ENDPOINT_HEADERS: [&str; 2] = ["saleor-api-url", "x-platform-api-url"];
/// 平台域名请求头
pub const DOMAIN_HEADER: &str = "saleor-domain";
/// 平台 webhook 签名请求头
pub const SIGNATURE_HEADERS: [&str; 2] = ["saleor-signature", "x-platform-signature"];

const TOKEN_CLAIMS: [&str; 3] = ["token", "app_token", "access_token"];

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// 从Authorization头部提取Bearer令牌
///
/// # Arguments
/// * `req` - HTTP请求对象
///
/// # Returns
/// * 原始令牌字符串
pub fn extract_bearer(req: &HttpRequest) -> Option<String> {
    let value = header(req, "Authorization")?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// 把令牌转换为凭证查询键
///
/// JWT 形式的令牌取载荷中的 `token`/`app_token`/`access_token` 声明，
/// 不校验签名，结果只用于在凭证库中查找。其他形式原样返回。
pub fn token_lookup_key(raw: &str) -> String {
    let mut segments = raw.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return raw.to_string();
    };

    let claims = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok());

    claims
        .and_then(|claims| {
            TOKEN_CLAIMS
                .iter()
                .find_map(|name| claims.get(*name).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| raw.to_string())
}

/// 提取请求方地址：优先 X-Forwarded-For 的第一个地址
pub fn client_ip(req: &HttpRequest) -> Option<String> {
    if let Some(forwarded) = header(req, "X-Forwarded-For") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return Some(first.to_string());
        }
    }
    req.peer_addr().map(|addr| addr.ip().to_string())
}

/// 取URL的主机名
pub fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// 取请求携带的平台签名
pub fn extract_signature(req: &HttpRequest) -> Option<String> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| header(req, name))
        .map(str::to_string)
}

/// 构建请求上下文
pub fn request_context(req: &HttpRequest) -> RequestContext {
    let endpoint_hint = ENDPOINT_HEADERS
        .iter()
        .find_map(|name| header(req, name))
        .map(str::to_string);

    let domain = header(req, DOMAIN_HEADER)
        .map(|d| d.to_ascii_lowercase())
        .or_else(|| endpoint_hint.as_deref().and_then(host_of));

    RequestContext {
        token: extract_bearer(req).map(|t| token_lookup_key(&t)),
        domain,
        client_ip: client_ip(req),
        endpoint_hint,
        signature_verified: false,
    }
}
