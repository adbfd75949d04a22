// 平台 webhook 处理器
// 交易初始化与处理两个同步 webhook，任何失败都以 CHARGE_FAILURE 应答

use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{InitializeSessionPayload, ProcessSessionPayload, RequestContext, TransactionSessionResponse};
use crate::state::AppState;
use crate::utils::{extract_signature, request_context, verify_hmac_signature};

/// 尽量从原始报文中取出金额，供失败响应回显
fn echoed_amount(body: &[u8]) -> Decimal {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| match v.pointer("/action/amount") {
            Some(Value::String(s)) => s.parse().ok(),
            Some(Value::Number(n)) => n.to_string().parse().ok(),
            _ => None,
        })
        .unwrap_or(Decimal::ZERO)
}

/// 配置了密钥时校验平台签名，返回请求是否经过了签名校验
fn check_signature(data: &AppState, req: &HttpRequest, body: &[u8]) -> Result<bool, String> {
    let Some(secret) = data.config.security.webhook_secret.as_deref() else {
        return Ok(false);
    };
    let signature = extract_signature(req).ok_or_else(|| "missing webhook signature".to_string())?;
    match verify_hmac_signature(body, &signature, secret) {
        Ok(true) => Ok(true),
        Ok(false) => Err("webhook signature mismatch".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// 签名校验与报文解析，失败时直接给出 CHARGE_FAILURE
fn accept<T: DeserializeOwned>(
    data: &AppState,
    req: &HttpRequest,
    body: &[u8],
) -> Result<(RequestContext, T), TransactionSessionResponse> {
    let signature_verified = match check_signature(data, req, body) {
        Ok(verified) => verified,
        Err(reason) => {
            log::warn!("Rejected webhook {}: {}", req.path(), reason);
            return Err(TransactionSessionResponse::failure(
                echoed_amount(body),
                format!("authorization failed: {}", reason),
            ));
        }
    };

    let payload = serde_json::from_slice(body).map_err(|e| {
        log::warn!("Malformed webhook payload on {}: {}", req.path(), e);
        TransactionSessionResponse::failure(echoed_amount(body), format!("invalid payload: {}", e))
    })?;

    let mut ctx = request_context(req);
    ctx.signature_verified = signature_verified;
    Ok((ctx, payload))
}

/// 交易初始化
///
/// POST /api/webhooks/transaction-initialize
///
/// 请求体: InitializeSessionPayload
/// 响应: TransactionSessionResponse (始终 200)
pub async fn transaction_initialize(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> ActixResult<HttpResponse> {
    let (ctx, payload): (_, InitializeSessionPayload) = match accept(&data, &req, &body) {
        Ok(accepted) => accepted,
        Err(failure) => return Ok(HttpResponse::Ok().json(failure)),
    };

    let response = data.orchestrator.initialize(&ctx, payload).await;
    Ok(HttpResponse::Ok().json(response))
}

/// 交易处理
///
/// POST /api/webhooks/transaction-process
///
/// 请求体: ProcessSessionPayload
/// 响应: TransactionSessionResponse (始终 200)
pub async fn transaction_process(
    data: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> ActixResult<HttpResponse> {
    let (ctx, payload): (_, ProcessSessionPayload) = match accept(&data, &req, &body) {
        Ok(accepted) => accepted,
        Err(failure) => return Ok(HttpResponse::Ok().json(failure)),
    };

    let response = data.orchestrator.process(&ctx, payload).await;
    Ok(HttpResponse::Ok().json(response))
}
