// 易支付回调处理器
// 异步通知与用户支付完成后的跳转页

use actix_web::{http::header::ContentType, web, HttpRequest, HttpResponse, Result as ActixResult};
use std::collections::HashMap;

use crate::state::AppState;

type Params = HashMap<String, String>;

/// 合并查询串与表单参数，表单优先
fn collect_params(req: &HttpRequest, form: Option<web::Form<Params>>) -> Params {
    let mut params = web::Query::<Params>::from_query(req.query_string())
        .map(|q| q.into_inner())
        .unwrap_or_default();
    if let Some(form) = form {
        params.extend(form.into_inner());
    }
    params
}

/// 易支付异步通知
///
/// GET|POST /api/notify
///
/// 参数: pid, trade_no, out_trade_no, type, name, money, trade_status, sign, sign_type
/// 响应: 纯文本 success / fail (始终 200)
pub async fn epay_notify(
    data: web::Data<AppState>,
    req: HttpRequest,
    form: Option<web::Form<Params>>,
) -> ActixResult<HttpResponse> {
    let params = collect_params(&req, form);
    log::info!(
        "Received notify for {} from {}",
        params.get("out_trade_no").map(String::as_str).unwrap_or("<none>"),
        req.connection_info().realip_remote_addr().unwrap_or("unknown")
    );

    let reply = data.orchestrator.notify(params).await;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(reply.as_str()))
}

/// 用户支付完成后的跳转页
///
/// GET /api/return
///
/// 只展示订单当前状态，不修改任何状态
pub async fn shopper_return(data: web::Data<AppState>, req: HttpRequest) -> ActixResult<HttpResponse> {
    let params = collect_params(&req, None);
    let message = match params.get("out_trade_no") {
        Some(order_no) => match data.orders.resolve(order_no).await {
            Ok(Some(mapping)) => format!("Order {} is {}", mapping.order_no, mapping.status.as_str()),
            Ok(None) => "Order not found".to_string(),
            Err(e) => {
                log::error!("Order lookup failed for return page: {}", e);
                "Order status unavailable".to_string()
            }
        },
        None => "Payment submitted, you may close this page".to_string(),
    };

    Ok(HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_app_state;
    use crate::utils::{canonicalize, md5_sign};
    use actix_web::{test, App};
    use rust_decimal::Decimal;

    fn signed_query(order_no: &str) -> String {
        let params: Params = [
            ("pid", "m"),
            ("trade_no", "2024010100001"),
            ("out_trade_no", order_no),
            ("type", "alipay"),
            ("name", "Order"),
            ("money", "1.00"),
            ("trade_status", "TRADE_SUCCESS"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let sign = md5_sign(&canonicalize(params.iter()), "k");
        let mut pairs: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v.replace(' ', "+"))).collect();
        pairs.push(format!("sign={}", sign));
        pairs.push("sign_type=MD5".to_string());
        pairs.join("&")
    }

    #[actix_web::test]
    async fn test_notify_over_get_and_post() {
        let (state, _processor) = test_app_state(None).await;
        let mapping = state
            .orders
            .open_order("T1", "https://shop-a.test/graphql/", None, Decimal::new(100, 2))
            .await
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/notify", web::get().to(epay_notify))
                .route("/api/notify", web::post().to(epay_notify))
                .route("/api/return", web::get().to(shopper_return)),
        )
        .await;

        let query = signed_query(&mapping.order_no);
        let req = test::TestRequest::get()
            .uri(&format!("/api/notify?{}", query))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "success");

        // 重复通知同样应答 success
        let req = test::TestRequest::post()
            .uri("/api/notify")
            .insert_header(("content-type", "application/x-www-form-urlencoded"))
            .set_payload(query)
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "success");

        let req = test::TestRequest::get()
            .uri(&format!("/api/return?out_trade_no={}", mapping.order_no))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, format!("Order {} is paid", mapping.order_no).into_bytes());
    }

    #[actix_web::test]
    async fn test_notify_without_params_replies_fail() {
        let (state, _processor) = test_app_state(None).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/notify", web::get().to(epay_notify)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/notify").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(test::read_body(resp).await, "fail");
    }
}
