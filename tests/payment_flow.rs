// 完整支付流程集成测试
// 管理接口完成配置后，依次走 初始化 -> 异步通知 -> 处理

use actix_web::{test, web, App};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use epay_bridge::config::Config;
use epay_bridge::models::{CredentialRecord, Gateway, OrderResult, QueryResult};
use epay_bridge::routes;
use epay_bridge::services::epay_client::build_create_params;
use epay_bridge::services::{
    CreateOrder, PlatformClient, PlatformError, ProcessorClient, ProcessorError, TransactionEvent,
};
use epay_bridge::state::AppState;
use epay_bridge::storage::MemoryStore;
use epay_bridge::utils::{canonicalize, md5_sign};

const ENDPOINT: &str = "https://shop-a.test/graphql/";

#[derive(Default)]
struct FakeEpay {
    orders: Mutex<Vec<(Gateway, CreateOrder)>>,
    queries: Mutex<usize>,
}

#[async_trait]
impl ProcessorClient for FakeEpay {
    async fn create_order(&self, gateway: &Gateway, order: &CreateOrder) -> Result<OrderResult, ProcessorError> {
        self.orders.lock().unwrap().push((gateway.clone(), order.clone()));
        Ok(OrderResult::Success {
            trade_no: "2024010199999".to_string(),
            pay_url: Some("https://pay/x".to_string()),
            qrcode: None,
        })
    }

    async fn query_order(&self, _gateway: &Gateway, _out_trade_no: &str) -> Result<QueryResult, ProcessorError> {
        *self.queries.lock().unwrap() += 1;
        Err(ProcessorError::Transport("unreachable".to_string()))
    }
}

#[derive(Default)]
struct FakePlatform {
    events: Mutex<Vec<TransactionEvent>>,
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn report_event(&self, credential: &CredentialRecord, event: &TransactionEvent) -> Result<(), PlatformError> {
        assert_eq!(credential.endpoint, ENDPOINT);
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

fn admin_token() -> String {
    Config::default().security.admin_token
}

macro_rules! bridge_app {
    ($processor:expr, $platform:expr) => {{
        let config = Config::default();
        let route_config = config.clone();
        let state = AppState::new(config, Arc::new(MemoryStore::new()), $processor, $platform);
        test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(move |cfg| routes::configure(cfg, &route_config)),
        )
        .await
    }};
}

macro_rules! admin_call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.insert_header(("X-Admin-Token", admin_token())).to_request()).await;
        assert!(resp.status().is_success(), "admin call failed: {}", resp.status());
        let body: Value = test::read_body_json(resp).await;
        body
    }};
}

fn initialize_body(transaction_id: &str) -> Value {
    json!({
        "action": {"amount": "1.00", "currency": "CNY", "actionType": "CHARGE"},
        "transaction": {"id": transaction_id},
        "data": {}
    })
}

#[actix_web::test]
async fn test_full_payment_flow() {
    let processor = Arc::new(FakeEpay::default());
    let platform = Arc::new(FakePlatform::default());
    let app = bridge_app!(processor.clone(), platform.clone());

    // 站点登记并批准
    let site = admin_call!(app, test::TestRequest::post().uri("/api/admin/sites").set_json(json!({"domain": "shop-a.test"})));
    let site_id = site["data"]["id"].as_str().unwrap().to_string();
    admin_call!(app, test::TestRequest::post().uri(&format!("/api/admin/sites/{}/approve", site_id)));

    admin_call!(
        app,
        test::TestRequest::put()
            .uri("/api/admin/credentials")
            .set_json(json!({"endpoint": ENDPOINT, "token": "tok-a", "app_id": "app-a"}))
    );
    admin_call!(
        app,
        test::TestRequest::post().uri("/api/admin/gateways").set_json(json!({
            "name": "primary",
            "merchant_id": "m",
            "secret_key": "k",
            "base_url": "https://pay.example.net"
        }))
    );

    // 初始化
    let req = test::TestRequest::post()
        .uri("/api/webhooks/transaction-initialize")
        .insert_header(("saleor-api-url", ENDPOINT))
        .insert_header(("Authorization", "Bearer tok-a"))
        .set_json(initialize_body("T1"))
        .to_request();
    let initialized: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(initialized["result"], "CHARGE_ACTION_REQUIRED");
    assert_eq!(initialized["externalUrl"], "https://pay/x");
    assert_eq!(initialized["pspReference"], "2024010199999");
    let order_no = initialized["data"]["paymentResponse"]["epayOrderNo"].as_str().unwrap().to_string();

    let (gateway, order) = processor.orders.lock().unwrap()[0].clone();
    assert_eq!(order.out_trade_no, order_no);
    assert_eq!(order.money, "1.00");
    assert_eq!(order.pay_type, "alipay");
    let params = build_create_params(&gateway, &order, 0).unwrap();
    assert_eq!(params["sign"], md5_sign(&canonicalize(params.iter()), "k"));

    // 易支付异步通知 (重复两次)
    let mut notify: BTreeMap<String, String> = [
        ("pid", "m"),
        ("trade_no", "2024010199999"),
        ("out_trade_no", order_no.as_str()),
        ("type", "alipay"),
        ("name", order.name.as_str()),
        ("money", "1.00"),
        ("trade_status", "TRADE_SUCCESS"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let sign = md5_sign(&canonicalize(notify.iter()), "k");
    notify.insert("sign".to_string(), sign);
    notify.insert("sign_type".to_string(), "MD5".to_string());
    let url = reqwest::Url::parse_with_params("http://bridge.test/api/notify", notify.iter()).unwrap();
    let notify_uri = format!("/api/notify?{}", url.query().unwrap());

    for _ in 0..2 {
        let req = test::TestRequest::get().uri(&notify_uri).to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "success");
    }
    {
        let events = platform.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_id, "T1");
    }

    // 处理：订单已终态，不再查询处理器
    let req = test::TestRequest::post()
        .uri("/api/webhooks/transaction-process")
        .insert_header(("saleor-api-url", ENDPOINT))
        .insert_header(("Authorization", "Bearer tok-a"))
        .set_json(json!({
            "action": {"amount": 1.0},
            "transaction": {"id": "T1"},
            "data": {"paymentResponse": {"epayOrderNo": order_no}}
        }))
        .to_request();
    let processed: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(processed["result"], "CHARGE_SUCCESS");
    assert_eq!(*processor.queries.lock().unwrap(), 0);

    let lookup = admin_call!(app, test::TestRequest::get().uri(&format!("/api/admin/orders/{}", order_no)));
    assert_eq!(lookup["data"]["status"], "paid");
}

#[actix_web::test]
async fn test_pending_site_is_refused() {
    let processor = Arc::new(FakeEpay::default());
    let app = bridge_app!(processor.clone(), Arc::new(FakePlatform::default()));

    admin_call!(app, test::TestRequest::post().uri("/api/admin/sites").set_json(json!({"domain": "shop-a.test"})));
    admin_call!(
        app,
        test::TestRequest::put()
            .uri("/api/admin/credentials")
            .set_json(json!({"endpoint": ENDPOINT, "token": "tok-a", "app_id": "app-a"}))
    );

    let req = test::TestRequest::post()
        .uri("/api/webhooks/transaction-initialize")
        .insert_header(("saleor-api-url", ENDPOINT))
        .set_json(initialize_body("T2"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["result"], "CHARGE_FAILURE");
    assert!(processor.orders.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn test_admin_scope_requires_token() {
    let app = bridge_app!(Arc::new(FakeEpay::default()), Arc::new(FakePlatform::default()));
    let req = test::TestRequest::get().uri("/api/admin/sites").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}
