// 测试替身
// 可编排响应的处理器与记录上报的平台客户端

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::{
    sample_gateway, CredentialRecord, Gateway, OrderResult, QueryResult, RequestContext, Site,
    SiteStatus,
};
use crate::services::{
    CreateOrder, CredentialResolver, GatewayCatalog, OrchestratorSettings, OrderCorrelation,
    PlatformClient, PlatformError, ProcessorClient, ProcessorError, SiteRegistry, TransactionEvent,
    TransactionOrchestrator,
};
use crate::storage::{CredentialStore, GatewayStore, MemoryStore, SiteStore, Store};

pub const SHOP_DOMAIN: &str = "shop-a.test";
pub const SHOP_ENDPOINT: &str = "https://shop-a.test/graphql/";

/// 按预设结果应答的处理器
pub struct ScriptedProcessor {
    create: Mutex<Result<OrderResult, ProcessorError>>,
    query: Mutex<Result<QueryResult, ProcessorError>>,
    pub create_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub last_order: Mutex<Option<CreateOrder>>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self {
            create: Mutex::new(Ok(OrderResult::Success {
                trade_no: "2024010100001".to_string(),
                pay_url: Some("https://pay.example.net/submit?trade_no=2024010100001".to_string()),
                qrcode: None,
            })),
            query: Mutex::new(Err(ProcessorError::Transport("not scripted".to_string()))),
            create_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            last_order: Mutex::new(None),
        }
    }

    pub fn on_create(&self, result: Result<OrderResult, ProcessorError>) {
        *self.create.lock().unwrap() = result;
    }

    pub fn on_query(&self, result: Result<QueryResult, ProcessorError>) {
        *self.query.lock().unwrap() = result;
    }

    pub fn created(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessorClient for ScriptedProcessor {
    async fn create_order(&self, _gateway: &Gateway, order: &CreateOrder) -> Result<OrderResult, ProcessorError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_order.lock().unwrap() = Some(order.clone());
        self.create.lock().unwrap().clone()
    }

    async fn query_order(&self, _gateway: &Gateway, _out_trade_no: &str) -> Result<QueryResult, ProcessorError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.query.lock().unwrap().clone()
    }
}

/// 记录所有上报事件的平台客户端
#[derive(Default)]
pub struct RecordingPlatform {
    pub events: Mutex<Vec<TransactionEvent>>,
    pub fail: bool,
}

impl RecordingPlatform {
    pub fn reported(&self) -> Vec<TransactionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformClient for RecordingPlatform {
    async fn report_event(&self, _credential: &CredentialRecord, event: &TransactionEvent) -> Result<(), PlatformError> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            return Err(PlatformError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

/// 已批准站点、已注册凭证与一个 MD5 网关
pub async fn seeded_store() -> (Arc<MemoryStore>, Gateway) {
    let store = Arc::new(MemoryStore::new());

    let mut site = Site::new(SHOP_DOMAIN);
    site.status = SiteStatus::Approved;
    store.insert_site(site).await.unwrap();
    store
        .upsert_credential(CredentialRecord::new(SHOP_ENDPOINT, "tok-a", "app-a"))
        .await
        .unwrap();
    let gateway = store.insert_gateway(sample_gateway("primary", 10)).await.unwrap();
    (store, gateway)
}

/// 基于 seeded_store 的完整编排环境
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub processor: Arc<ScriptedProcessor>,
    pub platform: Arc<RecordingPlatform>,
    pub orchestrator: TransactionOrchestrator,
    pub gateway: Gateway,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_platform(RecordingPlatform::default()).await
    }

    pub async fn with_platform(platform: RecordingPlatform) -> Self {
        let (store, gateway) = seeded_store().await;

        let dyn_store: Arc<dyn Store> = store.clone();
        let processor = Arc::new(ScriptedProcessor::new());
        let platform = Arc::new(platform);
        let orchestrator = TransactionOrchestrator::new(
            Arc::new(SiteRegistry::new(dyn_store.clone())),
            Arc::new(CredentialResolver::new(dyn_store.clone(), vec!["localhost".to_string()])),
            Arc::new(GatewayCatalog::new(dyn_store.clone())),
            Arc::new(OrderCorrelation::new(dyn_store, 64)),
            processor.clone(),
            platform.clone(),
            OrchestratorSettings {
                public_base_url: "https://bridge.test/".to_string(),
                default_pay_type: "alipay".to_string(),
            },
        );

        Self {
            store,
            processor,
            platform,
            orchestrator,
            gateway,
        }
    }

    pub fn context(&self) -> RequestContext {
        RequestContext {
            endpoint_hint: Some(SHOP_ENDPOINT.to_string()),
            token: Some("tok-a".to_string()),
            domain: Some(SHOP_DOMAIN.to_string()),
            client_ip: Some("203.0.113.7".to_string()),
            signature_verified: false,
        }
    }
}
