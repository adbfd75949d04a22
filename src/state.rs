// 应用状态管理
// 包含存储、各业务服务与配置信息等全局状态

use actix_web::web;
use std::sync::Arc;

use crate::config::Config;
use crate::services::{
    CredentialResolver, EpayClient, GatewayCatalog, GraphqlPlatformClient, OrchestratorSettings,
    OrderCorrelation, PlatformClient, ProcessorClient, SiteRegistry, TransactionOrchestrator,
};
use crate::storage::Store;

/// 应用全局状态
pub struct AppState {
    /// 存储后端
    pub store: Arc<dyn Store>,
    /// 应用配置
    pub config: Config,
    pub sites: Arc<SiteRegistry>,
    pub credentials: Arc<CredentialResolver>,
    pub catalog: Arc<GatewayCatalog>,
    pub orders: Arc<OrderCorrelation>,
    /// 三阶段交易编排器
    pub orchestrator: TransactionOrchestrator,
}

impl AppState {
    /// 创建新的应用状态实例
    ///
    /// # Arguments
    /// * `config` - 应用配置
    /// * `store` - 存储后端
    /// * `processor` - 易支付客户端
    /// * `platform` - 平台事件上报客户端
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        processor: Arc<dyn ProcessorClient>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        let sites = Arc::new(SiteRegistry::new(store.clone()));
        let credentials = Arc::new(CredentialResolver::new(
            store.clone(),
            config.resolver.placeholder_markers.clone(),
        ));
        let catalog = Arc::new(GatewayCatalog::new(store.clone()));
        let orders = Arc::new(OrderCorrelation::new(
            store.clone(),
            config.processor.max_order_no_len,
        ));
        let orchestrator = TransactionOrchestrator::new(
            sites.clone(),
            credentials.clone(),
            catalog.clone(),
            orders.clone(),
            processor,
            platform,
            OrchestratorSettings {
                public_base_url: config.processor.public_base_url.clone(),
                default_pay_type: config.processor.default_pay_type.clone(),
            },
        );

        Self {
            store,
            config,
            sites,
            credentials,
            catalog,
            orders,
            orchestrator,
        }
    }

    /// 使用 HTTP 客户端创建应用状态
    pub fn with_http_clients(config: Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let timeout = config.processor.request_timeout();
        let processor = EpayClient::new(timeout)?;
        let platform = GraphqlPlatformClient::new(timeout)?;
        Ok(Self::new(config, store, Arc::new(processor), Arc::new(platform)))
    }
}

/// 应用状态数据类型别名
pub type AppStateData = web::Data<AppState>;
