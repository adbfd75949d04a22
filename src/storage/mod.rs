// 持久化层
// 业务服务只依赖这里的异步 trait，具体实现为 PostgreSQL 或内存存储

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Channel, CredentialRecord, Gateway, NewOrderMapping, OrderMapping, OrderStatus, Site,
    SiteStatus, Transition, WhitelistEntry,
};

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 唯一约束冲突
    #[error("{0} already exists")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 平台凭证存储
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, endpoint: &str) -> StoreResult<Option<CredentialRecord>>;

    async fn find_credential_by_token(&self, token: &str) -> StoreResult<Option<CredentialRecord>>;

    async fn list_credentials(&self) -> StoreResult<Vec<CredentialRecord>>;

    /// 按端点写入，已存在时覆盖令牌等字段并保留创建时间
    async fn upsert_credential(&self, record: CredentialRecord) -> StoreResult<CredentialRecord>;

    /// 把凭证从旧端点迁移到新端点 (写入新记录后删除旧记录)
    ///
    /// 旧端点不存在时返回 None。新端点已有记录时以旧记录内容覆盖。
    async fn reanchor_credential(&self, from: &str, to: &str) -> StoreResult<Option<CredentialRecord>>;

    async fn delete_credential(&self, endpoint: &str) -> StoreResult<bool>;
}

/// 站点与白名单存储
#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>>;

    async fn find_site_by_domain(&self, domain: &str) -> StoreResult<Option<Site>>;

    async fn find_sites_by_ip(&self, ip: &str) -> StoreResult<Vec<Site>>;

    async fn list_sites(&self, status: Option<SiteStatus>) -> StoreResult<Vec<Site>>;

    /// 新增站点，域名重复时返回 Conflict
    async fn insert_site(&self, site: Site) -> StoreResult<Site>;

    async fn update_site(&self, site: Site) -> StoreResult<Site>;

    async fn list_whitelist(&self) -> StoreResult<Vec<WhitelistEntry>>;

    async fn insert_whitelist(&self, entry: WhitelistEntry) -> StoreResult<WhitelistEntry>;

    async fn set_whitelist_active(&self, id: Uuid, active: bool) -> StoreResult<WhitelistEntry>;
}

/// 网关与通道存储
#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn list_gateways(&self) -> StoreResult<Vec<Gateway>>;

    async fn get_gateway(&self, id: Uuid) -> StoreResult<Option<Gateway>>;

    async fn find_gateways_by_merchant(&self, merchant_id: &str) -> StoreResult<Vec<Gateway>>;

    async fn insert_gateway(&self, gateway: Gateway) -> StoreResult<Gateway>;

    async fn set_gateway_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Gateway>;

    /// 删除网关及其下所有通道
    async fn delete_gateway(&self, id: Uuid) -> StoreResult<bool>;

    async fn list_channels(&self) -> StoreResult<Vec<Channel>>;

    async fn get_channel(&self, id: Uuid) -> StoreResult<Option<Channel>>;

    async fn insert_channel(&self, channel: Channel) -> StoreResult<Channel>;

    async fn set_channel_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Channel>;
}

/// 订单映射存储
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 新增映射，订单号或摘要重复时返回 Conflict
    async fn insert_order(&self, order: NewOrderMapping) -> StoreResult<OrderMapping>;

    async fn get_order(&self, order_no: &str) -> StoreResult<Option<OrderMapping>>;

    async fn get_order_by_hash(&self, order_hash: &str) -> StoreResult<Option<OrderMapping>>;

    async fn latest_order_for_transaction(&self, transaction_id: &str) -> StoreResult<Option<OrderMapping>>;

    /// 比较并设置: 仅当订单处于 pending 时迁移到目标状态
    async fn transition_order(&self, order_no: &str, to: OrderStatus) -> StoreResult<Transition>;
}

/// 完整存储接口
#[async_trait]
pub trait Store: CredentialStore + SiteStore + GatewayStore + OrderStore {
    /// 连通性检查
    async fn ping(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}
