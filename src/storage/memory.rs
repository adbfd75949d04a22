// 内存存储
// 用于测试和本地开发，语义与 PostgreSQL 实现保持一致

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CredentialStore, GatewayStore, OrderStore, SiteStore, Store, StoreError, StoreResult,
};
use crate::models::{
    Channel, CredentialRecord, Gateway, NewOrderMapping, OrderMapping, OrderStatus, Site,
    SiteStatus, Transition, WhitelistEntry,
};

#[derive(Default)]
pub struct MemoryStore {
    credentials: RwLock<HashMap<String, CredentialRecord>>,
    sites: RwLock<HashMap<Uuid, Site>>,
    whitelist: RwLock<Vec<WhitelistEntry>>,
    gateways: RwLock<HashMap<Uuid, Gateway>>,
    channels: RwLock<HashMap<Uuid, Channel>>,
    orders: RwLock<HashMap<String, OrderMapping>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credential(&self, endpoint: &str) -> StoreResult<Option<CredentialRecord>> {
        Ok(self.credentials.read().await.get(endpoint).cloned())
    }

    async fn find_credential_by_token(&self, token: &str) -> StoreResult<Option<CredentialRecord>> {
        let credentials = self.credentials.read().await;
        let mut matches: Vec<&CredentialRecord> =
            credentials.values().filter(|c| c.token == token).collect();
        // 多条命中时取最近更新的一条
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(matches.first().map(|c| (*c).clone()))
    }

    async fn list_credentials(&self) -> StoreResult<Vec<CredentialRecord>> {
        let mut all: Vec<CredentialRecord> = self.credentials.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        Ok(all)
    }

    async fn upsert_credential(&self, mut record: CredentialRecord) -> StoreResult<CredentialRecord> {
        let mut credentials = self.credentials.write().await;
        record.updated_at = Utc::now();
        if let Some(existing) = credentials.get(&record.endpoint) {
            record.created_at = existing.created_at;
        }
        credentials.insert(record.endpoint.clone(), record.clone());
        Ok(record)
    }

    async fn reanchor_credential(&self, from: &str, to: &str) -> StoreResult<Option<CredentialRecord>> {
        let mut credentials = self.credentials.write().await;
        let Some(mut record) = credentials.remove(from) else {
            return Ok(None);
        };
        record.endpoint = to.to_string();
        record.updated_at = Utc::now();
        credentials.insert(to.to_string(), record.clone());
        Ok(Some(record))
    }

    async fn delete_credential(&self, endpoint: &str) -> StoreResult<bool> {
        Ok(self.credentials.write().await.remove(endpoint).is_some())
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>> {
        Ok(self.sites.read().await.get(&id).cloned())
    }

    async fn find_site_by_domain(&self, domain: &str) -> StoreResult<Option<Site>> {
        Ok(self
            .sites
            .read()
            .await
            .values()
            .find(|s| s.domain == domain)
            .cloned())
    }

    async fn find_sites_by_ip(&self, ip: &str) -> StoreResult<Vec<Site>> {
        Ok(self
            .sites
            .read()
            .await
            .values()
            .filter(|s| s.client_ip.as_deref() == Some(ip))
            .cloned()
            .collect())
    }

    async fn list_sites(&self, status: Option<SiteStatus>) -> StoreResult<Vec<Site>> {
        let mut sites: Vec<Site> = self
            .sites
            .read()
            .await
            .values()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        sites.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(sites)
    }

    async fn insert_site(&self, site: Site) -> StoreResult<Site> {
        let mut sites = self.sites.write().await;
        if sites.values().any(|s| s.domain == site.domain) {
            return Err(StoreError::Conflict(format!("site {}", site.domain)));
        }
        sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn update_site(&self, mut site: Site) -> StoreResult<Site> {
        let mut sites = self.sites.write().await;
        if !sites.contains_key(&site.id) {
            return Err(StoreError::NotFound(format!("site {}", site.id)));
        }
        site.updated_at = Utc::now();
        sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn list_whitelist(&self) -> StoreResult<Vec<WhitelistEntry>> {
        Ok(self.whitelist.read().await.clone())
    }

    async fn insert_whitelist(&self, entry: WhitelistEntry) -> StoreResult<WhitelistEntry> {
        self.whitelist.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn set_whitelist_active(&self, id: Uuid, active: bool) -> StoreResult<WhitelistEntry> {
        let mut whitelist = self.whitelist.write().await;
        let entry = whitelist
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("whitelist entry {}", id)))?;
        entry.is_active = active;
        Ok(entry.clone())
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn list_gateways(&self) -> StoreResult<Vec<Gateway>> {
        let mut gateways: Vec<Gateway> = self.gateways.read().await.values().cloned().collect();
        gateways.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(gateways)
    }

    async fn get_gateway(&self, id: Uuid) -> StoreResult<Option<Gateway>> {
        Ok(self.gateways.read().await.get(&id).cloned())
    }

    async fn find_gateways_by_merchant(&self, merchant_id: &str) -> StoreResult<Vec<Gateway>> {
        Ok(self
            .list_gateways()
            .await?
            .into_iter()
            .filter(|g| g.merchant_id == merchant_id)
            .collect())
    }

    async fn insert_gateway(&self, gateway: Gateway) -> StoreResult<Gateway> {
        self.gateways.write().await.insert(gateway.id, gateway.clone());
        Ok(gateway)
    }

    async fn set_gateway_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Gateway> {
        let mut gateways = self.gateways.write().await;
        let gateway = gateways
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("gateway {}", id)))?;
        gateway.enabled = enabled;
        gateway.updated_at = Utc::now();
        Ok(gateway.clone())
    }

    async fn delete_gateway(&self, id: Uuid) -> StoreResult<bool> {
        // 与外键 ON DELETE CASCADE 一致
        let removed = self.gateways.write().await.remove(&id).is_some();
        if removed {
            self.channels.write().await.retain(|_, c| c.gateway_id != id);
        }
        Ok(removed)
    }

    async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        let mut channels: Vec<Channel> = self.channels.read().await.values().cloned().collect();
        channels.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(channels)
    }

    async fn get_channel(&self, id: Uuid) -> StoreResult<Option<Channel>> {
        Ok(self.channels.read().await.get(&id).cloned())
    }

    async fn insert_channel(&self, channel: Channel) -> StoreResult<Channel> {
        if !self.gateways.read().await.contains_key(&channel.gateway_id) {
            return Err(StoreError::NotFound(format!("gateway {}", channel.gateway_id)));
        }
        self.channels.write().await.insert(channel.id, channel.clone());
        Ok(channel)
    }

    async fn set_channel_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Channel> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("channel {}", id)))?;
        channel.enabled = enabled;
        Ok(channel.clone())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: NewOrderMapping) -> StoreResult<OrderMapping> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.order_no) {
            return Err(StoreError::Conflict(format!("order {}", order.order_no)));
        }
        if orders.values().any(|o| o.order_hash == order.order_hash) {
            return Err(StoreError::Conflict(format!("order hash {}", order.order_hash)));
        }
        let mapping = order.into_mapping();
        orders.insert(mapping.order_no.clone(), mapping.clone());
        Ok(mapping)
    }

    async fn get_order(&self, order_no: &str) -> StoreResult<Option<OrderMapping>> {
        Ok(self.orders.read().await.get(order_no).cloned())
    }

    async fn get_order_by_hash(&self, order_hash: &str) -> StoreResult<Option<OrderMapping>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.order_hash == order_hash)
            .cloned())
    }

    async fn latest_order_for_transaction(&self, transaction_id: &str) -> StoreResult<Option<OrderMapping>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.transaction_id == transaction_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned())
    }

    async fn transition_order(&self, order_no: &str, to: OrderStatus) -> StoreResult<Transition> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_no)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", order_no)))?;
        if order.status != OrderStatus::Pending {
            return Ok(Transition::Unchanged(order.status));
        }
        order.status = to;
        order.updated_at = Utc::now();
        Ok(Transition::Applied)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
