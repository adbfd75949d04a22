// PostgreSQL 存储实现
// 使用运行时查询，表结构见 migrations/

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    CredentialStore, GatewayStore, OrderStore, SiteStore, Store, StoreError, StoreResult,
};
use crate::models::{
    Channel, CredentialRecord, Gateway, NewOrderMapping, OrderMapping, OrderStatus, Site,
    SiteStatus, Transition, WhitelistEntry,
};

const CREDENTIAL_COLUMNS: &str =
    "endpoint, token, app_id, public_key, tenant_link_id, created_at, updated_at";
const SITE_COLUMNS: &str = "id, domain, name, api_url, client_ip, status, requested_at, \
     approved_at, approved_by, notes, updated_at";
const GATEWAY_COLUMNS: &str = "id, name, merchant_id, secret_key, private_key, platform_public_key, \
     base_url, api_version, sign_type, enabled, priority, is_global, allowed_users, return_url, \
     created_at, updated_at";
const CHANNEL_COLUMNS: &str = "id, name, channel_type, gateway_id, enabled, priority, created_at";
const ORDER_COLUMNS: &str = "order_no, order_hash, transaction_id, endpoint, gateway_id, amount, \
     status, created_at, updated_at";

/// PostgreSQL 存储
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// 把约束冲突转换为业务可识别的错误
fn classify(err: sqlx::Error, what: impl Into<String>) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(what.into());
        }
        if db.is_foreign_key_violation() {
            return StoreError::NotFound(what.into());
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn get_credential(&self, endpoint: &str) -> StoreResult<Option<CredentialRecord>> {
        let sql = format!("SELECT {} FROM credentials WHERE endpoint = $1", CREDENTIAL_COLUMNS);
        Ok(sqlx::query_as::<_, CredentialRecord>(&sql)
            .bind(endpoint)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_credential_by_token(&self, token: &str) -> StoreResult<Option<CredentialRecord>> {
        let sql = format!(
            "SELECT {} FROM credentials WHERE token = $1 ORDER BY updated_at DESC LIMIT 1",
            CREDENTIAL_COLUMNS
        );
        Ok(sqlx::query_as::<_, CredentialRecord>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_credentials(&self) -> StoreResult<Vec<CredentialRecord>> {
        let sql = format!("SELECT {} FROM credentials ORDER BY endpoint", CREDENTIAL_COLUMNS);
        Ok(sqlx::query_as::<_, CredentialRecord>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn upsert_credential(&self, record: CredentialRecord) -> StoreResult<CredentialRecord> {
        let sql = format!(
            "INSERT INTO credentials (endpoint, token, app_id, public_key, tenant_link_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
             ON CONFLICT (endpoint) DO UPDATE SET
                token = EXCLUDED.token,
                app_id = EXCLUDED.app_id,
                public_key = EXCLUDED.public_key,
                tenant_link_id = EXCLUDED.tenant_link_id,
                updated_at = NOW()
             RETURNING {}",
            CREDENTIAL_COLUMNS
        );
        Ok(sqlx::query_as::<_, CredentialRecord>(&sql)
            .bind(&record.endpoint)
            .bind(&record.token)
            .bind(&record.app_id)
            .bind(&record.public_key)
            .bind(&record.tenant_link_id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn reanchor_credential(&self, from: &str, to: &str) -> StoreResult<Option<CredentialRecord>> {
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT {} FROM credentials WHERE endpoint = $1 FOR UPDATE",
            CREDENTIAL_COLUMNS
        );
        let Some(existing) = sqlx::query_as::<_, CredentialRecord>(&select)
            .bind(from)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let upsert = format!(
            "INSERT INTO credentials (endpoint, token, app_id, public_key, tenant_link_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (endpoint) DO UPDATE SET
                token = EXCLUDED.token,
                app_id = EXCLUDED.app_id,
                public_key = EXCLUDED.public_key,
                tenant_link_id = EXCLUDED.tenant_link_id,
                updated_at = NOW()
             RETURNING {}",
            CREDENTIAL_COLUMNS
        );
        let moved = sqlx::query_as::<_, CredentialRecord>(&upsert)
            .bind(to)
            .bind(&existing.token)
            .bind(&existing.app_id)
            .bind(&existing.public_key)
            .bind(&existing.tenant_link_id)
            .bind(existing.created_at)
            .fetch_one(&mut *tx)
            .await?;

        if from != to {
            sqlx::query("DELETE FROM credentials WHERE endpoint = $1")
                .bind(from)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some(moved))
    }

    async fn delete_credential(&self, endpoint: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE endpoint = $1")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SiteStore for PgStore {
    async fn get_site(&self, id: Uuid) -> StoreResult<Option<Site>> {
        let sql = format!("SELECT {} FROM sites WHERE id = $1", SITE_COLUMNS);
        Ok(sqlx::query_as::<_, Site>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_site_by_domain(&self, domain: &str) -> StoreResult<Option<Site>> {
        let sql = format!("SELECT {} FROM sites WHERE domain = $1", SITE_COLUMNS);
        Ok(sqlx::query_as::<_, Site>(&sql)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_sites_by_ip(&self, ip: &str) -> StoreResult<Vec<Site>> {
        let sql = format!(
            "SELECT {} FROM sites WHERE client_ip = $1 ORDER BY updated_at DESC",
            SITE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Site>(&sql)
            .bind(ip)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_sites(&self, status: Option<SiteStatus>) -> StoreResult<Vec<Site>> {
        let sql = format!(
            "SELECT {} FROM sites WHERE ($1::varchar IS NULL OR status = $1) ORDER BY requested_at DESC",
            SITE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Site>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_site(&self, site: Site) -> StoreResult<Site> {
        let sql = format!(
            "INSERT INTO sites (id, domain, name, api_url, client_ip, status, requested_at,
                                approved_at, approved_by, notes, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
             RETURNING {}",
            SITE_COLUMNS
        );
        sqlx::query_as::<_, Site>(&sql)
            .bind(site.id)
            .bind(&site.domain)
            .bind(&site.name)
            .bind(&site.api_url)
            .bind(&site.client_ip)
            .bind(site.status)
            .bind(site.requested_at)
            .bind(site.approved_at)
            .bind(&site.approved_by)
            .bind(&site.notes)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, format!("site {}", site.domain)))
    }

    async fn update_site(&self, site: Site) -> StoreResult<Site> {
        let sql = format!(
            "UPDATE sites SET name = $2, api_url = $3, client_ip = $4, status = $5,
                approved_at = $6, approved_by = $7, notes = $8, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            SITE_COLUMNS
        );
        sqlx::query_as::<_, Site>(&sql)
            .bind(site.id)
            .bind(&site.name)
            .bind(&site.api_url)
            .bind(&site.client_ip)
            .bind(site.status)
            .bind(site.approved_at)
            .bind(&site.approved_by)
            .bind(&site.notes)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("site {}", site.id)))
    }

    async fn list_whitelist(&self) -> StoreResult<Vec<WhitelistEntry>> {
        Ok(sqlx::query_as::<_, WhitelistEntry>(
            "SELECT id, pattern, description, is_active, created_at
             FROM domain_whitelist
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_whitelist(&self, entry: WhitelistEntry) -> StoreResult<WhitelistEntry> {
        Ok(sqlx::query_as::<_, WhitelistEntry>(
            "INSERT INTO domain_whitelist (id, pattern, description, is_active, created_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, pattern, description, is_active, created_at",
        )
        .bind(entry.id)
        .bind(&entry.pattern)
        .bind(&entry.description)
        .bind(entry.is_active)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn set_whitelist_active(&self, id: Uuid, active: bool) -> StoreResult<WhitelistEntry> {
        sqlx::query_as::<_, WhitelistEntry>(
            "UPDATE domain_whitelist SET is_active = $2
             WHERE id = $1
             RETURNING id, pattern, description, is_active, created_at",
        )
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("whitelist entry {}", id)))
    }
}

#[async_trait]
impl GatewayStore for PgStore {
    async fn list_gateways(&self) -> StoreResult<Vec<Gateway>> {
        let sql = format!(
            "SELECT {} FROM gateways ORDER BY priority DESC, created_at ASC",
            GATEWAY_COLUMNS
        );
        Ok(sqlx::query_as::<_, Gateway>(&sql).fetch_all(&self.pool).await?)
    }

    async fn get_gateway(&self, id: Uuid) -> StoreResult<Option<Gateway>> {
        let sql = format!("SELECT {} FROM gateways WHERE id = $1", GATEWAY_COLUMNS);
        Ok(sqlx::query_as::<_, Gateway>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_gateways_by_merchant(&self, merchant_id: &str) -> StoreResult<Vec<Gateway>> {
        let sql = format!(
            "SELECT {} FROM gateways WHERE merchant_id = $1 ORDER BY priority DESC, created_at ASC",
            GATEWAY_COLUMNS
        );
        Ok(sqlx::query_as::<_, Gateway>(&sql)
            .bind(merchant_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_gateway(&self, gateway: Gateway) -> StoreResult<Gateway> {
        let sql = format!(
            "INSERT INTO gateways (id, name, merchant_id, secret_key, private_key, platform_public_key,
                                   base_url, api_version, sign_type, enabled, priority, is_global,
                                   allowed_users, return_url, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
             RETURNING {}",
            GATEWAY_COLUMNS
        );
        sqlx::query_as::<_, Gateway>(&sql)
            .bind(gateway.id)
            .bind(&gateway.name)
            .bind(&gateway.merchant_id)
            .bind(&gateway.secret_key)
            .bind(&gateway.private_key)
            .bind(&gateway.platform_public_key)
            .bind(&gateway.base_url)
            .bind(gateway.api_version)
            .bind(gateway.sign_type)
            .bind(gateway.enabled)
            .bind(gateway.priority)
            .bind(gateway.is_global)
            .bind(&gateway.allowed_users)
            .bind(&gateway.return_url)
            .bind(gateway.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, format!("gateway {}", gateway.id)))
    }

    async fn set_gateway_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Gateway> {
        let sql = format!(
            "UPDATE gateways SET enabled = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            GATEWAY_COLUMNS
        );
        sqlx::query_as::<_, Gateway>(&sql)
            .bind(id)
            .bind(enabled)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("gateway {}", id)))
    }

    async fn delete_gateway(&self, id: Uuid) -> StoreResult<bool> {
        // channels 通过外键级联删除
        let result = sqlx::query("DELETE FROM gateways WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        let sql = format!(
            "SELECT {} FROM channels ORDER BY priority DESC, created_at ASC",
            CHANNEL_COLUMNS
        );
        Ok(sqlx::query_as::<_, Channel>(&sql).fetch_all(&self.pool).await?)
    }

    async fn get_channel(&self, id: Uuid) -> StoreResult<Option<Channel>> {
        let sql = format!("SELECT {} FROM channels WHERE id = $1", CHANNEL_COLUMNS);
        Ok(sqlx::query_as::<_, Channel>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_channel(&self, channel: Channel) -> StoreResult<Channel> {
        let sql = format!(
            "INSERT INTO channels (id, name, channel_type, gateway_id, enabled, priority, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            CHANNEL_COLUMNS
        );
        sqlx::query_as::<_, Channel>(&sql)
            .bind(channel.id)
            .bind(&channel.name)
            .bind(&channel.channel_type)
            .bind(channel.gateway_id)
            .bind(channel.enabled)
            .bind(channel.priority)
            .bind(channel.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, format!("gateway {}", channel.gateway_id)))
    }

    async fn set_channel_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<Channel> {
        let sql = format!(
            "UPDATE channels SET enabled = $2 WHERE id = $1 RETURNING {}",
            CHANNEL_COLUMNS
        );
        sqlx::query_as::<_, Channel>(&sql)
            .bind(id)
            .bind(enabled)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("channel {}", id)))
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: NewOrderMapping) -> StoreResult<OrderMapping> {
        let sql = format!(
            "INSERT INTO order_mappings (order_no, order_hash, transaction_id, endpoint, gateway_id,
                                         amount, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', NOW(), NOW())
             RETURNING {}",
            ORDER_COLUMNS
        );
        sqlx::query_as::<_, OrderMapping>(&sql)
            .bind(&order.order_no)
            .bind(&order.order_hash)
            .bind(&order.transaction_id)
            .bind(&order.endpoint)
            .bind(order.gateway_id)
            .bind(order.amount)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, format!("order {}", order.order_no)))
    }

    async fn get_order(&self, order_no: &str) -> StoreResult<Option<OrderMapping>> {
        let sql = format!("SELECT {} FROM order_mappings WHERE order_no = $1", ORDER_COLUMNS);
        Ok(sqlx::query_as::<_, OrderMapping>(&sql)
            .bind(order_no)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_order_by_hash(&self, order_hash: &str) -> StoreResult<Option<OrderMapping>> {
        let sql = format!("SELECT {} FROM order_mappings WHERE order_hash = $1", ORDER_COLUMNS);
        Ok(sqlx::query_as::<_, OrderMapping>(&sql)
            .bind(order_hash)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn latest_order_for_transaction(&self, transaction_id: &str) -> StoreResult<Option<OrderMapping>> {
        let sql = format!(
            "SELECT {} FROM order_mappings WHERE transaction_id = $1 ORDER BY created_at DESC LIMIT 1",
            ORDER_COLUMNS
        );
        Ok(sqlx::query_as::<_, OrderMapping>(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn transition_order(&self, order_no: &str, to: OrderStatus) -> StoreResult<Transition> {
        let updated = sqlx::query(
            "UPDATE order_mappings SET status = $2, updated_at = NOW()
             WHERE order_no = $1 AND status = 'pending'",
        )
        .bind(order_no)
        .bind(to)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(Transition::Applied);
        }

        let current: Option<OrderStatus> =
            sqlx::query_scalar("SELECT status FROM order_mappings WHERE order_no = $1")
                .bind(order_no)
                .fetch_optional(&self.pool)
                .await?;

        current
            .map(Transition::Unchanged)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", order_no)))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
