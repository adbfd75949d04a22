// 站点注册与授权服务
// 维护站点状态机，所有交易前先经过这里的授权检查

use chrono::Utc;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::models::{
    CreateWhitelistRequest, RegisterSiteRequest, RequestContext, Site, SiteAction,
    SiteActionRequest, SiteStatus, WhitelistEntry,
};
use crate::storage::{Store, StoreError};
use crate::utils::validate_whitelist_pattern;

/// 站点注册表
pub struct SiteRegistry {
    store: Arc<dyn Store>,
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

impl SiteRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// 注册站点 (安装回调)
    ///
    /// 同一域名重复注册不会报错，只更新名称、API地址和客户端地址，状态保持不变。
    pub async fn register(&self, request: RegisterSiteRequest) -> Result<Site, PaymentError> {
        let domain = normalize_domain(&request.domain);
        if domain.is_empty() {
            return Err(PaymentError::Validation("domain is required".to_string()));
        }

        if let Some(existing) = self.store.find_site_by_domain(&domain).await? {
            return Ok(self.refresh(existing, request).await?);
        }

        let mut site = Site::new(domain.clone());
        site.name = request.name.clone();
        site.api_url = request.api_url.clone();
        site.client_ip = request.client_ip.clone();

        match self.store.insert_site(site).await {
            Ok(site) => {
                log::info!("Site registered: {} (pending approval)", site.domain);
                Ok(site)
            }
            // 并发注册时另一方已写入
            Err(StoreError::Conflict(_)) => {
                let existing = self
                    .store
                    .find_site_by_domain(&domain)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("site {}", domain)))?;
                Ok(self.refresh(existing, request).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(&self, mut site: Site, request: RegisterSiteRequest) -> Result<Site, StoreError> {
        if request.name.is_some() {
            site.name = request.name;
        }
        if request.api_url.is_some() {
            site.api_url = request.api_url;
        }
        if request.client_ip.is_some() {
            site.client_ip = request.client_ip;
        }
        log::info!("Site re-registered: {} (status {:?} kept)", site.domain, site.status);
        self.store.update_site(site).await
    }

    /// 执行管理员状态操作
    ///
    /// # Arguments
    /// * `id` - 站点ID
    /// * `action` - 操作
    /// * `request` - 操作人与备注
    ///
    /// # Returns
    /// * 非法迁移返回 Conflict
    pub async fn transition(
        &self,
        id: Uuid,
        action: SiteAction,
        request: SiteActionRequest,
    ) -> Result<Site, StoreError> {
        let mut site = self
            .store
            .get_site(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("site {}", id)))?;

        let next = site.status.apply(action).ok_or_else(|| {
            StoreError::Conflict(format!(
                "transition {:?} from {:?} for site {}",
                action, site.status, site.domain
            ))
        })?;

        site.status = next;
        if next == SiteStatus::Approved {
            site.approved_at = Some(Utc::now());
            site.approved_by = request.operator;
        }
        if request.notes.is_some() {
            site.notes = request.notes;
        }

        let site = self.store.update_site(site).await?;
        log::info!("Site {} moved to {:?} via {:?}", site.domain, site.status, action);
        Ok(site)
    }

    /// 更新备注
    pub async fn update_notes(&self, id: Uuid, notes: Option<String>) -> Result<Site, StoreError> {
        let mut site = self
            .store
            .get_site(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("site {}", id)))?;
        site.notes = notes;
        self.store.update_site(site).await
    }

    pub async fn list(&self, status: Option<SiteStatus>) -> Result<Vec<Site>, StoreError> {
        self.store.list_sites(status).await
    }

    /// 站点是否已获批准
    ///
    /// 域名有记录时以该记录状态为准；没有域名记录时按客户端地址查找。
    pub async fn is_authorized(&self, domain: Option<&str>, client_ip: Option<&str>) -> Result<bool, StoreError> {
        if let Some(domain) = domain.map(normalize_domain).filter(|d| !d.is_empty()) {
            if let Some(site) = self.store.find_site_by_domain(&domain).await? {
                return Ok(site.is_approved());
            }
        }

        if let Some(ip) = client_ip.filter(|ip| !ip.is_empty()) {
            let sites = self.store.find_sites_by_ip(ip).await?;
            return Ok(sites.iter().any(Site::is_approved));
        }

        Ok(false)
    }

    /// 白名单检查
    ///
    /// 没有启用的规则时全部放行；否则域名或客户端地址需匹配至少一条规则。
    pub async fn check_whitelist(&self, domain: Option<&str>, client_ip: Option<&str>) -> Result<bool, StoreError> {
        let active: Vec<WhitelistEntry> = self
            .store
            .list_whitelist()
            .await?
            .into_iter()
            .filter(|e| e.is_active)
            .collect();

        if active.is_empty() {
            return Ok(true);
        }

        let candidates: Vec<String> = domain
            .map(normalize_domain)
            .into_iter()
            .chain(client_ip.map(str::to_string))
            .filter(|c| !c.is_empty())
            .collect();

        for entry in &active {
            let pattern = match Regex::new(&entry.pattern) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("Skipping invalid whitelist pattern {}: {}", entry.pattern, e);
                    continue;
                }
            };
            if candidates.iter().any(|c| pattern.is_match(c)) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// 交易前的授权闸门
    pub async fn gate(&self, ctx: &RequestContext) -> Result<(), PaymentError> {
        let domain = ctx.domain.as_deref();
        let ip = ctx.client_ip.as_deref();

        if !self.check_whitelist(domain, ip).await? {
            log::warn!("Whitelist rejected site {} ({})", domain.unwrap_or("<unknown>"), ip.unwrap_or("-"));
            return Err(PaymentError::Authorization(format!(
                "site {} is not whitelisted",
                domain.unwrap_or("<unknown>")
            )));
        }

        if !self.is_authorized(domain, ip).await? {
            log::warn!("Unapproved site attempted a transaction: {}", domain.unwrap_or("<unknown>"));
            return Err(PaymentError::Authorization(format!(
                "site {} is not approved",
                domain.unwrap_or("<unknown>")
            )));
        }

        Ok(())
    }

    pub async fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>, StoreError> {
        self.store.list_whitelist().await
    }

    /// 添加白名单规则，插入前校验正则
    pub async fn add_whitelist(&self, request: CreateWhitelistRequest) -> Result<WhitelistEntry, PaymentError> {
        validate_whitelist_pattern(&request.pattern).map_err(|e| PaymentError::Validation(e.to_string()))?;
        let entry = WhitelistEntry {
            id: Uuid::new_v4(),
            pattern: request.pattern,
            description: request.description,
            is_active: true,
            created_at: Utc::now(),
        };
        Ok(self.store.insert_whitelist(entry).await?)
    }

    pub async fn toggle_whitelist(&self, id: Uuid, active: bool) -> Result<WhitelistEntry, StoreError> {
        self.store.set_whitelist_active(id, active).await
    }
}
