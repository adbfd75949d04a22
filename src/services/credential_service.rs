// 平台凭证解析服务
// 根据请求声明的端点和令牌找到凭证，端点漂移时把凭证迁移到真实端点

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::PaymentError;
use crate::models::{CredentialRecord, MatchStrategy, ResolvedCredential, UpsertCredentialRequest};
use crate::storage::{Store, StoreError};
use crate::utils::{constant_time_eq, host_of};

type SharedLookup = Shared<BoxFuture<'static, Result<Option<CredentialRecord>, String>>>;

/// 凭证解析器
pub struct CredentialResolver {
    store: Arc<dyn Store>,
    placeholder_markers: Vec<String>,
    /// 同一端点的并发查询合并为一次存储访问
    inflight: Mutex<HashMap<String, SharedLookup>>,
    /// 端点级临界区，保证写入与删除不交错
    endpoint_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CredentialResolver {
    /// 创建凭证解析器
    ///
    /// # Arguments
    /// * `store` - 存储接口
    /// * `placeholder_markers` - 安装阶段占位端点包含的标记
    pub fn new(store: Arc<dyn Store>, placeholder_markers: Vec<String>) -> Self {
        Self {
            store,
            placeholder_markers: placeholder_markers
                .into_iter()
                .map(|m| m.trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            inflight: Mutex::new(HashMap::new()),
            endpoint_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 解析凭证
    ///
    /// 先按端点精确匹配，未命中时依次尝试令牌、主机名、占位端点。
    /// 命中的凭证必须通过认证：令牌与存储的令牌一致，或请求已通过平台签名校验。
    /// 通过回退策略命中且请求声明了端点时，认证通过后凭证才会被迁移到声明的端点。
    ///
    /// # Arguments
    /// * `endpoint_hint` - 请求声明的平台端点
    /// * `token` - 请求携带的平台令牌 (仅作查询键和比对)
    /// * `signature_verified` - 请求是否已通过平台 webhook 签名校验
    pub async fn resolve(
        &self,
        endpoint_hint: Option<&str>,
        token: Option<&str>,
        signature_verified: bool,
    ) -> Result<ResolvedCredential, PaymentError> {
        let token = token.filter(|t| !t.is_empty());

        let exact = match endpoint_hint {
            Some(hint) => self.fetch_exact(hint).await?,
            None => None,
        };
        if let Some(record) = exact {
            Self::authenticate(&record, token, signature_verified)?;
            return Ok(ResolvedCredential {
                record,
                matched_by: MatchStrategy::Endpoint,
            });
        }

        let Some((record, strategy)) = self.find_fallback(endpoint_hint, token).await? else {
            log::warn!(
                "No credential found for endpoint {}",
                endpoint_hint.unwrap_or("<none>")
            );
            return Err(PaymentError::Configuration(format!(
                "no credential registered for endpoint {}",
                endpoint_hint.unwrap_or("<none>")
            )));
        };
        Self::authenticate(&record, token, signature_verified)?;

        let record = match endpoint_hint {
            Some(hint) if hint != record.endpoint => {
                log::info!(
                    "Credential drift detected ({:?}): re-anchoring {} -> {}",
                    strategy,
                    record.endpoint,
                    hint
                );
                let moved = self.reanchor(&record.endpoint, hint).await?;
                moved.unwrap_or(record)
            }
            _ => record,
        };

        Ok(ResolvedCredential {
            record,
            matched_by: strategy,
        })
    }

    // 令牌只是查询键，真实性来自与存储令牌的比对或平台签名
    fn authenticate(
        record: &CredentialRecord,
        token: Option<&str>,
        signature_verified: bool,
    ) -> Result<(), PaymentError> {
        if token.map_or(false, |t| constant_time_eq(t, &record.token)) || signature_verified {
            return Ok(());
        }
        let reason = if token.is_some() {
            "presented platform token does not match"
        } else {
            "no platform token presented"
        };
        log::warn!("Credential check failed for endpoint {}: {}", record.endpoint, reason);
        Err(PaymentError::Authorization(reason.to_string()))
    }

    async fn find_fallback(
        &self,
        endpoint_hint: Option<&str>,
        token: Option<&str>,
    ) -> Result<Option<(CredentialRecord, MatchStrategy)>, StoreError> {
        if let Some(token) = token {
            if let Some(record) = self.store.find_credential_by_token(token).await? {
                return Ok(Some((record, MatchStrategy::Token)));
            }
        }

        let all = self.store.list_credentials().await?;

        if let Some(host) = endpoint_hint.and_then(host_of) {
            if let Some(record) = all
                .iter()
                .find(|c| host_of(&c.endpoint).as_deref() == Some(host.as_str()))
            {
                return Ok(Some((record.clone(), MatchStrategy::Hostname)));
            }
        }

        let placeholder = all
            .into_iter()
            .filter(|c| self.is_placeholder(&c.endpoint))
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(placeholder.map(|record| (record, MatchStrategy::Placeholder)))
    }

    /// 只按端点精确查找，不做漂移修正
    pub async fn lookup(&self, endpoint: &str) -> Result<Option<CredentialRecord>, PaymentError> {
        Ok(self.fetch_exact(endpoint).await?)
    }

    /// 端点是否为安装阶段的占位地址
    pub fn is_placeholder(&self, endpoint: &str) -> bool {
        let endpoint = endpoint.to_ascii_lowercase();
        self.placeholder_markers.iter().any(|m| endpoint.contains(m.as_str()))
    }

    async fn fetch_exact(&self, endpoint: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let lookup = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(endpoint) {
                Some(existing) => existing.clone(),
                None => {
                    let store = Arc::clone(&self.store);
                    let key = endpoint.to_string();
                    let lookup = async move {
                        store.get_credential(&key).await.map_err(|e| e.to_string())
                    }
                    .boxed()
                    .shared();
                    inflight.insert(endpoint.to_string(), lookup.clone());
                    lookup
                }
            }
        };

        let result = lookup.await;

        {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            if inflight.get(endpoint).map_or(false, |f| f.peek().is_some()) {
                inflight.remove(endpoint);
            }
        }

        result.map_err(StoreError::Backend)
    }

    // 按字典序加锁，避免两个迁移操作互相等待
    async fn lock_endpoints(&self, endpoints: &[&str]) -> Vec<OwnedMutexGuard<()>> {
        let mut keys: Vec<&str> = endpoints.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let locks: Vec<Arc<AsyncMutex<()>>> = {
            let mut map = self.endpoint_locks.lock().unwrap_or_else(PoisonError::into_inner);
            keys.iter()
                .map(|k| Arc::clone(map.entry(k.to_string()).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks {
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    fn release(&self, guards: Vec<OwnedMutexGuard<()>>) {
        drop(guards);
        let mut map = self.endpoint_locks.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    async fn reanchor(&self, from: &str, to: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let guards = self.lock_endpoints(&[from, to]).await;
        let result = self.store.reanchor_credential(from, to).await;
        self.release(guards);
        result
    }

    /// 写入或轮换令牌
    pub async fn rotate(&self, request: UpsertCredentialRequest) -> Result<CredentialRecord, PaymentError> {
        if request.endpoint.trim().is_empty() || request.token.trim().is_empty() {
            return Err(PaymentError::Validation("endpoint and token are required".to_string()));
        }
        let mut record = CredentialRecord::new(request.endpoint, request.token, request.app_id);
        record.public_key = request.public_key;
        record.tenant_link_id = request.tenant_link_id;

        let guards = self.lock_endpoints(&[record.endpoint.as_str()]).await;
        let result = self.store.upsert_credential(record).await;
        self.release(guards);

        let record = result?;
        log::info!("Credential stored for endpoint {}", record.endpoint);
        Ok(record)
    }

    /// 把凭证从旧端点迁移到新端点，可重复执行
    pub async fn reconcile(&self, from: &str, to: &str) -> Result<CredentialRecord, PaymentError> {
        if let Some(record) = self.reanchor(from, to).await? {
            log::info!("Credential reconciled {} -> {}", from, to);
            return Ok(record);
        }
        // 旧端点已不存在时，目标端点有记录即视为已完成
        self.store
            .get_credential(to)
            .await?
            .ok_or_else(|| PaymentError::Configuration(format!("no credential registered for endpoint {}", from)))
    }

    /// 显式删除凭证
    pub async fn reset(&self, endpoint: &str) -> Result<bool, PaymentError> {
        let guards = self.lock_endpoints(&[endpoint]).await;
        let result = self.store.delete_credential(endpoint).await;
        self.release(guards);
        let removed = result?;
        if removed {
            log::warn!("Credential reset for endpoint {}", endpoint);
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<CredentialRecord>, PaymentError> {
        Ok(self.store.list_credentials().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CredentialStore, MemoryStore};

    const A: &str = "https://shop-a.test/graphql/";
    const B: &str = "https://proxy-b.test/graphql/";

    fn resolver(store: Arc<MemoryStore>) -> CredentialResolver {
        CredentialResolver::new(store, vec!["localhost".to_string(), "placeholder".to_string()])
    }

    #[tokio::test]
    async fn test_exact_endpoint_match() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_credential(CredentialRecord::new(A, "tok-a", "app")).await.unwrap();

        let resolved = resolver(store).resolve(Some(A), Some("tok-a"), false).await.unwrap();
        assert_eq!(resolved.matched_by, MatchStrategy::Endpoint);
        assert_eq!(resolved.record.token, "tok-a");
    }

    #[tokio::test]
    async fn test_token_drift_recovery() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_credential(CredentialRecord::new(A, "tok-a", "app")).await.unwrap();
        let resolver = resolver(store.clone());

        let resolved = resolver.resolve(Some(B), Some("tok-a"), false).await.unwrap();
        assert_eq!(resolved.matched_by, MatchStrategy::Token);
        assert_eq!(resolved.record.token, "tok-a");
        assert_eq!(resolved.record.endpoint, B);

        // 迁移后直接命中新端点
        let again = resolver.resolve(Some(B), Some("tok-a"), false).await.unwrap();
        assert_eq!(again.matched_by, MatchStrategy::Endpoint);
        assert!(store.get_credential(A).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exact_match_requires_stored_token_or_signature() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_credential(CredentialRecord::new(A, "tok-a", "app")).await.unwrap();
        let resolver = resolver(store);

        let err = resolver.resolve(Some(A), Some("forged-token"), false).await.unwrap_err();
        assert!(matches!(err, PaymentError::Authorization(_)));
        let err = resolver.resolve(Some(A), None, false).await.unwrap_err();
        assert!(matches!(err, PaymentError::Authorization(_)));

        // 已通过平台签名的请求不依赖令牌
        let resolved = resolver.resolve(Some(A), None, true).await.unwrap();
        assert_eq!(resolved.matched_by, MatchStrategy::Endpoint);
    }

    #[tokio::test]
    async fn test_unauthenticated_fallback_does_not_reanchor() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_credential(CredentialRecord::new(A, "tok-a", "app")).await.unwrap();

        let err = resolver(store.clone())
            .resolve(Some("http://shop-a.test/other/graphql/"), Some("forged-token"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Authorization(_)));
        assert!(store.get_credential(A).await.unwrap().is_some());
        assert!(store.get_credential("http://shop-a.test/other/graphql/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hostname_fallback() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_credential(CredentialRecord::new(A, "tok-a", "app")).await.unwrap();

        let resolved = resolver(store)
            .resolve(Some("http://shop-a.test/other/graphql/"), None, true)
            .await
            .unwrap();
        assert_eq!(resolved.matched_by, MatchStrategy::Hostname);
        assert_eq!(resolved.record.endpoint, "http://shop-a.test/other/graphql/");
    }

    #[tokio::test]
    async fn test_placeholder_fallback() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_credential(CredentialRecord::new("http://localhost:8000/graphql/", "tok", "app"))
            .await
            .unwrap();

        let resolved = resolver(store).resolve(Some(A), Some("other"), true).await.unwrap();
        assert_eq!(resolved.matched_by, MatchStrategy::Placeholder);
        assert_eq!(resolved.record.endpoint, A);
    }

    #[tokio::test]
    async fn test_missing_credential_is_configuration_error() {
        let store = Arc::new(MemoryStore::new());
        let err = resolver(store).resolve(Some(A), Some("nope"), false).await.unwrap_err();
        assert!(matches!(err, PaymentError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_credential(CredentialRecord::new(A, "tok-a", "app")).await.unwrap();
        let resolver = resolver(store);

        let first = resolver.reconcile(A, B).await.unwrap();
        let second = resolver.reconcile(A, B).await.unwrap();
        assert_eq!(first.endpoint, B);
        assert_eq!(second.endpoint, B);
        assert!(resolver.reconcile("https://none.test/", "https://none2.test/").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_rotations_serialize() {
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(resolver(store.clone()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver
                    .rotate(UpsertCredentialRequest {
                        endpoint: A.to_string(),
                        token: format!("tok-{}", i),
                        app_id: "app".to_string(),
                        public_key: None,
                        tenant_link_id: None,
                    })
                    .await
                    .unwrap();
                resolver.resolve(Some(A), None, true).await.unwrap()
            }));
        }
        for handle in handles {
            let resolved = handle.await.unwrap();
            assert_eq!(resolved.matched_by, MatchStrategy::Endpoint);
        }
        assert_eq!(store.list_credentials().await.unwrap().len(), 1);
        assert!(resolver.endpoint_locks.lock().unwrap().is_empty());
    }
}
