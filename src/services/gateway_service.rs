// 网关与通道目录服务
// 负责为交易挑选可用网关，以及网关/通道的管理操作

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::models::{
    ActiveGateway, Channel, CreateChannelRequest, CreateGatewayRequest, Gateway, SignScheme,
};
use crate::storage::{Store, StoreError};
use crate::utils::{validate_merchant_id, InputValidator};

/// 网关目录
pub struct GatewayCatalog {
    store: Arc<dyn Store>,
}

impl GatewayCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// 解析当前可用的网关配置
    ///
    /// 指定通道时直接使用其网关，要求通道与网关都已启用；
    /// 未指定时取优先级最高、创建最早的已启用网关。
    pub async fn resolve_active_config(&self, channel_id: Option<Uuid>) -> Result<ActiveGateway, PaymentError> {
        if let Some(channel_id) = channel_id {
            let channel = self
                .store
                .get_channel(channel_id)
                .await?
                .ok_or_else(|| PaymentError::Configuration(format!("channel {} not found", channel_id)))?;
            if !channel.enabled {
                return Err(PaymentError::Configuration(format!("channel {} is disabled", channel.name)));
            }

            let gateway = self
                .store
                .get_gateway(channel.gateway_id)
                .await?
                .ok_or_else(|| {
                    PaymentError::Configuration(format!("gateway for channel {} not found", channel.name))
                })?;
            if !gateway.enabled {
                return Err(PaymentError::Configuration(format!(
                    "gateway {} for channel {} is disabled",
                    gateway.name, channel.name
                )));
            }

            return Ok(ActiveGateway {
                gateway,
                channel: Some(channel),
            });
        }

        let mut enabled: Vec<Gateway> = self
            .store
            .list_gateways()
            .await?
            .into_iter()
            .filter(|g| g.enabled)
            .collect();
        enabled.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        enabled
            .into_iter()
            .next()
            .map(|gateway| ActiveGateway { gateway, channel: None })
            .ok_or_else(|| PaymentError::Configuration("no enabled gateway configured".to_string()))
    }

    /// 请求方可见的网关
    ///
    /// # Arguments
    /// * `requester` - 请求方身份
    /// * `is_admin` - 管理员可见全部网关
    pub async fn accessible_gateways(&self, requester: Option<&str>, is_admin: bool) -> Result<Vec<Gateway>, StoreError> {
        Ok(self
            .store
            .list_gateways()
            .await?
            .into_iter()
            .filter(|g| g.is_accessible_to(requester, is_admin))
            .collect())
    }

    /// 按商户号查找网关，用于异步通知
    pub async fn find_gateway_by_merchant(&self, merchant_id: &str) -> Result<Option<Gateway>, StoreError> {
        let gateways = self.store.find_gateways_by_merchant(merchant_id).await?;
        // 同一商户号有多条时优先已启用的
        let preferred = gateways.iter().position(|g| g.enabled).unwrap_or(0);
        Ok(gateways.into_iter().nth(preferred))
    }

    pub async fn get_gateway(&self, id: Uuid) -> Result<Option<Gateway>, StoreError> {
        self.store.get_gateway(id).await
    }

    /// 校验网关配置
    ///
    /// 签名方式必须与接口版本一致 (v1 对应 MD5，v2 对应 RSA)，除非显式覆盖。
    pub fn validate(request: &CreateGatewayRequest) -> Result<SignScheme, PaymentError> {
        let scheme = request
            .sign_type
            .unwrap_or_else(|| request.api_version.expected_scheme());

        let mut validator = InputValidator::new();
        validator.validate_required("name", &request.name);
        validator.validate_length("name", &request.name, 1, 255);
        validator.check("merchant_id", validate_merchant_id(&request.merchant_id));
        validator.validate_required("base_url", &request.base_url);
        validator.validate_url_field("base_url", &request.base_url);
        if let Some(return_url) = &request.return_url {
            validator.validate_url_field("return_url", return_url);
        }

        if scheme != request.api_version.expected_scheme() && !request.sign_override {
            validator.add_error(
                "sign_type",
                &format!(
                    "{:?} does not match api version {:?} (set sign_override to force)",
                    scheme, request.api_version
                ),
            );
        }

        let has_key = |k: &Option<String>| k.as_deref().map_or(false, |v| !v.trim().is_empty());
        match scheme {
            SignScheme::Md5 if !has_key(&request.secret_key) => {
                validator.add_error("secret_key", "MD5 signing requires secret_key")
            }
            SignScheme::Rsa if !has_key(&request.private_key) => {
                validator.add_error("private_key", "RSA signing requires private_key")
            }
            _ => {}
        }

        validator
            .into_result()
            .map_err(|e| PaymentError::Validation(e.to_string()))?;
        Ok(scheme)
    }

    /// 创建网关
    pub async fn create_gateway(&self, request: CreateGatewayRequest) -> Result<Gateway, PaymentError> {
        let sign_type = Self::validate(&request)?;
        let now = Utc::now();
        let gateway = Gateway {
            id: Uuid::new_v4(),
            name: request.name,
            merchant_id: request.merchant_id,
            secret_key: request.secret_key,
            private_key: request.private_key,
            platform_public_key: request.platform_public_key,
            base_url: request.base_url.trim_end_matches('/').to_string(),
            api_version: request.api_version,
            sign_type,
            enabled: true,
            priority: request.priority,
            is_global: request.is_global,
            allowed_users: request.allowed_users,
            return_url: request.return_url,
            created_at: now,
            updated_at: now,
        };

        let gateway = self.store.insert_gateway(gateway).await?;
        log::info!("Gateway created: {} ({:?}/{:?})", gateway.name, gateway.api_version, gateway.sign_type);
        Ok(gateway)
    }

    pub async fn set_gateway_enabled(&self, id: Uuid, enabled: bool) -> Result<Gateway, StoreError> {
        let gateway = self.store.set_gateway_enabled(id, enabled).await?;
        log::info!("Gateway {} enabled={}", gateway.name, enabled);
        Ok(gateway)
    }

    /// 删除网关，通道级联删除
    pub async fn delete_gateway(&self, id: Uuid) -> Result<(), StoreError> {
        if self.store.delete_gateway(id).await? {
            log::info!("Gateway {} deleted with its channels", id);
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("gateway {}", id)))
        }
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>, StoreError> {
        self.store.list_channels().await
    }

    pub async fn create_channel(&self, request: CreateChannelRequest) -> Result<Channel, PaymentError> {
        let mut validator = InputValidator::new();
        validator.validate_required("name", &request.name);
        validator.validate_required("channel_type", &request.channel_type);
        validator.validate_length("channel_type", &request.channel_type, 1, 64);
        validator
            .into_result()
            .map_err(|e| PaymentError::Validation(e.to_string()))?;

        let channel = Channel {
            id: Uuid::new_v4(),
            name: request.name,
            channel_type: request.channel_type.trim().to_string(),
            gateway_id: request.gateway_id,
            enabled: true,
            priority: request.priority,
            created_at: Utc::now(),
        };
        Ok(self.store.insert_channel(channel).await?)
    }

    pub async fn set_channel_enabled(&self, id: Uuid, enabled: bool) -> Result<Channel, StoreError> {
        self.store.set_channel_enabled(id, enabled).await
    }
}
