// 网关与支付通道数据模型
// 网关保存易支付商户凭证，通道把支付方式绑定到某个网关

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// 易支付接口版本
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// 旧版接口 (mapi.php / api.php)
    V1,
    /// 新版接口 (api/pay/*)
    V2,
}

impl ApiVersion {
    /// 接口版本默认对应的签名方式
    pub fn expected_scheme(self) -> SignScheme {
        match self {
            ApiVersion::V1 => SignScheme::Md5,
            ApiVersion::V2 => SignScheme::Rsa,
        }
    }

    /// 下单成功时处理器返回的状态码
    pub fn success_code(self) -> i64 {
        match self {
            ApiVersion::V1 => 1,
            ApiVersion::V2 => 0,
        }
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        ApiVersion::V1
    }
}

/// 签名方式
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SignScheme {
    Md5,
    Rsa,
}

impl SignScheme {
    /// 报文中 sign_type 字段的取值
    pub fn wire_name(self) -> &'static str {
        match self {
            SignScheme::Md5 => "MD5",
            SignScheme::Rsa => "RSA",
        }
    }
}

impl Default for SignScheme {
    fn default() -> Self {
        SignScheme::Md5
    }
}

/// 网关凭证集合
#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct Gateway {
    /// 网关唯一标识符
    pub id: Uuid,
    /// 网关名称
    pub name: String,
    /// 易支付商户号 (pid)
    pub merchant_id: String,
    /// MD5 通信密钥 (不在API响应中返回)
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// RSA 商户私钥 (不在API响应中返回)
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    /// RSA 平台公钥，用于验证回调签名
    pub platform_public_key: Option<String>,
    /// 易支付接口地址
    pub base_url: String,
    pub api_version: ApiVersion,
    pub sign_type: SignScheme,
    pub enabled: bool,
    /// 优先级，数值越大越优先
    pub priority: i32,
    /// 是否对所有请求方开放
    pub is_global: bool,
    /// 非全局网关的允许请求方列表
    pub allowed_users: Vec<String>,
    /// 支付完成后跳转地址
    pub return_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Gateway {
    /// 发起请求时使用的签名密钥
    pub fn signing_key(&self) -> Option<&str> {
        match self.sign_type {
            SignScheme::Md5 => self.secret_key.as_deref(),
            SignScheme::Rsa => self.private_key.as_deref(),
        }
    }

    /// 验证回调签名使用的密钥
    pub fn verifying_key(&self) -> Option<&str> {
        match self.sign_type {
            SignScheme::Md5 => self.secret_key.as_deref(),
            SignScheme::Rsa => self.platform_public_key.as_deref(),
        }
    }

    /// 判断请求方是否可以使用该网关
    ///
    /// # Arguments
    /// * `requester` - 请求方身份
    /// * `is_admin` - 是否管理员
    pub fn is_accessible_to(&self, requester: Option<&str>, is_admin: bool) -> bool {
        if is_admin || self.is_global {
            return true;
        }
        match requester {
            Some(who) => self.allowed_users.iter().any(|u| u == who),
            None => false,
        }
    }
}

// 密钥字段不能出现在日志里
impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("merchant_id", &self.merchant_id)
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("sign_type", &self.sign_type)
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .field("is_global", &self.is_global)
            .finish_non_exhaustive()
    }
}

/// 支付通道
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Channel {
    pub id: Uuid,
    /// 通道名称
    pub name: String,
    /// 支付方式 (alipay / wxpay / 自定义)
    pub channel_type: String,
    /// 关联网关
    pub gateway_id: Uuid,
    pub enabled: bool,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

/// 创建网关请求
#[derive(Debug, Deserialize)]
pub struct CreateGatewayRequest {
    pub name: String,
    pub merchant_id: String,
    pub secret_key: Option<String>,
    pub private_key: Option<String>,
    pub platform_public_key: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_version: ApiVersion,
    /// 未提供时按接口版本推导
    pub sign_type: Option<SignScheme>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_global: bool,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    pub return_url: Option<String>,
    /// 允许签名方式与接口版本不一致
    #[serde(default)]
    pub sign_override: bool,
}

/// 创建通道请求
#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub channel_type: String,
    pub gateway_id: Uuid,
    #[serde(default)]
    pub priority: i32,
}

/// 启用/停用请求
#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

/// 当前请求可用的网关配置
#[derive(Debug, Clone)]
pub struct ActiveGateway {
    pub gateway: Gateway,
    /// 显式指定通道时的通道信息
    pub channel: Option<Channel>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
pub(crate) fn sample_gateway(name: &str, priority: i32) -> Gateway {
    let now = Utc::now();
    Gateway {
        id: Uuid::new_v4(),
        name: name.to_string(),
        merchant_id: "m".to_string(),
        secret_key: Some("k".to_string()),
        private_key: None,
        platform_public_key: None,
        base_url: "https://pay.example.net".to_string(),
        api_version: ApiVersion::V1,
        sign_type: SignScheme::Md5,
        enabled: true,
        priority,
        is_global: true,
        allowed_users: Vec::new(),
        return_url: None,
        created_at: now,
        updated_at: now,
    }
}
