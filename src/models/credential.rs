// 平台凭证数据模型
// 每个租户端点对应一条访问令牌记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// 平台凭证记录，以端点URL为自然键
#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct CredentialRecord {
    /// 平台API端点 (自然键)
    pub endpoint: String,
    /// 平台访问令牌 (不在API响应中返回)
    #[serde(skip_serializing)]
    pub token: String,
    /// 平台应用标识
    pub app_id: String,
    /// 公钥材料 (可选)
    pub public_key: Option<String>,
    /// 租户关联ID (可选)
    pub tenant_link_id: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>, app_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            app_id: app_id.into(),
            public_key: None,
            tenant_link_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// 令牌属于敏感信息，调试输出时屏蔽
impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("public_key", &self.public_key.as_ref().map(|_| "<present>"))
            .field("tenant_link_id", &self.tenant_link_id)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// 凭证命中方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// 端点精确匹配
    Endpoint,
    /// 令牌匹配
    Token,
    /// 主机名匹配
    Hostname,
    /// 安装占位端点匹配
    Placeholder,
}

impl MatchStrategy {
    /// 是否经过了漂移修正
    pub fn is_fallback(&self) -> bool {
        !matches!(self, MatchStrategy::Endpoint)
    }
}

/// 解析结果
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedCredential {
    pub record: CredentialRecord,
    pub matched_by: MatchStrategy,
}

/// 凭证写入请求 (安装或令牌轮换)
#[derive(Debug, Deserialize)]
pub struct UpsertCredentialRequest {
    pub endpoint: String,
    pub token: String,
    pub app_id: String,
    pub public_key: Option<String>,
    pub tenant_link_id: Option<String>,
}

/// 端点修正请求
#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    /// 旧端点
    pub from: String,
    /// 新端点
    pub to: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_token() {
        let record = CredentialRecord::new("https://shop.example.com/graphql/", "secret-token", "app");
        let output = format!("{:?}", record);
        assert!(!output.contains("secret-token"));
        assert!(output.contains("<redacted>"));
    }

    #[test]
    fn test_token_not_serialized() {
        let record = CredentialRecord::new("https://shop.example.com/graphql/", "secret-token", "app");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("secret-token"));
    }
}
