// 站点数据模型
// 定义站点生命周期状态机与域名白名单

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 站点信息模型
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Site {
    /// 站点唯一标识符
    pub id: Uuid,
    /// 站点域名 (全局唯一)
    pub domain: String,
    /// 显示名称
    pub name: Option<String>,
    /// 平台API地址
    pub api_url: Option<String>,
    /// 安装时的客户端地址
    pub client_ip: Option<String>,
    /// 站点状态
    pub status: SiteStatus,
    /// 申请时间
    pub requested_at: DateTime<Utc>,
    /// 审批时间
    pub approved_at: Option<DateTime<Utc>>,
    /// 审批人
    pub approved_by: Option<String>,
    /// 备注
    pub notes: Option<String>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl Site {
    pub fn new(domain: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            name: None,
            api_url: None,
            client_ip: None,
            status: SiteStatus::Pending,
            requested_at: now,
            approved_at: None,
            approved_by: None,
            notes: None,
            updated_at: now,
        }
    }

    /// 只有已批准的站点才能发起交易
    pub fn is_approved(&self) -> bool {
        self.status == SiteStatus::Approved
    }
}

/// 站点状态枚举
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// 待审批
    Pending,
    /// 已批准
    Approved,
    /// 已拒绝
    Rejected,
    /// 已暂停
    Suspended,
}

impl Default for SiteStatus {
    fn default() -> Self {
        SiteStatus::Pending
    }
}

/// 管理员对站点执行的操作
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SiteAction {
    Approve,
    Reject,
    Suspend,
    Restore,
}

impl SiteStatus {
    /// 计算状态迁移，非法迁移返回 None
    pub fn apply(self, action: SiteAction) -> Option<SiteStatus> {
        match (self, action) {
            (SiteStatus::Pending, SiteAction::Approve) => Some(SiteStatus::Approved),
            (SiteStatus::Pending, SiteAction::Reject) => Some(SiteStatus::Rejected),
            (SiteStatus::Approved, SiteAction::Suspend) => Some(SiteStatus::Suspended),
            (SiteStatus::Rejected | SiteStatus::Suspended, SiteAction::Restore) => {
                Some(SiteStatus::Approved)
            }
            _ => None,
        }
    }
}

/// 站点注册请求 (安装回调)
#[derive(Debug, Deserialize)]
pub struct RegisterSiteRequest {
    pub domain: String,
    pub name: Option<String>,
    pub api_url: Option<String>,
    pub client_ip: Option<String>,
}

/// 站点状态操作请求
#[derive(Debug, Default, Deserialize)]
pub struct SiteActionRequest {
    /// 操作人 (未提供时使用请求方身份)
    pub operator: Option<String>,
    /// 备注
    pub notes: Option<String>,
}

/// 域名白名单条目
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct WhitelistEntry {
    pub id: Uuid,
    /// 正则表达式
    pub pattern: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// 添加白名单请求
#[derive(Debug, Deserialize)]
pub struct CreateWhitelistRequest {
    pub pattern: String,
    pub description: Option<String>,
}
