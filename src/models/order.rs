// 订单映射数据模型

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 订单号与平台交易的对应记录
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct OrderMapping {
    /// 提交给易支付的完整订单号 (out_trade_no)
    pub order_no: String,
    /// 订单号摘要的前8位
    pub order_hash: String,
    /// 平台交易ID
    pub transaction_id: String,
    /// 发起交易的平台端点
    pub endpoint: String,
    /// 下单时使用的网关
    pub gateway_id: Option<Uuid>,
    /// 下单金额
    pub amount: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 订单状态
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
        }
    }
}

/// 比较并设置状态的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 本次调用完成了 pending -> 目标状态
    Applied,
    /// 订单已是终态，未做修改
    Unchanged(OrderStatus),
}

/// 新订单映射
#[derive(Debug, Clone)]
pub struct NewOrderMapping {
    pub order_no: String,
    pub order_hash: String,
    pub transaction_id: String,
    pub endpoint: String,
    pub gateway_id: Option<Uuid>,
    pub amount: Decimal,
}

impl NewOrderMapping {
    pub fn into_mapping(self) -> OrderMapping {
        let now = Utc::now();
        OrderMapping {
            order_no: self.order_no,
            order_hash: self.order_hash,
            transaction_id: self.transaction_id,
            endpoint: self.endpoint,
            gateway_id: self.gateway_id,
            amount: self.amount,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
