// 订单关联服务
// 生成短订单号并维护订单号与平台交易的对应关系

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{NewOrderMapping, OrderMapping, OrderStatus, Transition};
use crate::storage::{Store, StoreError};
use crate::utils::{random_alphanumeric, short_hash};

const ORDER_PREFIX: &str = "ORDER";
const MAX_INSERT_ATTEMPTS: usize = 3;

/// 生成订单号 `ORDER-<秒级时间戳>-<6位随机>-<后缀>`
///
/// 交易ID为纯字母数字且总长度不超过上限时直接作为后缀，
/// 否则使用交易ID的摘要前8位。
pub fn generate_order_no(transaction_id: &str, timestamp: i64, max_len: usize) -> String {
    let prefix = format!("{}-{}-{}", ORDER_PREFIX, timestamp, random_alphanumeric(6));
    let embeddable = !transaction_id.is_empty()
        && transaction_id.chars().all(|c| c.is_ascii_alphanumeric())
        && prefix.len() + 1 + transaction_id.len() <= max_len;

    if embeddable {
        format!("{}-{}", prefix, transaction_id)
    } else {
        format!("{}-{}", prefix, short_hash(transaction_id))
    }
}

/// 取订单号中嵌入的交易ID (或其摘要)
pub fn embedded_transaction_id(order_no: &str) -> Option<&str> {
    let mut parts = order_no.splitn(4, '-');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(ORDER_PREFIX), Some(_), Some(_), Some(suffix)) if !suffix.is_empty() => Some(suffix),
        _ => None,
    }
}

fn looks_like_hash(value: &str) -> bool {
    value.len() == 8 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// 订单关联表
pub struct OrderCorrelation {
    store: Arc<dyn Store>,
    max_order_no_len: usize,
}

impl OrderCorrelation {
    pub fn new(store: Arc<dyn Store>, max_order_no_len: usize) -> Self {
        Self {
            store,
            max_order_no_len,
        }
    }

    /// 为平台交易创建新的订单映射
    ///
    /// # Arguments
    /// * `transaction_id` - 平台交易ID
    /// * `endpoint` - 平台端点
    /// * `gateway_id` - 使用的网关
    /// * `amount` - 下单金额
    pub async fn open_order(
        &self,
        transaction_id: &str,
        endpoint: &str,
        gateway_id: Option<Uuid>,
        amount: Decimal,
    ) -> Result<OrderMapping, StoreError> {
        let mut last_err = None;
        for _ in 0..MAX_INSERT_ATTEMPTS {
            let order_no = generate_order_no(transaction_id, Utc::now().timestamp(), self.max_order_no_len);
            let order = NewOrderMapping {
                order_hash: short_hash(&order_no),
                order_no,
                transaction_id: transaction_id.to_string(),
                endpoint: endpoint.to_string(),
                gateway_id,
                amount,
            };
            match self.store.insert_order(order).await {
                Ok(mapping) => return Ok(mapping),
                // 订单号或摘要碰撞，换一个随机段重试
                Err(StoreError::Conflict(what)) => {
                    log::warn!("Order number collision ({}), retrying", what);
                    last_err = Some(StoreError::Conflict(what));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Conflict("order number".to_string())))
    }

    /// 根据易支付回传的订单号找到映射
    ///
    /// 依次尝试完整订单号、摘要、订单号中嵌入的交易ID。
    pub async fn resolve(&self, out_trade_no: &str) -> Result<Option<OrderMapping>, StoreError> {
        if let Some(mapping) = self.store.get_order(out_trade_no).await? {
            return Ok(Some(mapping));
        }

        if looks_like_hash(out_trade_no) {
            if let Some(mapping) = self.store.get_order_by_hash(out_trade_no).await? {
                return Ok(Some(mapping));
            }
        }

        if let Some(transaction_id) = embedded_transaction_id(out_trade_no) {
            if let Some(mapping) = self.store.latest_order_for_transaction(transaction_id).await? {
                log::info!(
                    "Order {} resolved through embedded transaction id",
                    out_trade_no
                );
                return Ok(Some(mapping));
            }
        }

        Ok(None)
    }

    pub async fn latest_for_transaction(&self, transaction_id: &str) -> Result<Option<OrderMapping>, StoreError> {
        self.store.latest_order_for_transaction(transaction_id).await
    }

    /// 仅当订单仍为 pending 时迁移到目标状态
    pub async fn transition(&self, order_no: &str, to: OrderStatus) -> Result<Transition, StoreError> {
        self.store.transition_order(order_no, to).await
    }

    pub async fn mark_failed(&self, order_no: &str) -> Result<Transition, StoreError> {
        self.transition(order_no, OrderStatus::Failed).await
    }
}
