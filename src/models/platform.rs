// 平台 webhook 报文结构
// 字段命名与平台的 camelCase 协议保持一致

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 交易动作
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAction {
    /// 金额，兼容字符串和数字
    pub amount: Decimal,
    pub currency: Option<String>,
    pub payment_method_type: Option<String>,
    pub action_type: Option<String>,
}

/// 平台交易标识
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRef {
    pub id: String,
    pub psp_reference: Option<String>,
}

/// 初始化时商户端附带的数据
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeData {
    pub channel_id: Option<String>,
    pub pay_type: Option<String>,
}

/// INITIALIZE 请求体
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeSessionPayload {
    pub action: TransactionAction,
    pub transaction: TransactionRef,
    pub source_object: Option<Value>,
    #[serde(default)]
    pub data: Option<InitializeData>,
}

/// PROCESS 请求中回传的上次响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentResponse {
    pub epay_order_no: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessData {
    pub payment_response: Option<ProcessPaymentResponse>,
}

/// PROCESS 请求体
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSessionPayload {
    pub action: TransactionAction,
    pub transaction: TransactionRef,
    #[serde(default)]
    pub data: Option<ProcessData>,
}

impl ProcessSessionPayload {
    pub fn epay_order_no(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.payment_response.as_ref())
            .and_then(|r| r.epay_order_no.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// 返回给平台的交易结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionResult {
    ChargeActionRequired,
    ChargeSuccess,
    ChargeFailure,
    ChargePending,
}

/// 响应中的支付信息
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qrcode: Option<String>,
    /// 提交给易支付的订单号
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epay_order_no: Option<String>,
    /// 平台交易ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saleor_order_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub payment_response: PaymentResponse,
}

/// INITIALIZE / PROCESS 的统一响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSessionResponse {
    pub result: TransactionResult,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// 易支付交易号
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psp_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SessionData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TransactionSessionResponse {
    pub fn new(result: TransactionResult, amount: Decimal) -> Self {
        Self {
            result,
            amount,
            psp_reference: None,
            external_url: None,
            data: None,
            message: None,
        }
    }

    /// 失败结果，消息原样返回给平台
    pub fn failure(amount: Decimal, message: impl Into<String>) -> Self {
        Self::new(TransactionResult::ChargeFailure, amount).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_payment(mut self, payment: PaymentResponse) -> Self {
        self.data = Some(SessionData { payment_response: payment });
        self
    }
}

/// 从请求头中提取的调用方上下文
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// 请求声明的平台API端点
    pub endpoint_hint: Option<String>,
    /// 仅作查询键使用的平台令牌
    pub token: Option<String>,
    pub domain: Option<String>,
    pub client_ip: Option<String>,
    /// 请求体已通过平台 webhook 签名校验
    pub signature_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_initialize_payload() {
        let body = json!({
            "action": {"amount": 1.0, "paymentMethodType": "alipay"},
            "transaction": {"id": "VHJhbnNhY3Rpb246MQ"},
            "data": {"channelId": null, "payType": "wxpay"}
        });
        let payload: InitializeSessionPayload = serde_json::from_value(body).unwrap();
        assert_eq!(payload.action.amount, Decimal::new(1, 0));
        assert_eq!(payload.transaction.id, "VHJhbnNhY3Rpb246MQ");
        assert_eq!(payload.data.unwrap().pay_type.as_deref(), Some("wxpay"));
    }

    #[test]
    fn test_process_order_no_lookup() {
        let body = json!({
            "action": {"amount": "12.50"},
            "transaction": {"id": "t1"},
            "data": {"paymentResponse": {"epayOrderNo": "ORDER-1-abc-t1"}}
        });
        let payload: ProcessSessionPayload = serde_json::from_value(body).unwrap();
        assert_eq!(payload.epay_order_no(), Some("ORDER-1-abc-t1"));
    }

    #[test]
    fn test_response_shape() {
        let response = TransactionSessionResponse::new(
            TransactionResult::ChargeActionRequired,
            Decimal::new(100, 2),
        )
        .with_payment(PaymentResponse {
            payment_url: Some("https://pay/x".to_string()),
            ..Default::default()
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["result"], "CHARGE_ACTION_REQUIRED");
        assert_eq!(value["amount"], 1.0);
        assert_eq!(value["data"]["paymentResponse"]["paymentUrl"], "https://pay/x");
        assert!(value.get("message").is_none());
    }
}
