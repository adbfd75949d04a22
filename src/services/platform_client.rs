// 平台事件上报客户端
// 异步通知改变订单状态后，通过 GraphQL 向平台上报交易事件

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::models::{CredentialRecord, TransactionResult};

const EVENT_REPORT_MUTATION: &str = r#"
mutation TransactionEventReport($id: ID!, $amount: PositiveDecimal!, $type: TransactionEventTypeEnum!, $pspReference: String!, $message: String) {
  transactionEventReport(id: $id, amount: $amount, type: $type, pspReference: $pspReference, message: $message) {
    alreadyProcessed
    errors { field message code }
  }
}
"#;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform unreachable: {0}")]
    Transport(String),

    #[error("platform rejected event: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::Transport(err.to_string())
    }
}

/// 交易事件
#[derive(Debug, Clone)]
pub struct TransactionEvent {
    pub transaction_id: String,
    pub amount: Decimal,
    /// CHARGE_SUCCESS 或 CHARGE_FAILURE
    pub result: TransactionResult,
    /// 易支付交易号
    pub psp_reference: String,
    pub message: Option<String>,
}

/// 平台接口
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn report_event(&self, credential: &CredentialRecord, event: &TransactionEvent) -> Result<(), PlatformError>;
}

/// GraphQL 实现
pub struct GraphqlPlatformClient {
    client: Client,
}

impl GraphqlPlatformClient {
    pub fn new(timeout: Duration) -> Result<Self, PlatformError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

fn event_type(result: TransactionResult) -> &'static str {
    match result {
        TransactionResult::ChargeSuccess => "CHARGE_SUCCESS",
        TransactionResult::ChargeFailure => "CHARGE_FAILURE",
        TransactionResult::ChargePending => "CHARGE_REQUEST",
        TransactionResult::ChargeActionRequired => "CHARGE_ACTION_REQUIRED",
    }
}

/// 构建上报请求体
pub fn event_report_body(event: &TransactionEvent) -> Value {
    json!({
        "query": EVENT_REPORT_MUTATION,
        "variables": {
            "id": event.transaction_id,
            "amount": event.amount.to_string(),
            "type": event_type(event.result),
            "pspReference": event.psp_reference,
            "message": event.message,
        }
    })
}

/// 从 GraphQL 响应中提取错误信息
fn collect_errors(body: &Value) -> Option<String> {
    let top_level = body.get("errors").and_then(Value::as_array).cloned().unwrap_or_default();
    let mutation = body
        .pointer("/data/transactionEventReport/errors")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let messages: Vec<String> = top_level
        .iter()
        .chain(mutation.iter())
        .filter_map(|e| e.get("message").and_then(Value::as_str).map(str::to_string))
        .collect();

    (!messages.is_empty()).then(|| messages.join("; "))
}

#[async_trait]
impl PlatformClient for GraphqlPlatformClient {
    async fn report_event(&self, credential: &CredentialRecord, event: &TransactionEvent) -> Result<(), PlatformError> {
        let response = self
            .client
            .post(&credential.endpoint)
            .bearer_auth(&credential.token)
            .json(&event_report_body(event))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Transport(format!("HTTP {}", status)));
        }

        let body: Value = response.json().await?;
        if let Some(errors) = collect_errors(&body) {
            return Err(PlatformError::Rejected(errors));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_body_shape() {
        let event = TransactionEvent {
            transaction_id: "T1".to_string(),
            amount: Decimal::new(100, 2),
            result: TransactionResult::ChargeSuccess,
            psp_reference: "2024010112345".to_string(),
            message: None,
        };
        let body = event_report_body(&event);
        assert_eq!(body["variables"]["type"], "CHARGE_SUCCESS");
        assert_eq!(body["variables"]["amount"], "1.00");
        assert!(body["query"].as_str().unwrap().contains("transactionEventReport"));
    }

    #[test]
    fn test_collect_errors() {
        let ok = json!({"data": {"transactionEventReport": {"alreadyProcessed": false, "errors": []}}});
        assert_eq!(collect_errors(&ok), None);

        let rejected = json!({"data": {"transactionEventReport": {"errors": [{"message": "not found"}]}}});
        assert_eq!(collect_errors(&rejected).as_deref(), Some("not found"));

        let top = json!({"errors": [{"message": "bad token"}]});
        assert_eq!(collect_errors(&top).as_deref(), Some("bad token"));
    }
}
