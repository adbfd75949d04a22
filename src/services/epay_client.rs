// 易支付接口客户端
// 负责构建签名请求、调用下单/查单接口并校验响应

use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::models::{
    ApiVersion, Gateway, OrderResult, QueryResult, RawCreateResponse, RawQueryResponse,
};
use crate::utils::crypto::{sign_params, SigningError};

/// 处理器通信错误
#[derive(Debug, Error, Clone)]
pub enum ProcessorError {
    /// 网络错误或超时
    #[error("processor unreachable: {0}")]
    Transport(String),

    /// 响应无法解析
    #[error("malformed processor response: {0}")]
    Malformed(String),

    #[error("request signing failed: {0}")]
    Signing(#[from] SigningError),
}

impl From<reqwest::Error> for ProcessorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProcessorError::Transport("request timed out".to_string())
        } else {
            ProcessorError::Transport(err.to_string())
        }
    }
}

/// 下单请求内容
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub out_trade_no: String,
    pub name: String,
    /// 两位小数金额
    pub money: String,
    pub pay_type: String,
    pub notify_url: String,
    pub return_url: String,
}

/// 易支付处理器接口
#[async_trait]
pub trait ProcessorClient: Send + Sync {
    /// 创建订单
    async fn create_order(&self, gateway: &Gateway, order: &CreateOrder) -> Result<OrderResult, ProcessorError>;

    /// 查询订单状态
    async fn query_order(&self, gateway: &Gateway, out_trade_no: &str) -> Result<QueryResult, ProcessorError>;
}

fn signing_key(gateway: &Gateway) -> Result<&str, ProcessorError> {
    gateway
        .signing_key()
        .filter(|k| !k.trim().is_empty())
        .ok_or(ProcessorError::Signing(SigningError::MissingKey))
}

fn attach_signature(gateway: &Gateway, params: &mut BTreeMap<String, String>) -> Result<(), ProcessorError> {
    let sign = sign_params(gateway.sign_type, params.iter(), signing_key(gateway)?)?;
    params.insert("sign".to_string(), sign);
    params.insert("sign_type".to_string(), gateway.sign_type.wire_name().to_string());
    Ok(())
}

/// 构建带签名的下单参数
///
/// # Arguments
/// * `gateway` - 网关配置
/// * `order` - 下单内容
/// * `timestamp` - 秒级时间戳 (仅 v2 使用)
pub fn build_create_params(
    gateway: &Gateway,
    order: &CreateOrder,
    timestamp: i64,
) -> Result<BTreeMap<String, String>, ProcessorError> {
    let mut params = BTreeMap::new();
    params.insert("pid".to_string(), gateway.merchant_id.clone());
    params.insert("type".to_string(), order.pay_type.clone());
    params.insert("out_trade_no".to_string(), order.out_trade_no.clone());
    params.insert("notify_url".to_string(), order.notify_url.clone());
    params.insert("return_url".to_string(), order.return_url.clone());
    params.insert("name".to_string(), order.name.clone());
    params.insert("money".to_string(), order.money.clone());
    if gateway.api_version == ApiVersion::V2 {
        params.insert("timestamp".to_string(), timestamp.to_string());
    }

    attach_signature(gateway, &mut params)?;
    Ok(params)
}

/// 构建 v2 查单参数
pub fn build_query_params(
    gateway: &Gateway,
    out_trade_no: &str,
    timestamp: i64,
) -> Result<BTreeMap<String, String>, ProcessorError> {
    let mut params = BTreeMap::new();
    params.insert("pid".to_string(), gateway.merchant_id.clone());
    params.insert("out_trade_no".to_string(), out_trade_no.to_string());
    params.insert("timestamp".to_string(), timestamp.to_string());
    attach_signature(gateway, &mut params)?;
    Ok(params)
}

fn endpoint(gateway: &Gateway, path: &str) -> String {
    format!("{}/{}", gateway.base_url.trim_end_matches('/'), path)
}

/// 基于 reqwest 的易支付客户端
pub struct EpayClient {
    client: Client,
}

impl EpayClient {
    /// 创建客户端
    ///
    /// # Arguments
    /// * `timeout` - 单次请求超时，超时按通信失败处理
    pub fn new(timeout: Duration) -> Result<Self, ProcessorError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("epay-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ProcessorError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProcessorError::Transport(format!("HTTP {}", status)));
        }
        serde_json::from_str(body.trim_start_matches('\u{feff}'))
            .map_err(|e| ProcessorError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl ProcessorClient for EpayClient {
    async fn create_order(&self, gateway: &Gateway, order: &CreateOrder) -> Result<OrderResult, ProcessorError> {
        let params = build_create_params(gateway, order, chrono::Utc::now().timestamp())?;
        let url = match gateway.api_version {
            ApiVersion::V1 => endpoint(gateway, "mapi.php"),
            ApiVersion::V2 => endpoint(gateway, "api/pay/create"),
        };

        log::info!(
            "Submitting order {} to gateway {} ({:?})",
            order.out_trade_no,
            gateway.name,
            gateway.api_version
        );
        let response = self.client.post(&url).form(&params).send().await?;
        let raw: RawCreateResponse = Self::read_json(response).await?;
        Ok(raw.into_result(gateway.api_version.success_code()))
    }

    async fn query_order(&self, gateway: &Gateway, out_trade_no: &str) -> Result<QueryResult, ProcessorError> {
        let response = match gateway.api_version {
            ApiVersion::V1 => {
                let key = signing_key(gateway)?;
                self.client
                    .get(endpoint(gateway, "api.php"))
                    .query(&[
                        ("act", "order"),
                        ("pid", gateway.merchant_id.as_str()),
                        ("key", key),
                        ("out_trade_no", out_trade_no),
                    ])
                    .send()
                    .await?
            }
            ApiVersion::V2 => {
                let params = build_query_params(gateway, out_trade_no, chrono::Utc::now().timestamp())?;
                self.client
                    .post(endpoint(gateway, "api/pay/query"))
                    .form(&params)
                    .send()
                    .await?
            }
        };

        let raw: RawQueryResponse = Self::read_json(response).await?;
        Ok(raw.into_result(gateway.api_version.success_code()))
    }
}
