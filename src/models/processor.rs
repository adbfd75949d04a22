// 易支付处理器报文结构
// 原始响应在边界处校验为带标签的结果类型

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

/// 异步通知参数
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyParams {
    pub pid: String,
    pub trade_no: String,
    pub out_trade_no: String,
    pub pay_type: String,
    pub name: String,
    pub money: String,
    pub trade_status: String,
    pub sign: String,
    pub sign_type: String,
    /// 参与验签的全部原始字段
    pub raw: HashMap<String, String>,
}

impl NotifyParams {
    /// 从表单或查询参数构建，缺少必需字段时返回缺失字段名
    pub fn from_map(raw: HashMap<String, String>) -> Result<Self, &'static str> {
        let field = |name: &'static str| -> Result<String, &'static str> {
            raw.get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or(name)
        };
        let optional = |name: &str| raw.get(name).cloned().unwrap_or_default();

        Ok(Self {
            pid: field("pid")?,
            trade_no: optional("trade_no"),
            out_trade_no: field("out_trade_no")?,
            pay_type: optional("type"),
            name: optional("name"),
            money: field("money")?,
            trade_status: field("trade_status")?,
            sign: field("sign")?,
            sign_type: optional("sign_type"),
            raw,
        })
    }

    pub fn status(&self) -> TradeStatus {
        TradeStatus::parse(&self.trade_status)
    }
}

/// 易支付交易状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeStatus {
    Success,
    Closed,
    Waiting,
    Other(String),
}

impl TradeStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "TRADE_SUCCESS" | "TRADE_FINISHED" => TradeStatus::Success,
            "TRADE_CLOSED" => TradeStatus::Closed,
            "WAIT_BUYER_PAY" | "" => TradeStatus::Waiting,
            other => TradeStatus::Other(other.to_string()),
        }
    }
}

/// 下单结果
#[derive(Debug, Clone, PartialEq)]
pub enum OrderResult {
    Success {
        trade_no: String,
        pay_url: Option<String>,
        qrcode: Option<String>,
    },
    Failure {
        code: i64,
        message: String,
    },
}

/// 查单结果
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Found {
        trade_no: String,
        trade_status: TradeStatus,
        money: Option<String>,
    },
    Failure {
        code: i64,
        message: String,
    },
}

/// 下单接口原始响应 (v1 与 v2 字段的并集)
#[derive(Debug, Deserialize)]
pub struct RawCreateResponse {
    #[serde(default, deserialize_with = "loose_code")]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub trade_no: Option<String>,
    #[serde(default)]
    pub payurl: Option<String>,
    #[serde(default)]
    pub pay_url: Option<String>,
    #[serde(default)]
    pub qrcode: Option<String>,
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub urlscheme: Option<String>,
}

impl RawCreateResponse {
    /// 按接口版本的成功码校验响应
    pub fn into_result(self, success_code: i64) -> OrderResult {
        match self.code {
            Some(code) if code == success_code => {
                let pay_url = first_non_empty([self.payurl, self.pay_url, self.urlscheme]);
                let qrcode = first_non_empty([self.qrcode, self.qr_code]);
                if pay_url.is_none() && qrcode.is_none() {
                    return OrderResult::Failure {
                        code,
                        message: first_non_empty([self.msg, self.message])
                            .unwrap_or_else(|| "processor returned no payment url".to_string()),
                    };
                }
                OrderResult::Success {
                    trade_no: self.trade_no.unwrap_or_default(),
                    pay_url,
                    qrcode,
                }
            }
            code => OrderResult::Failure {
                code: code.unwrap_or(-1),
                message: first_non_empty([self.msg, self.message])
                    .unwrap_or_else(|| "unknown processor error".to_string()),
            },
        }
    }
}

/// 查单接口原始响应
#[derive(Debug, Deserialize)]
pub struct RawQueryResponse {
    #[serde(default, deserialize_with = "loose_code")]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub trade_no: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub status: Option<String>,
    #[serde(default)]
    pub trade_status: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub money: Option<String>,
}

impl RawQueryResponse {
    pub fn into_result(self, success_code: i64) -> QueryResult {
        match self.code {
            Some(code) if code == success_code => {
                // v1 返回 status=1 表示已支付
                let trade_status = match (self.trade_status.as_deref(), self.status.as_deref()) {
                    (Some(status), _) => TradeStatus::parse(status),
                    (None, Some("1")) => TradeStatus::Success,
                    (None, Some(_)) | (None, None) => TradeStatus::Waiting,
                };
                QueryResult::Found {
                    trade_no: self.trade_no.unwrap_or_default(),
                    trade_status,
                    money: self.money,
                }
            }
            code => QueryResult::Failure {
                code: code.unwrap_or(-1),
                message: first_non_empty([self.msg, self.message])
                    .unwrap_or_else(|| "unknown processor error".to_string()),
            },
        }
    }
}

/// 回复给易支付的通知应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReply {
    Success,
    Fail,
}

impl NotifyReply {
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyReply::Success => "success",
            NotifyReply::Fail => "fail",
        }
    }
}

// v1/v2 对同一含义使用不同字段名，可能同时出现
fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates.into_iter().flatten().find(|s| !s.is_empty())
}

// 处理器的 code 字段有时是数字有时是字符串
fn loose_code<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
