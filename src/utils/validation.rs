// 数据验证工具函数
// 提供管理接口输入与支付金额的格式检查

use anyhow::Result;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// 验证URL格式 (仅 http/https)
///
/// # Arguments
/// * `url` - URL字符串
///
/// # Returns
/// * URL是否有效
pub fn validate_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some(),
        Err(_) => false,
    }
}

/// 验证白名单正则表达式能否编译
pub fn validate_whitelist_pattern(pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        anyhow::bail!("Pattern cannot be empty");
    }
    Regex::new(pattern).map_err(|e| anyhow::anyhow!("Invalid pattern: {}", e))?;
    Ok(())
}

/// 验证支付金额
///
/// # Arguments
/// * `amount` - 支付金额
///
/// # Returns
/// * 金额必须为正且最多两位小数
pub fn validate_payment_amount(amount: &Decimal) -> Result<()> {
    if *amount <= Decimal::ZERO {
        anyhow::bail!("Payment amount must be positive");
    }

    if amount.normalize().scale() > 2 {
        anyhow::bail!("Payment amount supports at most two decimal places");
    }

    Ok(())
}

/// 金额格式化为易支付要求的两位小数
pub fn format_money(amount: &Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// 解析易支付回传的金额
pub fn parse_money(value: &str) -> Option<Decimal> {
    value.trim().parse::<Decimal>().ok()
}

/// 验证易支付商户号
pub fn validate_merchant_id(merchant_id: &str) -> Result<()> {
    if merchant_id.is_empty() {
        anyhow::bail!("Merchant id cannot be empty");
    }

    if merchant_id.len() > 64 {
        anyhow::bail!("Merchant id too long (max 64 characters)");
    }

    if !merchant_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        anyhow::bail!("Merchant id contains invalid characters");
    }

    Ok(())
}

/// 通用输入验证器
pub struct InputValidator {
    errors: BTreeMap<String, Vec<String>>,
}

impl InputValidator {
    /// 创建新的验证器
    pub fn new() -> Self {
        Self {
            errors: BTreeMap::new(),
        }
    }

    /// 添加字段验证错误
    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    /// 验证必填字段
    pub fn validate_required(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add_error(field, "This field is required");
        }
    }

    /// 验证字符串长度
    pub fn validate_length(&mut self, field: &str, value: &str, min: usize, max: usize) {
        let len = value.chars().count();
        if len < min {
            self.add_error(field, &format!("Must be at least {} characters", min));
        }
        if len > max {
            self.add_error(field, &format!("Must be at most {} characters", max));
        }
    }

    /// 验证URL格式
    pub fn validate_url_field(&mut self, field: &str, url: &str) {
        if !url.is_empty() && !validate_url(url) {
            self.add_error(field, "Invalid URL format");
        }
    }

    /// 把已有的校验结果并入
    pub fn check(&mut self, field: &str, outcome: Result<()>) {
        if let Err(e) = outcome {
            self.add_error(field, &e.to_string());
        }
    }

    /// 检查是否有验证错误
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// 转换为错误结果
    pub fn into_result(self) -> Result<()> {
        if self.has_errors() {
            let error_msg = self
                .errors
                .iter()
                .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
                .collect::<Vec<_>>()
                .join("; ");

            anyhow::bail!("Validation failed: {}", error_msg);
        }

        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}
