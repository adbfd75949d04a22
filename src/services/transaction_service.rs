// 交易编排服务
// 实现 初始化 -> 处理 -> 异步通知 三阶段协议，所有失败都映射为协议结果

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::models::{
    Gateway, InitializeSessionPayload, NotifyParams, NotifyReply, OrderMapping, OrderResult,
    OrderStatus, PaymentResponse, ProcessSessionPayload, QueryResult, RequestContext, SignScheme,
    TradeStatus, Transition, TransactionResult, TransactionSessionResponse,
};
use crate::services::{
    CreateOrder, CredentialResolver, GatewayCatalog, OrderCorrelation, PlatformClient,
    ProcessorClient, SiteRegistry, TransactionEvent,
};
use crate::utils::crypto::{verify_params, SigningError};
use crate::utils::{format_money, parse_money, validate_payment_amount};

/// 编排器运行参数
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// 本服务对外地址，用于拼接回调地址
    pub public_base_url: String,
    /// 未指定支付方式时使用
    pub default_pay_type: String,
}

impl OrchestratorSettings {
    fn notify_url(&self) -> String {
        format!("{}/api/notify", self.public_base_url.trim_end_matches('/'))
    }

    fn return_url(&self) -> String {
        format!("{}/api/return", self.public_base_url.trim_end_matches('/'))
    }
}

/// 交易编排器
pub struct TransactionOrchestrator {
    sites: Arc<SiteRegistry>,
    resolver: Arc<CredentialResolver>,
    catalog: Arc<GatewayCatalog>,
    correlation: Arc<OrderCorrelation>,
    processor: Arc<dyn ProcessorClient>,
    platform: Arc<dyn PlatformClient>,
    settings: OrchestratorSettings,
}

// 按最终状态映射结果：本次迁移成功取目标状态，否则取已有终态
fn settled(transition: Transition, target: OrderStatus) -> OrderStatus {
    match transition {
        Transition::Applied => target,
        Transition::Unchanged(current) => current,
    }
}

fn status_result(status: OrderStatus) -> TransactionResult {
    match status {
        OrderStatus::Paid => TransactionResult::ChargeSuccess,
        OrderStatus::Failed => TransactionResult::ChargeFailure,
        OrderStatus::Pending => TransactionResult::ChargePending,
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

impl TransactionOrchestrator {
    pub fn new(
        sites: Arc<SiteRegistry>,
        resolver: Arc<CredentialResolver>,
        catalog: Arc<GatewayCatalog>,
        correlation: Arc<OrderCorrelation>,
        processor: Arc<dyn ProcessorClient>,
        platform: Arc<dyn PlatformClient>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            sites,
            resolver,
            catalog,
            correlation,
            processor,
            platform,
            settings,
        }
    }

    /// 初始化支付会话
    ///
    /// 成功返回 CHARGE_ACTION_REQUIRED 并附带支付链接，任何失败返回 CHARGE_FAILURE。
    pub async fn initialize(&self, ctx: &RequestContext, payload: InitializeSessionPayload) -> TransactionSessionResponse {
        let amount = payload.action.amount;
        let transaction_id = payload.transaction.id.clone();
        match self.try_initialize(ctx, payload).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!(
                    "Initialize failed for transaction {} (site {}): {}",
                    transaction_id,
                    ctx.domain.as_deref().unwrap_or("<unknown>"),
                    err
                );
                TransactionSessionResponse::failure(amount, err.to_string())
            }
        }
    }

    async fn try_initialize(
        &self,
        ctx: &RequestContext,
        payload: InitializeSessionPayload,
    ) -> Result<TransactionSessionResponse, PaymentError> {
        let amount = payload.action.amount;
        validate_payment_amount(&amount).map_err(|e| PaymentError::Validation(e.to_string()))?;

        self.sites.gate(ctx).await?;
        let credential = self
            .resolver
            .resolve(ctx.endpoint_hint.as_deref(), ctx.token.as_deref(), ctx.signature_verified)
            .await?;

        let data = payload.data.unwrap_or_default();
        let channel_id = match data.channel_id.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                Uuid::parse_str(raw)
                    .map_err(|_| PaymentError::Validation(format!("invalid channel id {}", raw)))?,
            ),
            None => None,
        };
        let active = self.catalog.resolve_active_config(channel_id).await?;
        let gateway = active.gateway;

        let pay_type = data
            .pay_type
            .filter(|s| !s.is_empty())
            .or_else(|| active.channel.map(|c| c.channel_type))
            .or_else(|| payload.action.payment_method_type.filter(|s| !s.is_empty()))
            .unwrap_or_else(|| self.settings.default_pay_type.clone());

        let mapping = self
            .correlation
            .open_order(
                &payload.transaction.id,
                &credential.record.endpoint,
                Some(gateway.id),
                amount,
            )
            .await?;

        let order = CreateOrder {
            out_trade_no: mapping.order_no.clone(),
            name: format!("Order {}", mapping.order_hash),
            money: format_money(&amount),
            pay_type: pay_type.clone(),
            notify_url: self.settings.notify_url(),
            return_url: gateway
                .return_url
                .clone()
                .unwrap_or_else(|| self.settings.return_url()),
        };

        let outcome = self.processor.create_order(&gateway, &order).await;
        let (trade_no, pay_url, qrcode) = match outcome {
            Ok(OrderResult::Success {
                trade_no,
                pay_url,
                qrcode,
            }) => (trade_no, pay_url, qrcode),
            Ok(OrderResult::Failure { code, message }) => {
                self.abandon(&mapping).await;
                return Err(PaymentError::ProcessorRejected { code, message });
            }
            Err(err) => {
                self.abandon(&mapping).await;
                return Err(err.into());
            }
        };

        log::info!(
            "Order {} created for transaction {} via gateway {}",
            mapping.order_no,
            mapping.transaction_id,
            gateway.name
        );

        let mut response = TransactionSessionResponse::new(TransactionResult::ChargeActionRequired, amount)
            .with_payment(PaymentResponse {
                payment_url: pay_url.clone(),
                qrcode,
                epay_order_no: Some(mapping.order_no.clone()),
                saleor_order_no: Some(mapping.transaction_id.clone()),
                pay_type: Some(pay_type),
            });
        response.external_url = pay_url;
        response.psp_reference = non_empty(trade_no);
        Ok(response)
    }

    // 下单失败的订单不会再被支付
    async fn abandon(&self, mapping: &OrderMapping) {
        if let Err(e) = self.correlation.mark_failed(&mapping.order_no).await {
            log::error!("Failed to mark order {} as failed: {}", mapping.order_no, e);
        }
    }

    /// 处理支付会话 (平台轮询)
    ///
    /// 查询失败或状态未定时返回 CHARGE_PENDING，从不因暂时性错误直接失败。
    pub async fn process(&self, ctx: &RequestContext, payload: ProcessSessionPayload) -> TransactionSessionResponse {
        let amount = payload.action.amount;
        let transaction_id = payload.transaction.id.clone();

        let (mapping, gateway) = match self.prepare_process(ctx, &payload).await {
            Ok(found) => found,
            Err(err) => {
                log::warn!("Process rejected for transaction {}: {}", transaction_id, err);
                return if err.is_retryable() {
                    TransactionSessionResponse::new(TransactionResult::ChargePending, amount).with_message(err.to_string())
                } else {
                    TransactionSessionResponse::failure(amount, err.to_string())
                };
            }
        };

        let payment = PaymentResponse {
            epay_order_no: Some(mapping.order_no.clone()),
            saleor_order_no: Some(mapping.transaction_id.clone()),
            ..Default::default()
        };

        if mapping.status.is_terminal() {
            return TransactionSessionResponse::new(status_result(mapping.status), amount).with_payment(payment);
        }

        let (result, psp_reference, message) = match self.processor.query_order(&gateway, &mapping.order_no).await {
            Ok(QueryResult::Found {
                trade_no,
                trade_status,
                ..
            }) => {
                let target = match trade_status {
                    TradeStatus::Success => Some(OrderStatus::Paid),
                    TradeStatus::Closed => Some(OrderStatus::Failed),
                    TradeStatus::Waiting | TradeStatus::Other(_) => None,
                };
                match target {
                    Some(target) => match self.correlation.transition(&mapping.order_no, target).await {
                        Ok(transition) => (status_result(settled(transition, target)), non_empty(trade_no), None),
                        Err(e) => (TransactionResult::ChargePending, non_empty(trade_no), Some(e.to_string())),
                    },
                    None => (TransactionResult::ChargePending, non_empty(trade_no), None),
                }
            }
            Ok(QueryResult::Failure { message, .. }) => (TransactionResult::ChargePending, None, Some(message)),
            Err(err) => {
                log::warn!("Order query failed for {}: {}", mapping.order_no, err);
                (TransactionResult::ChargePending, None, Some(err.to_string()))
            }
        };

        let mut response = TransactionSessionResponse::new(result, amount).with_payment(payment);
        response.psp_reference = psp_reference;
        response.message = message;
        response
    }

    async fn prepare_process(
        &self,
        ctx: &RequestContext,
        payload: &ProcessSessionPayload,
    ) -> Result<(OrderMapping, Gateway), PaymentError> {
        self.sites.gate(ctx).await?;
        self.resolver
            .resolve(ctx.endpoint_hint.as_deref(), ctx.token.as_deref(), ctx.signature_verified)
            .await?;

        let transaction_id = payload.transaction.id.as_str();
        let by_order_no = match payload.epay_order_no() {
            Some(order_no) => self
                .correlation
                .resolve(order_no)
                .await?
                .filter(|m| m.transaction_id == transaction_id),
            None => None,
        };
        let mapping = match by_order_no {
            Some(mapping) => mapping,
            None => self
                .correlation
                .latest_for_transaction(transaction_id)
                .await?
                .ok_or_else(|| {
                    PaymentError::Configuration(format!("no order recorded for transaction {}", transaction_id))
                })?,
        };

        let gateway = match mapping.gateway_id {
            Some(id) => self.catalog.get_gateway(id).await?,
            None => None,
        }
        .ok_or_else(|| PaymentError::Configuration(format!("gateway for order {} no longer exists", mapping.order_no)))?;

        Ok((mapping, gateway))
    }

    /// 处理易支付异步通知
    ///
    /// 验签失败、订单未知或金额不符时回复 fail 且不修改任何状态。
    pub async fn notify(&self, raw: HashMap<String, String>) -> NotifyReply {
        let params = match NotifyParams::from_map(raw) {
            Ok(params) => params,
            Err(field) => {
                log::warn!("Notify rejected: missing field {}", field);
                return NotifyReply::Fail;
            }
        };

        match self.try_notify(&params).await {
            Ok(()) => NotifyReply::Success,
            Err(err) => {
                log::warn!(
                    "Notify for {} (pid {}) rejected: {}",
                    params.out_trade_no,
                    params.pid,
                    err
                );
                NotifyReply::Fail
            }
        }
    }

    async fn try_notify(&self, params: &NotifyParams) -> Result<(), PaymentError> {
        let mapping = self
            .correlation
            .resolve(&params.out_trade_no)
            .await?
            .ok_or_else(|| PaymentError::Configuration(format!("unknown order {}", params.out_trade_no)))?;

        let gateway = match mapping.gateway_id {
            Some(id) => self.catalog.get_gateway(id).await?,
            None => None,
        };
        let gateway = match gateway {
            Some(gateway) => gateway,
            None => self
                .catalog
                .find_gateway_by_merchant(&params.pid)
                .await?
                .ok_or_else(|| PaymentError::Configuration(format!("no gateway for merchant {}", params.pid)))?,
        };
        if gateway.merchant_id != params.pid {
            return Err(PaymentError::Authorization(format!(
                "merchant {} does not own order {}",
                params.pid, mapping.order_no
            )));
        }

        let key = self.verifying_key(&gateway, &mapping).await?;
        if !verify_params(gateway.sign_type, params.raw.iter(), &params.sign, &key)? {
            return Err(SigningError::Mismatch.into());
        }

        match parse_money(&params.money) {
            Some(money) if money == mapping.amount => {}
            _ => {
                return Err(PaymentError::Validation(format!(
                    "amount {} does not match recorded {}",
                    params.money, mapping.amount
                )))
            }
        }

        let target = match params.status() {
            TradeStatus::Success => OrderStatus::Paid,
            TradeStatus::Closed => OrderStatus::Failed,
            other => {
                log::info!("Notify for {} acknowledged with status {:?}", mapping.order_no, other);
                return Ok(());
            }
        };

        let transition = self.correlation.transition(&mapping.order_no, target).await?;
        match transition {
            Transition::Applied => {
                log::info!("Order {} moved to {}", mapping.order_no, target.as_str());
                self.report(&mapping, target, &params.trade_no).await;
            }
            Transition::Unchanged(current) if current == target => {
                log::info!("Duplicate notify for order {} ignored", mapping.order_no);
            }
            Transition::Unchanged(current) => {
                log::warn!(
                    "Order {} is already {}, notify reported {}",
                    mapping.order_no,
                    current.as_str(),
                    target.as_str()
                );
            }
        }
        Ok(())
    }

    // RSA 网关未配置平台公钥时，使用租户凭证中的公钥
    async fn verifying_key(&self, gateway: &Gateway, mapping: &OrderMapping) -> Result<String, PaymentError> {
        if let Some(key) = gateway.verifying_key().filter(|k| !k.trim().is_empty()) {
            return Ok(key.to_string());
        }
        if gateway.sign_type == SignScheme::Rsa {
            if let Some(key) = self
                .resolver
                .lookup(&mapping.endpoint)
                .await?
                .and_then(|c| c.public_key)
                .filter(|k| !k.trim().is_empty())
            {
                return Ok(key);
            }
        }
        Err(PaymentError::Configuration(format!(
            "gateway {} has no verification key",
            gateway.name
        )))
    }

    async fn report(&self, mapping: &OrderMapping, status: OrderStatus, trade_no: &str) {
        let credential = match self.resolver.lookup(&mapping.endpoint).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                log::warn!("No credential for {}, skipping event report", mapping.endpoint);
                return;
            }
            Err(e) => {
                log::warn!("Credential lookup failed for {}: {}", mapping.endpoint, e);
                return;
            }
        };

        let event = TransactionEvent {
            transaction_id: mapping.transaction_id.clone(),
            amount: mapping.amount,
            result: status_result(status),
            psp_reference: if trade_no.is_empty() {
                mapping.order_no.clone()
            } else {
                trade_no.to_string()
            },
            message: None,
        };

        if let Err(e) = self.platform.report_event(&credential, &event).await {
            // 平台仍会通过 PROCESS 轮询得到最终状态
            log::warn!("Event report for order {} failed: {}", mapping.order_no, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InitializeData, ProcessData, ProcessPaymentResponse, TransactionAction, TransactionRef};
    use crate::services::test_support::{Fixture, RecordingPlatform, SHOP_ENDPOINT};
    use crate::services::ProcessorError;
    use crate::models::{sample_gateway, ApiVersion, CredentialRecord};
    use crate::storage::{CredentialStore, GatewayStore, OrderStore};
    use crate::utils::crypto::{canonicalize, md5_sign, sign_params};
    use openssl::rsa::Rsa;
    use rust_decimal::Decimal;

    fn action(amount: Decimal) -> TransactionAction {
        TransactionAction {
            amount,
            currency: Some("CNY".to_string()),
            payment_method_type: None,
            action_type: Some("CHARGE".to_string()),
        }
    }

    fn initialize_payload(transaction_id: &str, amount: Decimal) -> InitializeSessionPayload {
        InitializeSessionPayload {
            action: action(amount),
            transaction: TransactionRef {
                id: transaction_id.to_string(),
                psp_reference: None,
            },
            source_object: None,
            data: Some(InitializeData {
                channel_id: None,
                pay_type: Some("alipay".to_string()),
            }),
        }
    }

    fn process_payload(transaction_id: &str, epay_order_no: Option<&str>) -> ProcessSessionPayload {
        ProcessSessionPayload {
            action: action(Decimal::new(100, 2)),
            transaction: TransactionRef {
                id: transaction_id.to_string(),
                psp_reference: None,
            },
            data: Some(ProcessData {
                payment_response: Some(ProcessPaymentResponse {
                    epay_order_no: epay_order_no.map(str::to_string),
                }),
            }),
        }
    }

    fn notify_fields(order_no: &str, money: &str, status: &str) -> HashMap<String, String> {
        [
            ("pid", "m"),
            ("trade_no", "2024010100001"),
            ("out_trade_no", order_no),
            ("type", "alipay"),
            ("name", "Order"),
            ("money", money),
            ("trade_status", status),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn signed_notify(order_no: &str, money: &str, status: &str, secret: &str) -> HashMap<String, String> {
        let mut params = notify_fields(order_no, money, status);
        let sign = md5_sign(&canonicalize(params.iter()), secret);
        params.insert("sign".to_string(), sign);
        params.insert("sign_type".to_string(), "MD5".to_string());
        params
    }

    async fn initialized(fixture: &Fixture, transaction_id: &str) -> String {
        let response = fixture
            .orchestrator
            .initialize(&fixture.context(), initialize_payload(transaction_id, Decimal::new(100, 2)))
            .await;
        assert_eq!(response.result, TransactionResult::ChargeActionRequired);
        response.data.unwrap().payment_response.epay_order_no.unwrap()
    }

    #[tokio::test]
    async fn test_initialize_returns_payment_url() {
        let fixture = Fixture::new().await;
        let response = fixture
            .orchestrator
            .initialize(&fixture.context(), initialize_payload("T1", Decimal::new(100, 2)))
            .await;

        assert_eq!(response.result, TransactionResult::ChargeActionRequired);
        assert_eq!(response.amount, Decimal::new(100, 2));
        assert_eq!(response.psp_reference.as_deref(), Some("2024010100001"));
        assert!(response.external_url.as_deref().unwrap().starts_with("https://pay.example.net/"));

        let payment = response.data.unwrap().payment_response;
        assert_eq!(payment.saleor_order_no.as_deref(), Some("T1"));
        assert_eq!(payment.pay_type.as_deref(), Some("alipay"));

        let order = fixture.processor.last_order.lock().unwrap().clone().unwrap();
        assert_eq!(Some(order.out_trade_no.clone()), payment.epay_order_no);
        assert_eq!(order.money, "1.00");
        assert_eq!(order.notify_url, "https://bridge.test/api/notify");
        assert_eq!(order.return_url, "https://bridge.test/api/return");

        let mapping = fixture.store.get_order(&order.out_trade_no).await.unwrap().unwrap();
        assert_eq!(mapping.endpoint, SHOP_ENDPOINT);
        assert_eq!(mapping.gateway_id, Some(fixture.gateway.id));
        assert_eq!(mapping.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_unapproved_site_never_reaches_processor() {
        let fixture = Fixture::new().await;
        let mut ctx = fixture.context();
        ctx.domain = Some("rogue.test".to_string());
        ctx.client_ip = None;

        let response = fixture
            .orchestrator
            .initialize(&ctx, initialize_payload("T1", Decimal::new(100, 2)))
            .await;
        assert_eq!(response.result, TransactionResult::ChargeFailure);
        assert!(response.message.unwrap().contains("not approved"));
        assert_eq!(fixture.processor.created(), 0);
    }

    #[tokio::test]
    async fn test_initialize_requires_matching_token_or_signature() {
        let fixture = Fixture::new().await;
        let mut ctx = fixture.context();
        ctx.token = Some("forged-token".to_string());
        let response = fixture
            .orchestrator
            .initialize(&ctx, initialize_payload("T1", Decimal::new(100, 2)))
            .await;
        assert_eq!(response.result, TransactionResult::ChargeFailure);

        ctx.token = None;
        let response = fixture
            .orchestrator
            .initialize(&ctx, initialize_payload("T1", Decimal::new(100, 2)))
            .await;
        assert_eq!(response.result, TransactionResult::ChargeFailure);
        assert_eq!(fixture.processor.created(), 0);

        // 平台签名已校验时不要求令牌
        ctx.signature_verified = true;
        let response = fixture
            .orchestrator
            .initialize(&ctx, initialize_payload("T1", Decimal::new(100, 2)))
            .await;
        assert_eq!(response.result, TransactionResult::ChargeActionRequired);
        assert_eq!(fixture.processor.created(), 1);
    }

    #[tokio::test]
    async fn test_non_positive_amount_is_rejected() {
        let fixture = Fixture::new().await;
        let response = fixture
            .orchestrator
            .initialize(&fixture.context(), initialize_payload("T1", Decimal::ZERO))
            .await;
        assert_eq!(response.result, TransactionResult::ChargeFailure);
        assert_eq!(fixture.processor.created(), 0);
    }

    #[tokio::test]
    async fn test_processor_rejection_message_is_verbatim() {
        let fixture = Fixture::new().await;
        fixture.processor.on_create(Ok(OrderResult::Failure {
            code: -1,
            message: "商户未开通该支付方式".to_string(),
        }));

        let response = fixture
            .orchestrator
            .initialize(&fixture.context(), initialize_payload("T1", Decimal::new(100, 2)))
            .await;
        assert_eq!(response.result, TransactionResult::ChargeFailure);
        assert_eq!(response.message.as_deref(), Some("商户未开通该支付方式"));

        let mapping = fixture.store.latest_order_for_transaction("T1").await.unwrap().unwrap();
        assert_eq!(mapping.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_processor_outage_fails_initialize() {
        let fixture = Fixture::new().await;
        fixture
            .processor
            .on_create(Err(ProcessorError::Transport("request timed out".to_string())));
        let response = fixture
            .orchestrator
            .initialize(&fixture.context(), initialize_payload("T1", Decimal::new(100, 2)))
            .await;
        assert_eq!(response.result, TransactionResult::ChargeFailure);
        assert!(response.message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_process_maps_processor_status() {
        let fixture = Fixture::new().await;
        let order_no = initialized(&fixture, "T1").await;

        fixture.processor.on_query(Ok(QueryResult::Found {
            trade_no: "2024010100001".to_string(),
            trade_status: TradeStatus::Waiting,
            money: Some("1.00".to_string()),
        }));
        let pending = fixture
            .orchestrator
            .process(&fixture.context(), process_payload("T1", Some(&order_no)))
            .await;
        assert_eq!(pending.result, TransactionResult::ChargePending);

        fixture.processor.on_query(Ok(QueryResult::Found {
            trade_no: "2024010100001".to_string(),
            trade_status: TradeStatus::Success,
            money: Some("1.00".to_string()),
        }));
        let paid = fixture
            .orchestrator
            .process(&fixture.context(), process_payload("T1", Some(&order_no)))
            .await;
        assert_eq!(paid.result, TransactionResult::ChargeSuccess);
        assert_eq!(paid.psp_reference.as_deref(), Some("2024010100001"));

        // 终态订单不再查询处理器
        let queries = fixture.processor.query_calls.load(std::sync::atomic::Ordering::SeqCst);
        let again = fixture
            .orchestrator
            .process(&fixture.context(), process_payload("T1", None))
            .await;
        assert_eq!(again.result, TransactionResult::ChargeSuccess);
        assert_eq!(
            fixture.processor.query_calls.load(std::sync::atomic::Ordering::SeqCst),
            queries
        );
    }

    #[tokio::test]
    async fn test_process_stays_pending_when_query_fails() {
        let fixture = Fixture::new().await;
        let order_no = initialized(&fixture, "T1").await;
        fixture
            .processor
            .on_query(Err(ProcessorError::Transport("connection reset".to_string())));

        let response = fixture
            .orchestrator
            .process(&fixture.context(), process_payload("T1", Some(&order_no)))
            .await;
        assert_eq!(response.result, TransactionResult::ChargePending);
        assert!(response.message.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_process_unknown_transaction_fails() {
        let fixture = Fixture::new().await;
        let response = fixture
            .orchestrator
            .process(&fixture.context(), process_payload("T404", None))
            .await;
        assert_eq!(response.result, TransactionResult::ChargeFailure);
    }

    #[tokio::test]
    async fn test_notify_is_idempotent() {
        let fixture = Fixture::new().await;
        let order_no = initialized(&fixture, "T1").await;
        let params = signed_notify(&order_no, "1.00", "TRADE_SUCCESS", "k");

        assert_eq!(fixture.orchestrator.notify(params.clone()).await, NotifyReply::Success);
        assert_eq!(fixture.orchestrator.notify(params).await, NotifyReply::Success);

        let events = fixture.platform.reported();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_id, "T1");
        assert_eq!(events[0].result, TransactionResult::ChargeSuccess);
        assert_eq!(events[0].psp_reference, "2024010100001");

        let mapping = fixture.store.get_order(&order_no).await.unwrap().unwrap();
        assert_eq!(mapping.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_notify_with_bad_signature_changes_nothing() {
        let fixture = Fixture::new().await;
        let order_no = initialized(&fixture, "T1").await;
        let params = signed_notify(&order_no, "1.00", "TRADE_SUCCESS", "wrong-secret");

        assert_eq!(fixture.orchestrator.notify(params).await, NotifyReply::Fail);
        let mapping = fixture.store.get_order(&order_no).await.unwrap().unwrap();
        assert_eq!(mapping.status, OrderStatus::Pending);
        assert!(fixture.platform.reported().is_empty());
    }

    #[tokio::test]
    async fn test_notify_amount_mismatch_is_rejected() {
        let fixture = Fixture::new().await;
        let order_no = initialized(&fixture, "T1").await;
        let params = signed_notify(&order_no, "0.01", "TRADE_SUCCESS", "k");

        assert_eq!(fixture.orchestrator.notify(params).await, NotifyReply::Fail);
        let mapping = fixture.store.get_order(&order_no).await.unwrap().unwrap();
        assert_eq!(mapping.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_notify_unknown_order_and_missing_fields() {
        let fixture = Fixture::new().await;
        let params = signed_notify("ORDER-1-abcdef-T9", "1.00", "TRADE_SUCCESS", "k");
        assert_eq!(fixture.orchestrator.notify(params).await, NotifyReply::Fail);
        assert_eq!(fixture.orchestrator.notify(HashMap::new()).await, NotifyReply::Fail);
    }

    #[tokio::test]
    async fn test_notify_survives_platform_outage() {
        let fixture = Fixture::with_platform(RecordingPlatform {
            fail: true,
            ..Default::default()
        })
        .await;
        let order_no = initialized(&fixture, "T1").await;
        let params = signed_notify(&order_no, "1.00", "TRADE_SUCCESS", "k");

        assert_eq!(fixture.orchestrator.notify(params).await, NotifyReply::Success);
        let mapping = fixture.store.get_order(&order_no).await.unwrap().unwrap();
        assert_eq!(mapping.status, OrderStatus::Paid);
    }

    /// (私钥, 公钥) PEM
    fn rsa_keypair() -> (String, String) {
        let rsa = Rsa::generate(2048).unwrap();
        (
            String::from_utf8(rsa.private_key_to_pem().unwrap()).unwrap(),
            String::from_utf8(rsa.public_key_to_pem().unwrap()).unwrap(),
        )
    }

    fn rsa_notify(order_no: &str, processor_private_key: &str) -> HashMap<String, String> {
        let mut params = notify_fields(order_no, "1.00", "TRADE_SUCCESS");
        let sign = sign_params(SignScheme::Rsa, params.iter(), processor_private_key).unwrap();
        params.insert("sign".to_string(), sign);
        params.insert("sign_type".to_string(), "RSA".to_string());
        params
    }

    // 优先级更高的 RSA 网关接管新订单
    async fn initialized_on_rsa_gateway(fixture: &Fixture, platform_public_key: Option<String>) -> String {
        let (merchant_private_key, _) = rsa_keypair();
        let mut gateway = sample_gateway("rsa", 20);
        gateway.api_version = ApiVersion::V2;
        gateway.sign_type = SignScheme::Rsa;
        gateway.secret_key = None;
        gateway.private_key = Some(merchant_private_key);
        gateway.platform_public_key = platform_public_key;
        let gateway = fixture.store.insert_gateway(gateway).await.unwrap();

        let order_no = initialized(fixture, "T1").await;
        let mapping = fixture.store.get_order(&order_no).await.unwrap().unwrap();
        assert_eq!(mapping.gateway_id, Some(gateway.id));
        order_no
    }

    #[tokio::test]
    async fn test_rsa_notify_verified_with_platform_public_key() {
        let fixture = Fixture::new().await;
        let (processor_private, processor_public) = rsa_keypair();
        let order_no = initialized_on_rsa_gateway(&fixture, Some(processor_public)).await;

        let mut tampered = rsa_notify(&order_no, &processor_private);
        tampered.insert("trade_no".to_string(), "2024010100002".to_string());
        assert_eq!(fixture.orchestrator.notify(tampered).await, NotifyReply::Fail);
        let mapping = fixture.store.get_order(&order_no).await.unwrap().unwrap();
        assert_eq!(mapping.status, OrderStatus::Pending);

        let params = rsa_notify(&order_no, &processor_private);
        assert_eq!(fixture.orchestrator.notify(params).await, NotifyReply::Success);
        let mapping = fixture.store.get_order(&order_no).await.unwrap().unwrap();
        assert_eq!(mapping.status, OrderStatus::Paid);
        assert_eq!(fixture.platform.reported().len(), 1);
    }

    #[tokio::test]
    async fn test_rsa_notify_falls_back_to_credential_public_key() {
        let fixture = Fixture::new().await;
        let (processor_private, processor_public) = rsa_keypair();
        let mut credential = CredentialRecord::new(SHOP_ENDPOINT, "tok-a", "app-a");
        credential.public_key = Some(processor_public);
        fixture.store.upsert_credential(credential).await.unwrap();
        let order_no = initialized_on_rsa_gateway(&fixture, None).await;

        // 其他密钥对签出的通知不被接受
        let (foreign_private, _) = rsa_keypair();
        let forged = rsa_notify(&order_no, &foreign_private);
        assert_eq!(fixture.orchestrator.notify(forged).await, NotifyReply::Fail);

        let params = rsa_notify(&order_no, &processor_private);
        assert_eq!(fixture.orchestrator.notify(params).await, NotifyReply::Success);
        let mapping = fixture.store.get_order(&order_no).await.unwrap().unwrap();
        assert_eq!(mapping.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_rsa_notify_without_any_public_key_fails() {
        let fixture = Fixture::new().await;
        let (processor_private, _) = rsa_keypair();
        let order_no = initialized_on_rsa_gateway(&fixture, None).await;

        let params = rsa_notify(&order_no, &processor_private);
        assert_eq!(fixture.orchestrator.notify(params).await, NotifyReply::Fail);
        let mapping = fixture.store.get_order(&order_no).await.unwrap().unwrap();
        assert_eq!(mapping.status, OrderStatus::Pending);
    }
}
