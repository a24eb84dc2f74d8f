use super::engine::{Observation, ReconciliationEngine};
use crate::config::BrokerConfig;
use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::intent::{CaptureParams, CreatedPayment, PaymentIntent, PaymentSlip, RefundRequest};
use crate::domain::lifecycle::TransitionSource;
use crate::domain::ports::PaymentGatewayRef;
use crate::domain::transaction::{
    GatewayKind, Refund, RefundId, TransactionSnapshot, TransactionStatus,
};
use crate::domain::webhook::WebhookAck;
use crate::error::{PaymentError, Result};
use crate::infrastructure::gateways::bank_transfer::{BankTransferGateway, SupportedBank};
use crate::infrastructure::gateways::card::CardGateway;
use crate::infrastructure::gateways::manual::ManualGateway;
use crate::infrastructure::gateways::wallet::WalletGateway;
use crate::infrastructure::webhook;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Routes caller requests to the gateway adapters and drives inbound webhooks
/// through the engine.
///
/// The manual channel is always available; vendor channels are registered
/// only when their credentials are configured.
pub struct PaymentBroker {
    engine: Arc<ReconciliationEngine>,
    gateways: HashMap<GatewayKind, PaymentGatewayRef>,
    webhook_secrets: HashMap<GatewayKind, String>,
    manual: Arc<ManualGateway>,
    bank_transfer: Option<Arc<BankTransferGateway>>,
}

impl PaymentBroker {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self::with_site_name(engine, &BrokerConfig::default().site_name)
    }

    fn with_site_name(engine: Arc<ReconciliationEngine>, site_name: &str) -> Self {
        let manual = Arc::new(ManualGateway::new(engine.clone(), site_name));
        let mut gateways: HashMap<GatewayKind, PaymentGatewayRef> = HashMap::new();
        gateways.insert(GatewayKind::Manual, manual.clone());
        Self {
            engine,
            gateways,
            webhook_secrets: HashMap::new(),
            manual,
            bank_transfer: None,
        }
    }

    /// Builds a broker with every gateway the configuration has credentials for.
    pub fn from_config(config: &BrokerConfig, engine: Arc<ReconciliationEngine>) -> Result<Self> {
        let mut broker = Self::with_site_name(engine.clone(), &config.site_name);
        let credentials = &config.credentials;

        if credentials.has_all(GatewayKind::Card, &["secret_key"]) {
            broker = broker.with_gateway(Arc::new(CardGateway::new(
                credentials,
                config.http_timeout,
                engine.clone(),
            )?));
        }
        if credentials.has_all(GatewayKind::Wallet, &["client_id", "secret"]) {
            broker = broker.with_gateway(Arc::new(WalletGateway::new(
                credentials,
                config.http_timeout,
                &config.site_name,
                &config.site_url,
                engine.clone(),
            )?));
        }
        if credentials.has_all(
            GatewayKind::BankTransfer,
            &["api_key", "secret_key", "merchant_id"],
        ) {
            broker = broker.with_bank_transfer(Arc::new(BankTransferGateway::new(
                credentials,
                config.http_timeout,
                &config.site_url,
                engine,
            )?));
        }

        for gateway in [GatewayKind::Card, GatewayKind::Wallet, GatewayKind::BankTransfer] {
            if let Some(secret) = credentials.get(gateway, "webhook_secret") {
                broker = broker.with_webhook_secret(gateway, secret);
            }
        }

        let mut registered: Vec<&str> = broker.gateways.keys().map(|g| g.as_str()).collect();
        registered.sort_unstable();
        info!(gateways = ?registered, "payment broker ready");
        Ok(broker)
    }

    pub fn with_gateway(mut self, gateway: PaymentGatewayRef) -> Self {
        self.gateways.insert(gateway.kind(), gateway);
        self
    }

    pub fn with_bank_transfer(mut self, gateway: Arc<BankTransferGateway>) -> Self {
        self.gateways.insert(GatewayKind::BankTransfer, gateway.clone());
        self.bank_transfer = Some(gateway);
        self
    }

    pub fn with_webhook_secret(mut self, gateway: GatewayKind, secret: impl Into<String>) -> Self {
        self.webhook_secrets.insert(gateway, secret.into());
        self
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub fn is_configured(&self, gateway: GatewayKind) -> bool {
        self.gateways.contains_key(&gateway)
    }

    fn gateway(&self, kind: GatewayKind) -> Result<&PaymentGatewayRef> {
        self.gateways
            .get(&kind)
            .ok_or(PaymentError::GatewayNotConfigured(kind))
    }

    /// Audits vendor failures before handing them back.
    async fn vendor_result<T>(&self, kind: GatewayKind, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(error @ (PaymentError::Gateway { .. } | PaymentError::GatewayUnavailable { .. })) =
            &result
        {
            self.engine
                .audit(
                    AuditEvent::new(AuditKind::GatewayError)
                        .gateway(kind)
                        .detail(json!({
                            "operation": operation,
                            "error": error.to_string(),
                        })),
                )
                .await;
        }
        result
    }

    pub async fn create(&self, intent: &PaymentIntent) -> Result<CreatedPayment> {
        let kind: GatewayKind = intent.gateway.parse()?;
        let result = self.gateway(kind)?.create(intent).await;
        self.vendor_result(kind, "create", result).await
    }

    pub async fn verify(&self, kind: GatewayKind, payment_id: &str) -> Result<TransactionSnapshot> {
        let result = self.gateway(kind)?.verify(payment_id).await;
        self.vendor_result(kind, "verify", result).await
    }

    pub async fn capture(
        &self,
        kind: GatewayKind,
        payment_id: &str,
        params: &CaptureParams,
    ) -> Result<TransactionStatus> {
        let result = self.gateway(kind)?.capture(payment_id, params).await;
        self.vendor_result(kind, "capture", result).await
    }

    pub async fn refund(
        &self,
        kind: GatewayKind,
        payment_id: &str,
        request: &RefundRequest,
    ) -> Result<Refund> {
        let result = self.gateway(kind)?.refund(payment_id, request).await;
        self.vendor_result(kind, "refund", result).await
    }

    pub async fn complete_manual_refund(&self, refund_id: RefundId, actor: &str) -> Result<Refund> {
        self.manual.complete_refund(refund_id, actor).await
    }

    pub async fn payment_slip(&self, payment_id: &str) -> Result<PaymentSlip> {
        self.manual.payment_slip(payment_id).await
    }

    pub async fn supported_banks(&self) -> Result<Vec<SupportedBank>> {
        let gateway = self
            .bank_transfer
            .as_ref()
            .ok_or(PaymentError::GatewayNotConfigured(GatewayKind::BankTransfer))?;
        let result = gateway.supported_banks().await;
        self.vendor_result(GatewayKind::BankTransfer, "supported_banks", result)
            .await
    }

    /// Authenticates an inbound vendor notification and reconciles it.
    ///
    /// Redeliveries are harmless: the engine turns a repeated status into a
    /// no-op and refund totals are cumulative.
    pub async fn handle_webhook(
        &self,
        kind: GatewayKind,
        raw: &[u8],
        signature: Option<&str>,
        source_ip: Option<IpAddr>,
    ) -> Result<WebhookAck> {
        if kind == GatewayKind::Manual {
            return Err(PaymentError::UnsupportedGateway(format!(
                "{kind} does not accept webhooks"
            )));
        }
        let secret = self
            .webhook_secrets
            .get(&kind)
            .ok_or(PaymentError::GatewayNotConfigured(kind))?;

        let event = match webhook::verify(kind, raw, signature, secret) {
            Ok(event) => event,
            Err(error) => {
                warn!(gateway = %kind, ip = ?source_ip, %error, "webhook rejected");
                self.engine
                    .audit(
                        AuditEvent::new(AuditKind::WebhookRejected {
                            reason: error.to_string(),
                        })
                        .gateway(kind)
                        .source_ip(source_ip)
                        .detail(json!({ "payload_bytes": raw.len() })),
                    )
                    .await;
                return Err(error.into());
            }
        };

        let payload: Value = serde_json::from_slice(raw)?;
        let tx = self.engine.find_by_payment(kind, &event.payment_id).await?;
        let mut received = AuditEvent::new(AuditKind::WebhookReceived {
            event_type: event.event_type.clone(),
        })
        .gateway(kind)
        .source_ip(source_ip)
        .detail(payload.clone());
        if let Some(tx) = &tx {
            received = received.transaction(tx.id);
        }
        self.engine.audit(received).await;

        let Some(tx) = tx else {
            info!(
                gateway = %kind,
                event_type = %event.event_type,
                payment_id = %event.payment_id,
                "webhook for unknown payment acknowledged"
            );
            return Ok(WebhookAck {
                received: true,
                status: None,
            });
        };

        let status = match event.status {
            TransactionStatus::Pending => {
                debug!(transaction_id = %tx.id, event_type = %event.event_type, "webhook carries no status change");
                tx.status
            }
            TransactionStatus::Refunded => {
                let total = event.refunded_total.unwrap_or(tx.amount.value());
                self.engine
                    .reconcile_vendor_refund(tx.id, total, event.gateway_refund_id)
                    .await?
                    .status
            }
            status => {
                let mut observation = Observation::new(status).vendor_response(payload);
                if let Some(amount) = event.amount {
                    observation = observation.amount(amount.value());
                }
                if let Some(capture_id) = event.capture_id {
                    observation = observation.metadata("capture_id", capture_id);
                }
                self.engine
                    .apply_transition(tx.id, observation, TransitionSource::Webhook)
                    .await?
                    .status()
            }
        };

        Ok(WebhookAck {
            received: true,
            status: Some(status),
        })
    }
}
