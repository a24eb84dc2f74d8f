use super::{VendorClient, decimal_at, reconcile};
use crate::application::engine::{Observation, ReconciliationEngine};
use crate::config::Credentials;
use crate::domain::intent::{
    CaptureParams, Continuation, CreatedPayment, PaymentIntent, RefundRequest, validate_intent,
};
use crate::domain::lifecycle::TransitionSource;
use crate::domain::ports::PaymentGateway;
use crate::domain::status_map;
use crate::domain::transaction::{
    GatewayKind, NewTransaction, Refund, RefundStatus, Transaction, TransactionSnapshot,
    TransactionStatus,
};
use crate::error::{PaymentError, Result};
use crate::infrastructure::webhook::hex_hmac;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const PRODUCTION_API_BASE: &str = "https://api.instapay.ph/v2";
pub const SANDBOX_API_BASE: &str = "https://sandbox-api.instapay.ph/v2";
/// The rail only settles in pesos.
pub const SETTLEMENT_CURRENCY: &str = "PHP";

/// A bank reachable over the transfer rail.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SupportedBank {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

/// Instant bank-transfer rail.
///
/// Requests are signed with `HMAC-SHA256(secret, "{timestamp}.{body}")` and
/// payments settle asynchronously, observed by webhook or polling.
pub struct BankTransferGateway {
    client: VendorClient,
    api_key: String,
    secret_key: String,
    merchant_id: String,
    site_url: String,
    engine: Arc<ReconciliationEngine>,
}

impl BankTransferGateway {
    pub fn new(
        credentials: &Credentials,
        timeout: Duration,
        site_url: &str,
        engine: Arc<ReconciliationEngine>,
    ) -> Result<Self> {
        let gw = GatewayKind::BankTransfer;
        let base = match credentials.get(gw, "api_base") {
            Some(base) => base,
            None if credentials.get(gw, "environment") == Some("production") => {
                PRODUCTION_API_BASE
            }
            None => SANDBOX_API_BASE,
        };
        Ok(Self {
            client: VendorClient::new(gw, base, timeout)?,
            api_key: credentials.require(gw, "api_key")?.to_string(),
            secret_key: credentials.require(gw, "secret_key")?.to_string(),
            merchant_id: credentials.require(gw, "merchant_id")?.to_string(),
            site_url: site_url.trim_end_matches('/').to_string(),
            engine,
        })
    }

    async fn signed(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let payload = match body {
            Some(body) => serde_json::to_string(body)?,
            None => String::new(),
        };
        let timestamp = Utc::now().timestamp().to_string();
        let signature = hex_hmac(&self.secret_key, format!("{timestamp}.{payload}").as_bytes())
            .map_err(|e| PaymentError::internal(format!("request signing failed: {e}")))?;

        let mut request = self
            .client
            .request(method, path)
            .header("X-API-Key", &self.api_key)
            .header("X-Timestamp", timestamp)
            .header("X-Signature", signature);
        if body.is_some() {
            request = request.header(CONTENT_TYPE, "application/json").body(payload);
        }
        self.client.send(request).await
    }

    async fn observe(
        &self,
        payment_id: &str,
        source: TransitionSource,
    ) -> Result<(Transaction, String)> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::BankTransfer, payment_id)
            .await?;
        let payment = self
            .signed(Method::GET, &format!("/payments/{payment_id}"), None)
            .await?;
        let token = self.client.field(&payment, "/status")?.to_string();

        let mut observation = Observation::new(status_map::map(GatewayKind::BankTransfer, &token));
        if let Some(amount) = decimal_at(&payment, "/amount") {
            observation = observation.amount(amount);
        }
        let refunded = decimal_at(&payment, "/refunded_amount");
        let tx = reconcile(
            &self.engine,
            &tx,
            observation.vendor_response(payment),
            refunded,
            source,
        )
        .await?;
        Ok((tx, token))
    }

    /// Banks the rail can currently route to.
    pub async fn supported_banks(&self) -> Result<Vec<SupportedBank>> {
        let response = self.signed(Method::GET, "/banks", None).await?;
        match response.get("banks") {
            Some(banks) => Ok(serde_json::from_value(banks.clone())?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl PaymentGateway for BankTransferGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::BankTransfer
    }

    async fn create(&self, intent: &PaymentIntent) -> Result<CreatedPayment> {
        let validated = validate_intent(intent)?;
        if validated.currency.code() != SETTLEMENT_CURRENCY {
            return Err(PaymentError::Validation(format!(
                "Bank transfer only supports {SETTLEMENT_CURRENCY}, got {}",
                validated.currency
            )));
        }
        let transaction_uuid = NewTransaction::generate_uuid(GatewayKind::BankTransfer);

        let description = if validated.description.is_empty() {
            "Payment"
        } else {
            validated.description.as_str()
        };
        let body = json!({
            "merchant_id": self.merchant_id,
            "reference_id": validated.order_id.clone().unwrap_or_else(|| transaction_uuid.clone()),
            "amount": validated.amount.value(),
            "currency": SETTLEMENT_CURRENCY,
            "description": description,
            "customer": {
                "email": validated.customer_email,
                "name": validated.customer_name,
                "phone": validated.customer_phone,
            },
            "redirect_urls": {
                "success": intent.return_url.clone()
                    .unwrap_or_else(|| format!("{}/payment-success", self.site_url)),
                "failure": format!("{}/payment-failed", self.site_url),
                "cancel": intent.cancel_url.clone()
                    .unwrap_or_else(|| format!("{}/payment-cancel", self.site_url)),
            },
            "metadata": validated.metadata,
        });

        let response = self.signed(Method::POST, "/payments", Some(&body)).await?;
        let payment_id = self.client.field(&response, "/payment_id")?.to_string();
        let text = |key: &str| {
            response
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let continuation = Continuation::BankTransfer {
            payment_id: payment_id.clone(),
            payment_url: text("payment_url"),
            qr_code: text("qr_code"),
            expires_at: response
                .get("expires_at")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };

        let mut metadata = validated.metadata;
        if let Some(order_id) = validated.order_id {
            metadata.insert("order_id".to_string(), order_id);
        }
        if let Continuation::BankTransfer {
            expires_at: Some(expires_at),
            ..
        } = &continuation
        {
            metadata.insert("expires_at".to_string(), expires_at.clone());
        }
        let transaction = self
            .engine
            .open_transaction(NewTransaction {
                transaction_uuid,
                gateway_transaction_id: payment_id,
                gateway: GatewayKind::BankTransfer,
                amount: validated.amount,
                currency: validated.currency,
                customer_email: validated.customer_email,
                customer_name: validated.customer_name,
                customer_phone: validated.customer_phone,
                description: validated.description,
                items: validated.items,
                metadata,
            })
            .await?;

        Ok(CreatedPayment {
            transaction,
            continuation,
        })
    }

    /// Settlement is asynchronous; capturing only re-reads the vendor status.
    async fn capture(&self, payment_id: &str, _params: &CaptureParams) -> Result<TransactionStatus> {
        let (tx, _) = self.observe(payment_id, TransitionSource::Capture).await?;
        Ok(tx.status)
    }

    async fn verify(&self, payment_id: &str) -> Result<TransactionSnapshot> {
        let (tx, token) = self.observe(payment_id, TransitionSource::Poll).await?;
        Ok(TransactionSnapshot::from(&tx).with_vendor_status(token))
    }

    async fn refund(&self, payment_id: &str, request: &RefundRequest) -> Result<Refund> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::BankTransfer, payment_id)
            .await?;
        let refund = self
            .engine
            .open_refund(tx.id, request.amount, &request.reason, request.actor.as_deref())
            .await?;

        let body = json!({
            "payment_id": payment_id,
            "amount": refund.amount.value(),
            "reason": request.reason,
            "reference_id": refund.refund_uuid,
        });
        let response = match self.signed(Method::POST, "/refunds", Some(&body)).await {
            Ok(response) => response,
            Err(error @ PaymentError::Gateway { .. }) => {
                self.engine
                    .abandon_refund(refund.id, &error.to_string())
                    .await?;
                return Err(error);
            }
            Err(error) => return Err(error),
        };

        let vendor_refund_id = self.client.field(&response, "/refund_id")?.to_string();
        let token = response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("pending");
        info!(%payment_id, refund_id = %vendor_refund_id, status = token, "bank transfer refund submitted");

        match status_map::map_refund(GatewayKind::BankTransfer, token) {
            RefundStatus::Completed => {
                self.engine
                    .settle_refund(refund.id, Some(vendor_refund_id), request.actor.as_deref())
                    .await
            }
            RefundStatus::Pending => {
                self.engine
                    .acknowledge_refund(refund.id, &vendor_refund_id)
                    .await
            }
            RefundStatus::Failed => {
                self.engine.abandon_refund(refund.id, token).await?;
                Err(PaymentError::Gateway {
                    gateway: GatewayKind::BankTransfer,
                    message: format!("Refund {token}"),
                })
            }
        }
    }
}
