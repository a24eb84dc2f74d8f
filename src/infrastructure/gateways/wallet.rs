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
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const SANDBOX_API_BASE: &str = "https://api-m.sandbox.paypal.com";
pub const LIVE_API_BASE: &str = "https://api-m.paypal.com";
/// Tokens are refreshed this long before the vendor-reported expiry.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);
const CAPTURE_POINTER: &str = "/purchase_units/0/payments/captures/0";

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Redirect-based wallet speaking the orders protocol.
///
/// The buyer approves the order off-site; the merchant then captures it.
/// Every call carries a bearer token from a client-credentials exchange,
/// cached until shortly before it expires.
pub struct WalletGateway {
    client: VendorClient,
    client_id: String,
    secret: String,
    brand_name: String,
    site_url: String,
    token: RwLock<Option<AccessToken>>,
    engine: Arc<ReconciliationEngine>,
}

impl WalletGateway {
    pub fn new(
        credentials: &Credentials,
        timeout: Duration,
        brand_name: &str,
        site_url: &str,
        engine: Arc<ReconciliationEngine>,
    ) -> Result<Self> {
        let client_id = credentials.require(GatewayKind::Wallet, "client_id")?;
        let secret = credentials.require(GatewayKind::Wallet, "secret")?;
        let base = match credentials.get(GatewayKind::Wallet, "api_base") {
            Some(base) => base,
            None if credentials.get(GatewayKind::Wallet, "environment") == Some("live") => {
                LIVE_API_BASE
            }
            None => SANDBOX_API_BASE,
        };
        Ok(Self {
            client: VendorClient::new(GatewayKind::Wallet, base, timeout)?,
            client_id: client_id.to_string(),
            secret: secret.to_string(),
            brand_name: brand_name.to_string(),
            site_url: site_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
            engine,
        })
    }

    async fn access_token(&self, refresh: bool) -> Result<String> {
        if !refresh
            && let Some(token) = self.token.read().await.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        let mut slot = self.token.write().await;
        let response = self
            .client
            .send(
                self.client
                    .request(Method::POST, "/v1/oauth2/token")
                    .basic_auth(&self.client_id, Some(&self.secret))
                    .form(&[("grant_type", "client_credentials")]),
            )
            .await?;
        let value = self.client.field(&response, "/access_token")?.to_string();
        let lifetime = response
            .get("expires_in")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));
        debug!(expires_in = lifetime.as_secs(), "wallet access token issued");

        *slot = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_MARGIN),
        });
        Ok(value)
    }

    /// Authenticated call; a rejected token is refreshed once.
    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut refresh = false;
        loop {
            let token = self.access_token(refresh).await?;
            let mut request = self
                .client
                .request(method.clone(), path)
                .bearer_auth(token)
                .header("PayPal-Request-Id", &request_id);
            if let Some(body) = body {
                request = request.json(body);
            }

            let (status, response) = self.client.send_raw(request).await?;
            if status == StatusCode::UNAUTHORIZED && !refresh {
                debug!("wallet token rejected, refreshing");
                refresh = true;
                continue;
            }
            return self.client.check(status, response);
        }
    }

    /// Maps an order (or capture) response into an observation.
    fn observation(&self, order: Value) -> Result<Observation> {
        let capture = order.pointer(CAPTURE_POINTER);
        let token = match capture.and_then(|c| c.get("status")).and_then(Value::as_str) {
            Some(capture_status) => capture_status,
            None => self.client.field(&order, "/status")?,
        };

        let mut observation = Observation::new(status_map::map(GatewayKind::Wallet, token));
        if let Some(capture) = capture {
            if let Some(id) = capture.get("id").and_then(Value::as_str) {
                observation = observation.metadata("capture_id", id);
            }
            if let Some(amount) = decimal_at(capture, "/amount/value") {
                observation = observation.amount(amount);
            }
        }
        Ok(observation.vendor_response(order))
    }

    async fn observe(&self, tx: &Transaction, order: Value, source: TransitionSource) -> Result<(Transaction, String)> {
        let token = order
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let observation = self.observation(order)?;
        let tx = reconcile(&self.engine, tx, observation, None, source).await?;
        Ok((tx, token))
    }
}

#[async_trait]
impl PaymentGateway for WalletGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Wallet
    }

    async fn create(&self, intent: &PaymentIntent) -> Result<CreatedPayment> {
        let validated = validate_intent(intent)?;
        let transaction_uuid = NewTransaction::generate_uuid(GatewayKind::Wallet);

        let items: Vec<Value> = validated
            .items
            .iter()
            .filter_map(|item| {
                let unit_price = item.unit_price?;
                Some(json!({
                    "name": item.name,
                    "quantity": item.quantity.to_string(),
                    "unit_amount": {
                        "currency_code": validated.currency.code(),
                        "value": crate::domain::money::to_minor_precision(unit_price).to_string(),
                    },
                }))
            })
            .collect();
        let mut purchase_unit = json!({
            "reference_id": validated.order_id.clone().unwrap_or_else(|| transaction_uuid.clone()),
            "custom_id": transaction_uuid,
            "description": validated.description,
            "amount": {
                "currency_code": validated.currency.code(),
                "value": validated.amount.to_string(),
            },
        });
        if !items.is_empty() {
            purchase_unit["items"] = Value::Array(items);
            purchase_unit["amount"]["breakdown"] = json!({
                "item_total": {
                    "currency_code": validated.currency.code(),
                    "value": validated.amount.to_string(),
                }
            });
        }

        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [purchase_unit],
            "application_context": {
                "brand_name": self.brand_name,
                "user_action": "PAY_NOW",
                "shipping_preference": "NO_SHIPPING",
                "return_url": intent.return_url.clone()
                    .unwrap_or_else(|| format!("{}/payment-success", self.site_url)),
                "cancel_url": intent.cancel_url.clone()
                    .unwrap_or_else(|| format!("{}/payment-cancel", self.site_url)),
            },
        });

        let response = self.call(Method::POST, "/v2/checkout/orders", Some(&body)).await?;
        let order_id = self.client.field(&response, "/id")?.to_string();
        let approve_url = response
            .get("links")
            .and_then(Value::as_array)
            .and_then(|links| {
                links.iter().find(|link| {
                    matches!(
                        link.get("rel").and_then(Value::as_str),
                        Some("approve" | "payer-action")
                    )
                })
            })
            .and_then(|link| link.get("href"))
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::Gateway {
                gateway: GatewayKind::Wallet,
                message: "order response has no approval link".to_string(),
            })?
            .to_string();

        let mut metadata = validated.metadata;
        if let Some(order_ref) = validated.order_id {
            metadata.insert("order_id".to_string(), order_ref);
        }
        if let Some(bank) = intent.bank.as_deref().filter(|b| !b.is_empty()) {
            metadata.insert("preferred_bank".to_string(), bank.to_string());
        }
        let transaction = self
            .engine
            .open_transaction(NewTransaction {
                transaction_uuid,
                gateway_transaction_id: order_id.clone(),
                gateway: GatewayKind::Wallet,
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
            continuation: Continuation::Redirect {
                order_id,
                approve_url,
            },
        })
    }

    async fn capture(&self, payment_id: &str, _params: &CaptureParams) -> Result<TransactionStatus> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::Wallet, payment_id)
            .await?;
        if tx.status.is_terminal() {
            return Ok(tx.status);
        }

        let response = self
            .call(
                Method::POST,
                &format!("/v2/checkout/orders/{payment_id}/capture"),
                Some(&json!({})),
            )
            .await?;
        let (tx, token) = self.observe(&tx, response, TransitionSource::Capture).await?;
        info!(%payment_id, vendor_status = %token, status = %tx.status, "wallet order captured");
        Ok(tx.status)
    }

    async fn verify(&self, payment_id: &str) -> Result<TransactionSnapshot> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::Wallet, payment_id)
            .await?;
        let order = self
            .call(Method::GET, &format!("/v2/checkout/orders/{payment_id}"), None)
            .await?;
        let (tx, token) = self.observe(&tx, order, TransitionSource::Poll).await?;
        Ok(TransactionSnapshot::from(&tx).with_vendor_status(token))
    }

    async fn refund(&self, payment_id: &str, request: &RefundRequest) -> Result<Refund> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::Wallet, payment_id)
            .await?;
        let capture_id = tx.metadata.get("capture_id").cloned().ok_or_else(|| {
            PaymentError::Validation(format!(
                "Wallet payment {payment_id} has not been captured"
            ))
        })?;
        let refund = self
            .engine
            .open_refund(tx.id, request.amount, &request.reason, request.actor.as_deref())
            .await?;

        let mut body = json!({
            "amount": {
                "value": refund.amount.to_string(),
                "currency_code": tx.currency.code(),
            },
            "invoice_id": refund.refund_uuid,
        });
        if !request.reason.is_empty() {
            body["note_to_payer"] = Value::String(request.reason.chars().take(255).collect());
        }

        let response = match self
            .call(
                Method::POST,
                &format!("/v2/payments/captures/{capture_id}/refund"),
                Some(&body),
            )
            .await
        {
            Ok(response) => response,
            Err(error @ PaymentError::Gateway { .. }) => {
                self.engine
                    .abandon_refund(refund.id, &error.to_string())
                    .await?;
                return Err(error);
            }
            Err(error) => return Err(error),
        };

        let vendor_refund_id = self.client.field(&response, "/id")?.to_string();
        let token = response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("PENDING");
        info!(%payment_id, refund_id = %vendor_refund_id, status = token, "wallet refund submitted");

        match status_map::map_refund(GatewayKind::Wallet, token) {
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
                    gateway: GatewayKind::Wallet,
                    message: format!("Refund {token}"),
                })
            }
        }
    }
}
