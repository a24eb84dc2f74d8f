use super::{VendorClient, minor_units_at, reconcile};
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
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";
const API_VERSION: &str = "2023-10-16";
const VENDOR_REFUND_REASONS: [&str; 3] = ["duplicate", "fraudulent", "requested_by_customer"];

/// Card processor speaking the payment-intent protocol.
///
/// `create` opens an intent the client confirms with its `client_secret`;
/// the outcome arrives through `capture`, `verify` or a webhook.
pub struct CardGateway {
    client: VendorClient,
    secret_key: String,
    engine: Arc<ReconciliationEngine>,
}

impl CardGateway {
    pub fn new(
        credentials: &Credentials,
        timeout: Duration,
        engine: Arc<ReconciliationEngine>,
    ) -> Result<Self> {
        let secret_key = credentials.require(GatewayKind::Card, "secret_key")?;
        let base = credentials
            .get(GatewayKind::Card, "api_base")
            .unwrap_or(DEFAULT_API_BASE);
        Ok(Self {
            client: VendorClient::new(GatewayKind::Card, base, timeout)?,
            secret_key: secret_key.to_string(),
            engine,
        })
    }

    fn authed(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, path)
            .bearer_auth(&self.secret_key)
            .header("Stripe-Version", API_VERSION)
    }

    async fn retrieve(&self, payment_id: &str) -> Result<Value> {
        self.client
            .send(self.authed(Method::GET, &format!("/v1/payment_intents/{payment_id}")))
            .await
    }

    /// Fetches the intent and reconciles the local record with it.
    async fn observe(
        &self,
        payment_id: &str,
        source: TransitionSource,
    ) -> Result<(Transaction, String)> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::Card, payment_id)
            .await?;
        let intent = self.retrieve(payment_id).await?;
        let token = self.client.field(&intent, "/status")?.to_string();

        let mut observation = Observation::new(status_map::map(GatewayKind::Card, &token));
        if let Some(amount) = minor_units_at(&intent, "/amount") {
            observation = observation.amount(amount);
        }
        let refunded = minor_units_at(&intent, "/latest_charge/amount_refunded");
        let tx = reconcile(
            &self.engine,
            &tx,
            observation.vendor_response(intent),
            refunded,
            source,
        )
        .await?;
        Ok((tx, token))
    }
}

#[async_trait]
impl PaymentGateway for CardGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Card
    }

    async fn create(&self, intent: &PaymentIntent) -> Result<CreatedPayment> {
        let validated = validate_intent(intent)?;
        let minor_units = validated.amount.to_minor_units()?;

        let mut form = vec![
            ("amount".to_string(), minor_units.to_string()),
            ("currency".to_string(), validated.currency.lowercase()),
            ("payment_method_types[]".to_string(), "card".to_string()),
            ("description".to_string(), validated.description.clone()),
            (
                "metadata[customer_email]".to_string(),
                validated.customer_email.clone(),
            ),
        ];
        if let Some(order_id) = &validated.order_id {
            form.push(("metadata[order_id]".to_string(), order_id.clone()));
        }
        for (key, value) in &validated.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let response = self
            .client
            .send(self.authed(Method::POST, "/v1/payment_intents").form(&form))
            .await?;
        let intent_id = self.client.field(&response, "/id")?.to_string();
        let client_secret = self.client.field(&response, "/client_secret")?.to_string();

        let mut metadata = validated.metadata;
        if let Some(order_id) = validated.order_id {
            metadata.insert("order_id".to_string(), order_id);
        }
        let transaction = self
            .engine
            .open_transaction(NewTransaction {
                transaction_uuid: NewTransaction::generate_uuid(GatewayKind::Card),
                gateway_transaction_id: intent_id.clone(),
                gateway: GatewayKind::Card,
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
            continuation: Continuation::ClientSecret {
                client_secret,
                payment_intent_id: intent_id,
            },
        })
    }

    async fn capture(&self, payment_id: &str, _params: &CaptureParams) -> Result<TransactionStatus> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::Card, payment_id)
            .await?;
        if tx.status.is_terminal() {
            return Ok(tx.status);
        }
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
            .transaction_by_payment(GatewayKind::Card, payment_id)
            .await?;
        let refund = self
            .engine
            .open_refund(tx.id, request.amount, &request.reason, request.actor.as_deref())
            .await?;

        let vendor_reason = if VENDOR_REFUND_REASONS.contains(&request.reason.as_str()) {
            request.reason.as_str()
        } else {
            "requested_by_customer"
        };
        let minor_units = refund.amount.to_minor_units()?;
        let form = [
            ("payment_intent", payment_id.to_string()),
            ("amount", minor_units.to_string()),
            ("reason", vendor_reason.to_string()),
            ("metadata[refund_uuid]", refund.refund_uuid.clone()),
        ];

        let response = match self
            .client
            .send(self.authed(Method::POST, "/v1/refunds").form(&form))
            .await
        {
            Ok(response) => response,
            Err(error @ PaymentError::Gateway { .. }) => {
                self.engine
                    .abandon_refund(refund.id, &error.to_string())
                    .await?;
                return Err(error);
            }
            // Outcome unknown; the reservation stays pending until a webhook settles it.
            Err(error) => return Err(error),
        };

        let vendor_refund_id = self.client.field(&response, "/id")?.to_string();
        let token = response
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("pending");
        info!(%payment_id, refund_id = %vendor_refund_id, status = token, "card refund submitted");

        match status_map::map_refund(GatewayKind::Card, token) {
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
                let reason = response
                    .get("failure_reason")
                    .and_then(Value::as_str)
                    .unwrap_or(token);
                warn!(%payment_id, reason, "card refund declined");
                self.engine.abandon_refund(refund.id, reason).await?;
                Err(PaymentError::Gateway {
                    gateway: GatewayKind::Card,
                    message: format!("Refund declined: {reason}"),
                })
            }
        }
    }
}
