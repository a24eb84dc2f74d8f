use crate::application::broker::PaymentBroker;
use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::intent::PaymentIntent;
use crate::domain::transaction::GatewayKind;
use crate::error::{PaymentError, Result};
use serde::Serialize;
use serde_json::{Value, json};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

/// The `{success, data | error}` envelope every endpoint answers with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Request boundary over the broker.
///
/// Each call returns an HTTP-equivalent status code with the envelope and
/// leaves an `ApiRequest` entry in the audit trail.
pub struct ApiHandler {
    broker: Arc<PaymentBroker>,
}

impl ApiHandler {
    pub fn new(broker: Arc<PaymentBroker>) -> Self {
        Self { broker }
    }

    pub async fn create_payment(&self, body: &[u8], source_ip: Option<IpAddr>) -> (u16, ApiResponse) {
        let started = Instant::now();
        let result = async {
            let intent: PaymentIntent = serde_json::from_slice(body)
                .map_err(|e| PaymentError::Validation(format!("Invalid request body: {e}")))?;
            let created = self.broker.create(&intent).await?;
            Ok::<_, PaymentError>(serde_json::to_value(created)?)
        }
        .await;
        let request = serde_json::from_slice(body).unwrap_or(Value::Null);
        self.finish("create-payment", request, result, source_ip, started)
            .await
    }

    pub async fn verify_payment(
        &self,
        gateway: &str,
        payment_id: &str,
        source_ip: Option<IpAddr>,
    ) -> (u16, ApiResponse) {
        let started = Instant::now();
        let result = async {
            let kind: GatewayKind = gateway.parse()?;
            let snapshot = self.broker.verify(kind, payment_id).await?;
            Ok::<_, PaymentError>(serde_json::to_value(snapshot)?)
        }
        .await;
        let request = json!({ "gateway": gateway, "payment_id": payment_id });
        self.finish("verify-payment", request, result, source_ip, started)
            .await
    }

    pub async fn webhook(
        &self,
        gateway: &str,
        raw: &[u8],
        signature: Option<&str>,
        source_ip: Option<IpAddr>,
    ) -> (u16, ApiResponse) {
        let started = Instant::now();
        let result = async {
            let kind: GatewayKind = gateway.parse()?;
            let ack = self
                .broker
                .handle_webhook(kind, raw, signature, source_ip)
                .await?;
            Ok::<_, PaymentError>(serde_json::to_value(ack)?)
        }
        .await;
        let request = json!({ "gateway": gateway, "payload_bytes": raw.len() });
        self.finish(&format!("webhook/{gateway}"), request, result, source_ip, started)
            .await
    }

    async fn finish(
        &self,
        endpoint: &str,
        request: Value,
        result: Result<Value>,
        source_ip: Option<IpAddr>,
        started: Instant,
    ) -> (u16, ApiResponse) {
        let (status_code, response) = match result {
            Ok(data) => (200, ApiResponse::ok(data)),
            Err(error) => (error.status_code(), ApiResponse::error(error.public_message())),
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.broker
            .engine()
            .audit(
                AuditEvent::new(AuditKind::ApiRequest {
                    endpoint: endpoint.to_string(),
                    status_code,
                    duration_ms,
                })
                .source_ip(source_ip)
                .detail(json!({
                    "request": request,
                    "response": response,
                })),
            )
            .await;
        (status_code, response)
    }
}
