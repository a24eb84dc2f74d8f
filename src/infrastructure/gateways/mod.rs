//! Gateway adapters, one per payment channel.
//!
//! Vendor adapters share [`VendorClient`] for outbound HTTP and
//! [`reconcile`] for feeding vendor observations into the engine.

pub mod bank_transfer;
pub mod card;
pub mod manual;
pub mod wallet;

use crate::application::engine::{Observation, ReconciliationEngine};
use crate::domain::lifecycle::TransitionSource;
use crate::domain::transaction::{GatewayKind, Transaction, TransactionStatus};
use crate::error::{PaymentError, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Outbound HTTP to one vendor, with a bounded timeout.
#[derive(Clone)]
pub struct VendorClient {
    gateway: GatewayKind,
    http: reqwest::Client,
    base_url: String,
}

impl VendorClient {
    pub fn new(gateway: GatewayKind, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            gateway,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn gateway(&self) -> GatewayKind {
        self.gateway
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path.trim_start_matches('/')))
    }

    /// Sends a request and returns the status with the decoded body.
    ///
    /// Network failures and timeouts become `GatewayUnavailable`.
    pub async fn send_raw(&self, request: RequestBuilder) -> Result<(StatusCode, Value)> {
        let response = request.send().await.map_err(|e| self.unavailable(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.unavailable(&e))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        debug!(gateway = %self.gateway, %status, "vendor response");
        Ok((status, body))
    }

    /// Sends a request and fails on any non-success status.
    pub async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let (status, body) = self.send_raw(request).await?;
        self.check(status, body)
    }

    /// Maps a vendor reply to the body or a uniform gateway error.
    pub fn check(&self, status: StatusCode, body: Value) -> Result<Value> {
        if status.is_success() {
            return Ok(body);
        }
        let message = vendor_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
        warn!(gateway = %self.gateway, %status, %message, "vendor rejected request");
        if status.is_server_error() {
            Err(PaymentError::GatewayUnavailable {
                gateway: self.gateway,
                message,
            })
        } else {
            Err(PaymentError::Gateway {
                gateway: self.gateway,
                message,
            })
        }
    }

    fn unavailable(&self, error: &reqwest::Error) -> PaymentError {
        warn!(gateway = %self.gateway, %error, timeout = error.is_timeout(), "vendor unreachable");
        PaymentError::GatewayUnavailable {
            gateway: self.gateway,
            message: if error.is_timeout() {
                "request timed out".to_string()
            } else {
                error.to_string()
            },
        }
    }

    /// A response field the adapter cannot work without.
    pub fn field<'a>(&self, body: &'a Value, pointer: &str) -> Result<&'a str> {
        body.pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PaymentError::Gateway {
                gateway: self.gateway,
                message: format!("response missing {pointer}"),
            })
    }
}

/// Best-effort extraction of the vendor's human readable error.
fn vendor_message(body: &Value) -> Option<String> {
    [
        "/error/message",
        "/details/0/description",
        "/message",
        "/error_description",
        "/error",
    ]
    .iter()
    .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
    .map(str::to_string)
}

/// Reads a decimal amount the vendor sent as a number or a string.
pub(crate) fn decimal_at(body: &Value, pointer: &str) -> Option<Decimal> {
    match body.pointer(pointer)? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads an integer minor-unit amount (cents).
pub(crate) fn minor_units_at(body: &Value, pointer: &str) -> Option<Decimal> {
    body.pointer(pointer)
        .and_then(Value::as_i64)
        .map(|units| Decimal::new(units, 2))
}

/// Feeds one vendor observation into the engine and returns the fresh record.
///
/// Safe to call arbitrarily often: a vendor `pending` carries no information,
/// and a locally settled transaction only accepts the move to `refunded`.
/// Metadata the settled record is still missing is filled in.
pub(crate) async fn reconcile(
    engine: &ReconciliationEngine,
    tx: &Transaction,
    observation: Observation,
    refunded_total: Option<Decimal>,
    source: TransitionSource,
) -> Result<Transaction> {
    let requested = observation.status;
    if requested == TransactionStatus::Pending {
        return Ok(tx.clone());
    }

    let refund_edge =
        tx.status == TransactionStatus::Completed && requested == TransactionStatus::Refunded;
    if tx.status.is_terminal() && !refund_edge {
        if tx.status != requested {
            warn!(
                transaction_id = %tx.id,
                local = %tx.status,
                vendor = %requested,
                %source,
                "vendor status disagrees with settled transaction"
            );
        }
        return engine.backfill_metadata(tx.id, &observation.metadata).await;
    }

    if requested == TransactionStatus::Refunded {
        let total = refunded_total.unwrap_or(tx.amount.value());
        return engine.reconcile_vendor_refund(tx.id, total, None).await;
    }

    engine.apply_transition(tx.id, observation, source).await?;
    engine.transaction(tx.id).await
}
