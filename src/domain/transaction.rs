use super::money::{Amount, Currency};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The payment channels the broker can route to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Card,
    Wallet,
    BankTransfer,
    Manual,
}

impl GatewayKind {
    pub const ALL: [GatewayKind; 4] = [
        GatewayKind::Card,
        GatewayKind::Wallet,
        GatewayKind::BankTransfer,
        GatewayKind::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Card => "card",
            GatewayKind::Wallet => "wallet",
            GatewayKind::BankTransfer => "bank_transfer",
            GatewayKind::Manual => "manual",
        }
    }
}

impl FromStr for GatewayKind {
    type Err = PaymentError;

    /// Accepts canonical names and the vendor names callers commonly send.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card" | "stripe" => Ok(GatewayKind::Card),
            "wallet" | "paypal" => Ok(GatewayKind::Wallet),
            "bank_transfer" | "instapay" => Ok(GatewayKind::BankTransfer),
            "manual" | "cash" => Ok(GatewayKind::Manual),
            _ => Err(PaymentError::UnsupportedGateway(s.to_string())),
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 6] = [
        TransactionStatus::Pending,
        TransactionStatus::Processing,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
        TransactionStatus::Cancelled,
        TransactionStatus::Refunded,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store-assigned transaction key.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned refund key.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RefundId(pub u64);

impl fmt::Display for RefundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LineItem {
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

fn default_quantity() -> u32 {
    1
}

/// A transaction as it is about to be inserted, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub transaction_uuid: String,
    pub gateway_transaction_id: String,
    pub gateway: GatewayKind,
    pub amount: Amount,
    pub currency: Currency,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub description: String,
    pub items: Vec<LineItem>,
    pub metadata: BTreeMap<String, String>,
}

impl NewTransaction {
    /// Generates an adapter-prefixed, globally unique transaction uuid.
    pub fn generate_uuid(gateway: GatewayKind) -> String {
        format!("{}_{}", gateway.as_str(), uuid::Uuid::new_v4().simple())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub transaction_uuid: String,
    pub gateway_transaction_id: String,
    pub gateway: GatewayKind,
    pub amount: Amount,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub description: String,
    pub items: Vec<LineItem>,
    pub metadata: BTreeMap<String, String>,
    pub gateway_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub refund_amount: Option<Decimal>,
}

impl Transaction {
    /// Materializes a freshly inserted record in `pending`.
    pub fn from_new(id: TransactionId, new: NewTransaction, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            transaction_uuid: new.transaction_uuid,
            gateway_transaction_id: new.gateway_transaction_id,
            gateway: new.gateway,
            amount: new.amount,
            currency: new.currency,
            status: TransactionStatus::Pending,
            customer_email: new.customer_email,
            customer_name: new.customer_name,
            customer_phone: new.customer_phone,
            description: new.description,
            items: new.items,
            metadata: new.metadata,
            gateway_response: None,
            created_at,
            processed_at: None,
            refund_amount: None,
        }
    }

    pub fn refunded_total(&self) -> Decimal {
        self.refund_amount.unwrap_or(Decimal::ZERO)
    }

    /// Applies a patch in place. Stores call this under their CAS guard.
    pub fn apply(&mut self, patch: &TransactionPatch) {
        self.status = patch.status;
        if let Some(processed_at) = patch.processed_at {
            self.processed_at = Some(processed_at);
        }
        if let Some(response) = &patch.gateway_response {
            self.gateway_response = Some(response.clone());
        }
        if let Some(refund_amount) = patch.refund_amount {
            self.refund_amount = Some(refund_amount);
        }
        for (key, value) in &patch.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }
}

/// The mutation applied by a guarded status update.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPatch {
    pub status: TransactionStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub gateway_response: Option<serde_json::Value>,
    pub refund_amount: Option<Decimal>,
    pub metadata: BTreeMap<String, String>,
}

impl TransactionPatch {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status,
            processed_at: None,
            gateway_response: None,
            refund_amount: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Read-only view returned by `verify`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionSnapshot {
    pub transaction_id: TransactionId,
    pub transaction_uuid: String,
    pub payment_id: String,
    pub gateway: GatewayKind,
    pub status: TransactionStatus,
    pub amount: Amount,
    pub currency: Currency,
    pub customer_name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub refund_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_status: Option<String>,
}

impl From<&Transaction> for TransactionSnapshot {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            transaction_uuid: tx.transaction_uuid.clone(),
            payment_id: tx.gateway_transaction_id.clone(),
            gateway: tx.gateway,
            status: tx.status,
            amount: tx.amount,
            currency: tx.currency.clone(),
            customer_name: tx.customer_name.clone(),
            description: tx.description.clone(),
            created_at: tx.created_at,
            processed_at: tx.processed_at,
            refund_amount: tx.refund_amount,
            vendor_status: None,
        }
    }
}

impl TransactionSnapshot {
    pub fn with_vendor_status(mut self, token: impl Into<String>) -> Self {
        self.vendor_status = Some(token.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRefund {
    pub transaction_id: TransactionId,
    pub refund_uuid: String,
    pub amount: Amount,
    pub currency: Currency,
    pub reason: String,
    pub requested_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Refund {
    pub id: RefundId,
    pub transaction_id: TransactionId,
    pub refund_uuid: String,
    pub amount: Amount,
    pub currency: Currency,
    pub reason: String,
    pub status: RefundStatus,
    pub gateway_refund_id: Option<String>,
    pub requested_by: Option<String>,
    pub processed_by: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Refund {
    pub fn from_new(id: RefundId, new: NewRefund, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            transaction_id: new.transaction_id,
            refund_uuid: new.refund_uuid,
            amount: new.amount,
            currency: new.currency,
            reason: new.reason,
            status: RefundStatus::Pending,
            gateway_refund_id: None,
            requested_by: new.requested_by,
            processed_by: None,
            failure_reason: None,
            created_at,
            processed_at: None,
        }
    }

    pub fn apply(&mut self, patch: &RefundPatch) {
        self.status = patch.status;
        if let Some(gateway_refund_id) = &patch.gateway_refund_id {
            self.gateway_refund_id = Some(gateway_refund_id.clone());
        }
        if let Some(processed_by) = &patch.processed_by {
            self.processed_by = Some(processed_by.clone());
        }
        if let Some(failure_reason) = &patch.failure_reason {
            self.failure_reason = Some(failure_reason.clone());
        }
        if let Some(processed_at) = patch.processed_at {
            self.processed_at = Some(processed_at);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundPatch {
    pub status: RefundStatus,
    pub gateway_refund_id: Option<String>,
    pub processed_by: Option<String>,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl RefundPatch {
    pub fn status(status: RefundStatus) -> Self {
        Self {
            status,
            gateway_refund_id: None,
            processed_by: None,
            failure_reason: None,
            processed_at: None,
        }
    }
}

/// Outcome of an atomic refund reservation.
#[derive(Debug, Clone, PartialEq)]
pub enum RefundReservation {
    Reserved(Refund),
    InProgress,
    ExceedsBalance { available: Decimal },
}

/// Sum of completed refunds.
pub fn completed_total(refunds: &[Refund]) -> Decimal {
    refunds
        .iter()
        .filter(|r| r.status == RefundStatus::Completed)
        .map(|r| r.amount.value())
        .sum()
}
