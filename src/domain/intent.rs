use super::money::{Amount, Currency};
use super::transaction::{LineItem, Transaction};
use crate::error::{PaymentError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BankAccount {
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    #[serde(default)]
    pub branch: Option<String>,
}

/// An inbound `create` request as callers send it.
///
/// Fields stay loosely typed (`amount` is raw JSON) so validation can report
/// exactly what was wrong instead of failing deserialization.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct PaymentIntent {
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub amount: serde_json::Value,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Preferred bank for the wallet flow.
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub bank_accounts: Vec<BankAccount>,
    #[serde(default)]
    pub payment_centers: Vec<String>,
    #[serde(default)]
    pub pickup_location: Option<String>,
    #[serde(default)]
    pub pickup_hours: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// A `create` request that passed the shared checks every adapter runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedIntent {
    pub amount: Amount,
    pub currency: Currency,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub description: String,
    pub order_id: Option<String>,
    pub items: Vec<LineItem>,
    pub metadata: BTreeMap<String, String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Shared validation reused by every adapter's `create`.
pub fn validate_intent(intent: &PaymentIntent) -> Result<ValidatedIntent> {
    if intent.amount.is_null() {
        return Err(PaymentError::Validation(
            "Missing required field: amount".to_string(),
        ));
    }
    let amount = Amount::from_json(&intent.amount)?;

    let currency = non_empty(&intent.currency)
        .ok_or_else(|| PaymentError::Validation("Missing required field: currency".to_string()))
        .and_then(Currency::parse)?;

    let customer_email = non_empty(&intent.customer_email).ok_or_else(|| {
        PaymentError::Validation("Missing required field: customer_email".to_string())
    })?;
    if !customer_email.contains('@') {
        return Err(PaymentError::Validation(format!(
            "Invalid customer_email: {customer_email}"
        )));
    }

    Ok(ValidatedIntent {
        amount,
        currency,
        customer_email: customer_email.to_string(),
        customer_name: non_empty(&intent.customer_name).unwrap_or_default().to_string(),
        customer_phone: non_empty(&intent.customer_phone).unwrap_or_default().to_string(),
        description: non_empty(&intent.description).unwrap_or_default().to_string(),
        order_id: non_empty(&intent.order_id).map(str::to_string),
        items: intent.items.clone(),
        metadata: intent.metadata.clone(),
    })
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SlipCustomer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Printable slip handed to a customer paying over the counter.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentSlip {
    pub header: String,
    pub reference_number: String,
    pub date: String,
    pub customer: SlipCustomer,
    pub amount: String,
    pub currency: String,
    pub description: String,
    pub instructions: String,
    pub footer: String,
}

/// What the caller needs to finish an off-process payment step.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Continuation {
    ClientSecret {
        client_secret: String,
        payment_intent_id: String,
    },
    Redirect {
        order_id: String,
        approve_url: String,
    },
    BankTransfer {
        payment_id: String,
        payment_url: String,
        qr_code: String,
        expires_at: Option<String>,
    },
    Instructions {
        reference: String,
        instructions: String,
        expires_on: NaiveDate,
        slip: PaymentSlip,
    },
}

/// Result of a successful `create`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CreatedPayment {
    pub transaction: Transaction,
    pub continuation: Continuation,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CaptureAction {
    Confirm,
    Cancel,
}

impl CaptureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureAction::Confirm => "confirm",
            CaptureAction::Cancel => "cancel",
        }
    }
}

/// Parameters of the explicit second step (`capture`).
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct CaptureParams {
    #[serde(default)]
    pub action: Option<CaptureAction>,
    /// Staff member attributed with the action.
    #[serde(default, alias = "confirmed_by")]
    pub actor: Option<String>,
    /// Amount staff actually received; checked against the recorded amount.
    #[serde(default)]
    pub amount_received: Option<Amount>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CaptureParams {
    pub fn confirm(actor: impl Into<String>) -> Self {
        Self {
            action: Some(CaptureAction::Confirm),
            actor: Some(actor.into()),
            ..Default::default()
        }
    }

    pub fn cancel(actor: impl Into<String>) -> Self {
        Self {
            action: Some(CaptureAction::Cancel),
            actor: Some(actor.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct RefundRequest {
    /// Defaults to the full transaction amount.
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub actor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn intent() -> PaymentIntent {
        PaymentIntent {
            gateway: "card".into(),
            amount: json!("19.994"),
            currency: Some("usd".into()),
            customer_email: Some("buyer@example.com".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_rounds_and_normalizes() {
        let validated = validate_intent(&intent()).unwrap();
        assert_eq!(validated.amount.value(), dec!(19.99));
        assert_eq!(validated.currency.code(), "USD");
        assert_eq!(validated.customer_email, "buyer@example.com");
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut missing_email = intent();
        missing_email.customer_email = Some("  ".into());
        assert!(matches!(
            validate_intent(&missing_email),
            Err(PaymentError::Validation(msg)) if msg.contains("customer_email")
        ));

        let mut missing_currency = intent();
        missing_currency.currency = None;
        assert!(matches!(
            validate_intent(&missing_currency),
            Err(PaymentError::Validation(msg)) if msg.contains("currency")
        ));

        let mut missing_amount = intent();
        missing_amount.amount = serde_json::Value::Null;
        assert!(validate_intent(&missing_amount).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_amounts() {
        for bad in [json!(0), json!(-5), json!("ten"), json!([1])] {
            let mut request = intent();
            request.amount = bad;
            assert!(matches!(
                validate_intent(&request),
                Err(PaymentError::InvalidAmount(_))
            ));
        }
    }

    #[test]
    fn test_capture_params_accept_confirmed_by() {
        let params: CaptureParams =
            serde_json::from_value(json!({"action": "confirm", "confirmed_by": "clerk-7"})).unwrap();
        assert_eq!(params.action, Some(CaptureAction::Confirm));
        assert_eq!(params.actor.as_deref(), Some("clerk-7"));
    }
}
