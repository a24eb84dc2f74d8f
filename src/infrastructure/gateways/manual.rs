use crate::application::engine::{Observation, ReconciliationEngine};
use crate::domain::intent::{
    BankAccount, CaptureAction, CaptureParams, Continuation, CreatedPayment, PaymentIntent,
    PaymentSlip, RefundRequest, SlipCustomer, validate_intent,
};
use crate::domain::lifecycle::TransitionSource;
use crate::domain::ports::PaymentGateway;
use crate::domain::transaction::{
    GatewayKind, NewTransaction, Refund, RefundId, Transaction, TransactionSnapshot,
    TransactionStatus,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Days a customer has to pay before the reference lapses.
pub const PAYMENT_WINDOW_DAYS: u64 = 3;
const DEFAULT_PICKUP_HOURS: &str = "9:00 AM - 6:00 PM";

/// Cash and over-the-counter payments confirmed by staff.
///
/// No vendor is involved: the reference is generated locally and the
/// transaction only moves when a staff member confirms or cancels it.
pub struct ManualGateway {
    engine: Arc<ReconciliationEngine>,
    site_name: String,
}

impl ManualGateway {
    pub fn new(engine: Arc<ReconciliationEngine>, site_name: &str) -> Self {
        Self {
            engine,
            site_name: site_name.to_string(),
        }
    }

    fn reference(today: NaiveDate) -> String {
        let suffix: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(12)
            .collect();
        format!("CASH-{}-{}", today.format("%Y%m%d"), suffix.to_ascii_uppercase())
    }

    fn slip(&self, tx: &Transaction) -> PaymentSlip {
        PaymentSlip {
            header: format!("{} - Payment Slip", self.site_name),
            reference_number: tx.gateway_transaction_id.clone(),
            date: tx.created_at.format("%B %-d, %Y").to_string(),
            customer: SlipCustomer {
                name: tx.customer_name.clone(),
                email: tx.customer_email.clone(),
                phone: tx.customer_phone.clone(),
            },
            amount: group_thousands(&tx.amount.to_string()),
            currency: tx.currency.code().to_string(),
            description: tx.description.clone(),
            instructions: tx.metadata.get("instructions").cloned().unwrap_or_default(),
            footer: format!(
                "This payment slip is valid for {PAYMENT_WINDOW_DAYS} days from date of issue."
            ),
        }
    }

    /// Regenerates the printable slip for a cash payment.
    pub async fn payment_slip(&self, payment_id: &str) -> Result<PaymentSlip> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::Manual, payment_id)
            .await?;
        Ok(self.slip(&tx))
    }

    /// Staff hand over a pending cash refund.
    pub async fn complete_refund(&self, refund_id: RefundId, actor: &str) -> Result<Refund> {
        if actor.trim().is_empty() {
            return Err(PaymentError::Validation(
                "Completing a cash refund requires an actor".to_string(),
            ));
        }
        let refund = self.engine.refund(refund_id).await?;
        let tx = self.engine.transaction(refund.transaction_id).await?;
        if tx.gateway != GatewayKind::Manual {
            return Err(PaymentError::Validation(format!(
                "Refund {} belongs to a {} payment",
                refund.refund_uuid, tx.gateway
            )));
        }
        let refund = self.engine.settle_refund(refund_id, None, Some(actor)).await?;
        info!(%refund_id, actor, "cash refund handed over");
        Ok(refund)
    }
}

/// Customer-facing payment instructions.
pub fn payment_instructions(intent: &PaymentIntent, reference: &str) -> String {
    let mut lines = vec![
        "Please make your payment using one of the following methods:".to_string(),
        String::new(),
    ];

    if !intent.bank_accounts.is_empty() {
        lines.push("BANK DEPOSIT:".to_string());
        for BankAccount {
            bank_name,
            account_number,
            account_name,
            branch,
        } in &intent.bank_accounts
        {
            lines.push(format!("• {bank_name} - {account_number}"));
            lines.push(format!("  Account Name: {account_name}"));
            if let Some(branch) = branch {
                lines.push(format!("  Branch: {branch}"));
            }
            lines.push(String::new());
        }
    }

    let centers = if intent.payment_centers.is_empty() {
        "authorized payment center".to_string()
    } else {
        intent.payment_centers.join(", ")
    };
    lines.push("OVER-THE-COUNTER PAYMENT:".to_string());
    lines.push(format!("• You can pay at any {centers}"));
    lines.push(format!("• Present your reference number: {reference}"));
    lines.push(String::new());

    if let Some(location) = intent.pickup_location.as_deref().filter(|l| !l.is_empty()) {
        lines.push("CASH ON PICKUP:".to_string());
        lines.push(format!("• Location: {location}"));
        lines.push(format!(
            "• Hours: {}",
            intent.pickup_hours.as_deref().unwrap_or(DEFAULT_PICKUP_HOURS)
        ));
        lines.push(String::new());
    }

    lines.push("IMPORTANT:".to_string());
    lines.push("• Keep your payment receipt".to_string());
    lines.push(format!(
        "• Payment must be made within {PAYMENT_WINDOW_DAYS} days"
    ));
    lines.push("• Reference number must be included in all transactions".to_string());
    lines.join("\n")
}

/// `1234567.50` -> `1,234,567.50`
fn group_thousands(amount: &str) -> String {
    let (int, frac) = amount.split_once('.').unwrap_or((amount, ""));
    let (sign, digits) = match int.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int),
    };
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if frac.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac}")
    }
}

#[async_trait]
impl PaymentGateway for ManualGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Manual
    }

    async fn create(&self, intent: &PaymentIntent) -> Result<CreatedPayment> {
        let validated = validate_intent(intent)?;
        let today = Utc::now().date_naive();
        let reference = Self::reference(today);
        let expires_on = today
            .checked_add_days(Days::new(PAYMENT_WINDOW_DAYS))
            .ok_or_else(|| PaymentError::internal("payment expiry out of range"))?;
        let instructions = payment_instructions(intent, &reference);

        let mut metadata = validated.metadata;
        if let Some(order_id) = validated.order_id {
            metadata.insert("order_id".to_string(), order_id);
        }
        metadata.insert("payment_method".to_string(), "cash".to_string());
        metadata.insert("reference".to_string(), reference.clone());
        metadata.insert("expires_on".to_string(), expires_on.to_string());
        metadata.insert("instructions".to_string(), instructions.clone());

        let description = if validated.description.is_empty() {
            "Cash Payment".to_string()
        } else {
            validated.description
        };
        let transaction = self
            .engine
            .open_transaction(NewTransaction {
                transaction_uuid: NewTransaction::generate_uuid(GatewayKind::Manual),
                gateway_transaction_id: reference.clone(),
                gateway: GatewayKind::Manual,
                amount: validated.amount,
                currency: validated.currency,
                customer_email: validated.customer_email,
                customer_name: validated.customer_name,
                customer_phone: validated.customer_phone,
                description,
                items: validated.items,
                metadata,
            })
            .await?;

        let slip = self.slip(&transaction);
        Ok(CreatedPayment {
            transaction,
            continuation: Continuation::Instructions {
                reference,
                instructions,
                expires_on,
                slip,
            },
        })
    }

    async fn capture(&self, payment_id: &str, params: &CaptureParams) -> Result<TransactionStatus> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::Manual, payment_id)
            .await?;
        let Some(action) = params.action else {
            return Ok(tx.status);
        };

        let (status, default_notes) = match action {
            CaptureAction::Confirm => (TransactionStatus::Completed, "Payment confirmed by staff"),
            CaptureAction::Cancel => (TransactionStatus::Cancelled, "Payment cancelled"),
        };
        let actor = params
            .actor
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                PaymentError::Validation(format!(
                    "An actor is required to {} a cash payment",
                    action.as_str()
                ))
            })?;
        let mut observation = Observation::new(status).vendor_response(json!({
            "action": action.as_str(),
            "confirmed_by": actor,
            "confirmed_at": Utc::now().to_rfc3339(),
            "notes": params.notes.as_deref().unwrap_or(default_notes),
        }));
        if let Some(received) = params.amount_received {
            observation = observation.amount(received.value());
        }

        let outcome = self
            .engine
            .apply_transition(tx.id, observation, TransitionSource::Staff)
            .await?;
        info!(
            reference = %payment_id,
            action = action.as_str(),
            actor,
            status = %outcome.status(),
            "cash payment actioned"
        );
        Ok(outcome.status())
    }

    async fn verify(&self, payment_id: &str) -> Result<TransactionSnapshot> {
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::Manual, payment_id)
            .await?;
        Ok(TransactionSnapshot::from(&tx))
    }

    async fn refund(&self, payment_id: &str, request: &RefundRequest) -> Result<Refund> {
        let actor = request
            .actor
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                PaymentError::Validation("Cash refunds require an actor".to_string())
            })?;
        let tx = self
            .engine
            .transaction_by_payment(GatewayKind::Manual, payment_id)
            .await?;
        let refund = self
            .engine
            .open_refund(tx.id, request.amount, &request.reason, Some(actor))
            .await?;
        info!(reference = %payment_id, refund_id = %refund.id, actor, "cash refund awaiting hand-over");
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Amount;
    use crate::domain::transaction::RefundStatus;
    use crate::infrastructure::in_memory::{
        InMemoryRefundStore, InMemoryTransactionStore, MemoryAuditLog,
    };
    use rust_decimal_macros::dec;

    fn gateway() -> ManualGateway {
        let engine = ReconciliationEngine::new(
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryRefundStore::new()),
            Arc::new(MemoryAuditLog::new()),
        );
        ManualGateway::new(Arc::new(engine), "Corner Shop")
    }

    fn intent() -> PaymentIntent {
        PaymentIntent {
            gateway: "manual".into(),
            amount: json!(500),
            currency: Some("PHP".into()),
            customer_email: Some("juan@example.com".into()),
            customer_name: Some("Juan".into()),
            pickup_location: Some("Main branch".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_reference_format() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let reference = ManualGateway::reference(date);
        assert!(reference.starts_with("CASH-20260309-"));
        let suffix = reference.trim_start_matches("CASH-20260309-");
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands("500.00"), "500.00");
        assert_eq!(group_thousands("1234567.50"), "1,234,567.50");
        assert_eq!(group_thousands("100000"), "100,000");
    }

    #[test]
    fn test_instructions_sections() {
        let text = payment_instructions(&intent(), "CASH-REF");
        assert!(text.contains("OVER-THE-COUNTER PAYMENT:"));
        assert!(text.contains("Present your reference number: CASH-REF"));
        assert!(text.contains("• Location: Main branch"));
        assert!(text.contains("• Hours: 9:00 AM - 6:00 PM"));
        assert!(!text.contains("BANK DEPOSIT:"));
        assert!(text.ends_with("Reference number must be included in all transactions"));
    }

    #[tokio::test]
    async fn test_create_issues_reference_and_expiry() {
        let gw = gateway();
        let created = gw.create(&intent()).await.unwrap();
        assert_eq!(created.transaction.status, TransactionStatus::Pending);
        assert_eq!(created.transaction.amount.value(), dec!(500.00));
        match created.continuation {
            Continuation::Instructions {
                reference,
                expires_on,
                slip,
                ..
            } => {
                assert_eq!(reference, created.transaction.gateway_transaction_id);
                assert_eq!(
                    expires_on,
                    created.transaction.created_at.date_naive() + Days::new(3)
                );
                assert_eq!(slip.amount, "500.00");
                assert_eq!(slip.header, "Corner Shop - Payment Slip");
            }
            other => panic!("unexpected continuation {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capture_without_action_reports_status() {
        let gw = gateway();
        let reference = gw.create(&intent()).await.unwrap().transaction.gateway_transaction_id;
        let status = gw.capture(&reference, &CaptureParams::default()).await.unwrap();
        assert_eq!(status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_staff_action_needs_actor() {
        let gw = gateway();
        let reference = gw.create(&intent()).await.unwrap().transaction.gateway_transaction_id;

        for actor in [None, Some("  ".to_string())] {
            for action in [CaptureAction::Confirm, CaptureAction::Cancel] {
                let params = CaptureParams {
                    action: Some(action),
                    actor: actor.clone(),
                    ..Default::default()
                };
                assert!(matches!(
                    gw.capture(&reference, &params).await,
                    Err(PaymentError::Validation(_))
                ));
            }
        }
        let status = gw.capture(&reference, &CaptureParams::default()).await.unwrap();
        assert_eq!(status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_confirm_checks_amount_received() {
        let gw = gateway();
        let reference = gw.create(&intent()).await.unwrap().transaction.gateway_transaction_id;

        let mut short = CaptureParams::confirm("clerk-1");
        short.amount_received = Some(Amount::new(dec!(450)).unwrap());
        assert!(matches!(
            gw.capture(&reference, &short).await,
            Err(PaymentError::AmountMismatch { .. })
        ));

        let status = gw
            .capture(&reference, &CaptureParams::confirm("clerk-1"))
            .await
            .unwrap();
        assert_eq!(status, TransactionStatus::Completed);

        assert!(matches!(
            gw.capture(&reference, &CaptureParams::cancel("clerk-2")).await,
            Err(PaymentError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_refund_needs_actor_and_staff_completion() {
        let gw = gateway();
        let reference = gw.create(&intent()).await.unwrap().transaction.gateway_transaction_id;
        gw.capture(&reference, &CaptureParams::confirm("clerk-1"))
            .await
            .unwrap();

        let anonymous = RefundRequest {
            reason: "changed mind".into(),
            ..Default::default()
        };
        assert!(matches!(
            gw.refund(&reference, &anonymous).await,
            Err(PaymentError::Validation(_))
        ));

        let request = RefundRequest {
            reason: "changed mind".into(),
            actor: Some("supervisor".into()),
            ..Default::default()
        };
        let refund = gw.refund(&reference, &request).await.unwrap();
        assert_eq!(refund.status, RefundStatus::Pending);
        assert!(refund.gateway_refund_id.is_none());
        assert_eq!(gw.verify(&reference).await.unwrap().status, TransactionStatus::Completed);

        let done = gw.complete_refund(refund.id, "cashier").await.unwrap();
        assert_eq!(done.status, RefundStatus::Completed);
        assert_eq!(done.processed_by.as_deref(), Some("cashier"));
        let snapshot = gw.verify(&reference).await.unwrap();
        assert_eq!(snapshot.status, TransactionStatus::Refunded);
        assert_eq!(snapshot.refund_amount, Some(dec!(500.00)));
    }
}
