#![allow(dead_code)]

use paybroker::application::broker::PaymentBroker;
use paybroker::application::engine::ReconciliationEngine;
use paybroker::config::Credentials;
use paybroker::domain::intent::PaymentIntent;
use paybroker::domain::money::{Amount, Currency};
use paybroker::domain::transaction::{GatewayKind, NewTransaction};
use paybroker::infrastructure::in_memory::{
    InMemoryRefundStore, InMemoryTransactionStore, MemoryAuditLog,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn engine() -> (Arc<ReconciliationEngine>, Arc<MemoryAuditLog>) {
    let audit = Arc::new(MemoryAuditLog::new());
    let engine = ReconciliationEngine::new(
        Arc::new(InMemoryTransactionStore::new()),
        Arc::new(InMemoryRefundStore::new()),
        audit.clone(),
    );
    (Arc::new(engine), audit)
}

pub fn broker() -> (PaymentBroker, Arc<MemoryAuditLog>) {
    let (engine, audit) = engine();
    (PaymentBroker::new(engine), audit)
}

pub fn new_transaction(gateway: GatewayKind, reference: &str, amount: Decimal) -> NewTransaction {
    NewTransaction {
        transaction_uuid: NewTransaction::generate_uuid(gateway),
        gateway_transaction_id: reference.to_string(),
        gateway,
        amount: Amount::new(amount).unwrap(),
        currency: Currency::parse("USD").unwrap(),
        customer_email: "buyer@example.com".into(),
        customer_name: "Buyer".into(),
        customer_phone: String::new(),
        description: "Order".into(),
        items: vec![],
        metadata: BTreeMap::new(),
    }
}

pub fn intent(gateway: &str, amount: &str, currency: &str) -> PaymentIntent {
    PaymentIntent {
        gateway: gateway.into(),
        amount: json!(amount),
        currency: Some(currency.into()),
        customer_email: Some("buyer@example.com".into()),
        customer_name: Some("Buyer".into()),
        description: Some("Order 42".into()),
        ..Default::default()
    }
}

pub fn credentials(gateway: GatewayKind, base_url: &str) -> Credentials {
    let base = Credentials::new().with(gateway, "api_base", base_url);
    match gateway {
        GatewayKind::Card => base.with(gateway, "secret_key", "sk_test_123"),
        GatewayKind::Wallet => base
            .with(gateway, "client_id", "client-1")
            .with(gateway, "secret", "wallet-secret"),
        GatewayKind::BankTransfer => base
            .with(gateway, "api_key", "ak_test")
            .with(gateway, "secret_key", "bank-secret")
            .with(gateway, "merchant_id", "M-100"),
        GatewayKind::Manual => base,
    }
}
