mod common;

use common::{TIMEOUT, credentials, intent};
use hmac::{Hmac, Mac};
use paybroker::application::broker::PaymentBroker;
use paybroker::domain::intent::{Continuation, RefundRequest};
use paybroker::domain::transaction::{GatewayKind, RefundStatus, TransactionStatus};
use paybroker::error::PaymentError;
use paybroker::infrastructure::gateways::bank_transfer::{BankTransferGateway, SupportedBank};
use rust_decimal_macros::dec;
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn bank_broker(server: &MockServer) -> PaymentBroker {
    let (engine, _) = common::engine();
    let gateway = Arc::new(
        BankTransferGateway::new(
            &credentials(GatewayKind::BankTransfer, &server.uri()),
            TIMEOUT,
            "https://shop.example.com",
            engine.clone(),
        )
        .unwrap(),
    );
    PaymentBroker::new(engine)
        .with_gateway(gateway.clone())
        .with_bank_transfer(gateway)
}

/// Accepts only requests carrying a valid `"{timestamp}.{body}"` signature.
fn correctly_signed(request: &Request) -> bool {
    let header_text = |name: &str| {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let (Some(timestamp), Some(signature)) = (header_text("x-timestamp"), header_text("x-signature"))
    else {
        return false;
    };
    let mut mac = Hmac::<Sha256>::new_from_slice(b"bank-secret").unwrap();
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(&request.body);
    hex::encode(mac.finalize().into_bytes()) == signature
}

async fn create_payment(server: &MockServer, broker: &PaymentBroker) {
    Mock::given(method("POST"))
        .and(path("/payments"))
        .and(header("x-api-key", "ak_test"))
        .and(correctly_signed)
        .and(body_partial_json(json!({
            "merchant_id": "M-100",
            "currency": "PHP",
            "customer": { "email": "buyer@example.com" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_id": "IP-77",
            "payment_url": "https://pay.example.com/IP-77",
            "qr_code": "data:image/png;base64,AAAA",
            "expires_at": "2026-10-17T12:00:00Z"
        })))
        .expect(1)
        .mount(server)
        .await;
    broker.create(&intent("instapay", "250.00", "PHP")).await.unwrap();
}

async fn mount_payment(server: &MockServer, status: &str, refunded: &str) {
    Mock::given(method("GET"))
        .and(path("/payments/IP-77"))
        .and(correctly_signed)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_id": "IP-77",
            "status": status,
            "amount": "250.00",
            "refunded_amount": refunded
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_create_signs_request_and_returns_transfer_details() {
    let server = MockServer::start().await;
    let broker = bank_broker(&server);

    Mock::given(method("POST"))
        .and(path("/payments"))
        .and(correctly_signed)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_id": "IP-77",
            "payment_url": "https://pay.example.com/IP-77",
            "qr_code": "qr",
            "expires_at": "2026-10-17T12:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = broker
        .create(&intent("bank_transfer", "250.00", "PHP"))
        .await
        .unwrap();
    assert_eq!(
        created.continuation,
        Continuation::BankTransfer {
            payment_id: "IP-77".into(),
            payment_url: "https://pay.example.com/IP-77".into(),
            qr_code: "qr".into(),
            expires_at: Some("2026-10-17T12:00:00Z".into()),
        }
    );
    assert_eq!(created.transaction.gateway_transaction_id, "IP-77");
    assert_eq!(
        created.transaction.metadata.get("expires_at").map(String::as_str),
        Some("2026-10-17T12:00:00Z")
    );
}

#[tokio::test]
async fn test_non_peso_currency_is_rejected_locally() {
    let server = MockServer::start().await;
    let broker = bank_broker(&server);

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = broker.create(&intent("bank_transfer", "250.00", "USD")).await;
    assert!(matches!(result, Err(PaymentError::Validation(_))));
    assert!(broker.engine().all_transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_verify_maps_success_to_completed() {
    let server = MockServer::start().await;
    let broker = bank_broker(&server);
    create_payment(&server, &broker).await;
    mount_payment(&server, "success", "0").await;

    let snapshot = broker
        .verify(GatewayKind::BankTransfer, "IP-77")
        .await
        .unwrap();
    assert_eq!(snapshot.status, TransactionStatus::Completed);
    assert_eq!(snapshot.vendor_status.as_deref(), Some("success"));
}

#[tokio::test]
async fn test_verify_picks_up_vendor_side_refund() {
    let server = MockServer::start().await;
    let broker = bank_broker(&server);
    create_payment(&server, &broker).await;

    let tx = broker
        .engine()
        .transaction_by_payment(GatewayKind::BankTransfer, "IP-77")
        .await
        .unwrap();
    broker
        .engine()
        .apply_transition(
            tx.id,
            paybroker::application::engine::Observation::new(TransactionStatus::Completed),
            paybroker::domain::lifecycle::TransitionSource::Webhook,
        )
        .await
        .unwrap();
    mount_payment(&server, "refunded", "250.00").await;

    let snapshot = broker
        .verify(GatewayKind::BankTransfer, "IP-77")
        .await
        .unwrap();
    assert_eq!(snapshot.status, TransactionStatus::Refunded);
    assert_eq!(snapshot.refund_amount, Some(dec!(250.00)));
}

#[tokio::test]
async fn test_refund_submits_signed_request() {
    let server = MockServer::start().await;
    let broker = bank_broker(&server);
    create_payment(&server, &broker).await;
    mount_payment(&server, "success", "0").await;
    broker
        .verify(GatewayKind::BankTransfer, "IP-77")
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/refunds"))
        .and(correctly_signed)
        .and(body_partial_json(json!({ "payment_id": "IP-77" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "refund_id": "IR-1",
            "status": "processing"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refund = broker
        .refund(
            GatewayKind::BankTransfer,
            "IP-77",
            &RefundRequest {
                reason: "customer request".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(refund.status, RefundStatus::Pending);
    assert_eq!(refund.gateway_refund_id.as_deref(), Some("IR-1"));
}

#[tokio::test]
async fn test_supported_banks() {
    let server = MockServer::start().await;
    let broker = bank_broker(&server);

    Mock::given(method("GET"))
        .and(path("/banks"))
        .and(correctly_signed)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "banks": [
                { "code": "BDO", "name": "BDO Unibank" },
                { "code": "BPI", "name": "Bank of the Philippine Islands" }
            ]
        })))
        .mount(&server)
        .await;

    let banks = broker.supported_banks().await.unwrap();
    assert_eq!(
        banks,
        vec![
            SupportedBank {
                code: "BDO".into(),
                name: "BDO Unibank".into()
            },
            SupportedBank {
                code: "BPI".into(),
                name: "Bank of the Philippine Islands".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_supported_banks_requires_configuration() {
    let (engine, _) = common::engine();
    let broker = PaymentBroker::new(engine);
    assert!(matches!(
        broker.supported_banks().await,
        Err(PaymentError::GatewayNotConfigured(GatewayKind::BankTransfer))
    ));
}
