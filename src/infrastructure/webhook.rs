//! Inbound webhook authentication and normalization.
//!
//! Signatures are always computed over the exact raw bytes received. The body
//! is parsed only after the signature checks out.
//!
//! - card: `t=<unix>,v1=<hex>` header, HMAC-SHA256 over `"{t}.{raw}"`, with a
//!   timestamp tolerance.
//! - wallet, bank_transfer: hex HMAC-SHA256 over the raw body.
//! - manual: staff actions only, no webhooks.

use crate::domain::money::{Amount, to_minor_precision};
use crate::domain::status_map;
use crate::domain::transaction::GatewayKind;
use crate::domain::webhook::WebhookEvent;
use crate::error::SignatureError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::str::FromStr;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (either direction) of a card signature timestamp.
pub const CARD_TOLERANCE_SECS: i64 = 300;

type VerifyResult<T> = std::result::Result<T, SignatureError>;

/// Authenticates and parses an inbound webhook.
pub fn verify(
    gateway: GatewayKind,
    raw: &[u8],
    signature_header: Option<&str>,
    secret: &str,
) -> VerifyResult<WebhookEvent> {
    verify_at(gateway, raw, signature_header, secret, Utc::now())
}

/// [`verify`] against an explicit clock.
pub fn verify_at(
    gateway: GatewayKind,
    raw: &[u8],
    signature_header: Option<&str>,
    secret: &str,
    now: DateTime<Utc>,
) -> VerifyResult<WebhookEvent> {
    let header = signature_header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(SignatureError::MissingHeader)?;
    if secret.is_empty() {
        return Err(SignatureError::InvalidSignature);
    }

    let parse: fn(&Value) -> VerifyResult<ParsedEvent> = match gateway {
        GatewayKind::Card => {
            verify_timestamped(raw, header, secret, now)?;
            parse_card
        }
        GatewayKind::Wallet => {
            verify_plain(raw, header, secret)?;
            parse_wallet
        }
        GatewayKind::BankTransfer => {
            verify_plain(raw, header, secret)?;
            parse_bank_transfer
        }
        GatewayKind::Manual => {
            return Err(SignatureError::MalformedPayload(
                "manual channel does not send webhooks".to_string(),
            ));
        }
    };

    let payload: Value = serde_json::from_slice(raw)
        .map_err(|e| SignatureError::MalformedPayload(e.to_string()))?;
    let parsed = parse(&payload)?;

    Ok(WebhookEvent {
        gateway,
        status: status_map::map(gateway, &parsed.status_token),
        event_type: parsed.event_type,
        payment_id: parsed.payment_id,
        amount: parsed.amount,
        refunded_total: parsed.refunded_total,
        gateway_refund_id: parsed.gateway_refund_id,
        capture_id: parsed.capture_id,
        signature_verified: true,
        received_at: now,
    })
}

/// Produces the header value a vendor would send for `raw`.
pub fn sign(
    gateway: GatewayKind,
    raw: &[u8],
    secret: &str,
    timestamp: i64,
) -> VerifyResult<String> {
    match gateway {
        GatewayKind::Card => {
            let mut mac = keyed(secret)?;
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(raw);
            Ok(format!(
                "t={timestamp},v1={}",
                hex::encode(mac.finalize().into_bytes())
            ))
        }
        _ => hex_hmac(secret, raw),
    }
}

/// Hex HMAC-SHA256 of `data`. Also signs outbound bank-transfer requests.
pub fn hex_hmac(secret: &str, data: &[u8]) -> VerifyResult<String> {
    let mut mac = keyed(secret)?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn keyed(secret: &str) -> VerifyResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSignature)
}

fn verify_timestamped(
    raw: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> VerifyResult<()> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MissingHeader)?;
    if candidates.is_empty() {
        return Err(SignatureError::MissingHeader);
    }
    if (now.timestamp() - timestamp).abs() > CARD_TOLERANCE_SECS {
        return Err(SignatureError::StaleTimestamp);
    }

    let matches = candidates.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        keyed(secret).is_ok_and(|mut mac| {
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(raw);
            mac.verify_slice(&expected).is_ok()
        })
    });
    if matches {
        Ok(())
    } else {
        Err(SignatureError::InvalidSignature)
    }
}

fn verify_plain(raw: &[u8], header: &str, secret: &str) -> VerifyResult<()> {
    let expected = hex::decode(header).map_err(|_| SignatureError::InvalidSignature)?;
    let mut mac = keyed(secret)?;
    mac.update(raw);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::InvalidSignature)
}

struct ParsedEvent {
    event_type: String,
    status_token: String,
    payment_id: String,
    amount: Option<Amount>,
    refunded_total: Option<Decimal>,
    gateway_refund_id: Option<String>,
    capture_id: Option<String>,
}

fn text(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required(value: &Value, pointer: &str) -> VerifyResult<String> {
    text(value, pointer)
        .ok_or_else(|| SignatureError::MalformedPayload(format!("missing field {pointer}")))
}

fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn minor_units(value: &Value, pointer: &str) -> Option<Decimal> {
    value
        .pointer(pointer)
        .and_then(Value::as_i64)
        .map(|units| Decimal::new(units, 2))
}

fn parse_card(payload: &Value) -> VerifyResult<ParsedEvent> {
    let event_type = required(payload, "/type")?;
    let object = payload
        .pointer("/data/object")
        .ok_or_else(|| SignatureError::MalformedPayload("missing data.object".to_string()))?;

    if event_type.starts_with("charge.") {
        return Ok(ParsedEvent {
            status_token: event_type.clone(),
            payment_id: required(object, "/payment_intent")?,
            amount: minor_units(object, "/amount").and_then(|v| Amount::new(v).ok()),
            refunded_total: minor_units(object, "/amount_refunded"),
            gateway_refund_id: text(object, "/refunds/data/0/id"),
            capture_id: None,
            event_type,
        });
    }

    Ok(ParsedEvent {
        status_token: event_type.clone(),
        payment_id: required(object, "/id")?,
        amount: minor_units(object, "/amount").and_then(|v| Amount::new(v).ok()),
        refunded_total: None,
        gateway_refund_id: None,
        capture_id: None,
        event_type,
    })
}

fn parse_wallet(payload: &Value) -> VerifyResult<ParsedEvent> {
    let event_type = required(payload, "/event_type")?;
    let resource = payload
        .get("resource")
        .ok_or_else(|| SignatureError::MalformedPayload("missing resource".to_string()))?;
    let order_id = text(resource, "/supplementary_data/related_ids/order_id");
    let amount_of = |pointer: &str| {
        resource
            .pointer(pointer)
            .and_then(decimal)
            .and_then(|v| Amount::new(v).ok())
    };

    let parsed = if event_type.starts_with("CHECKOUT.ORDER.") {
        ParsedEvent {
            status_token: event_type.clone(),
            payment_id: required(resource, "/id")?,
            amount: amount_of("/purchase_units/0/amount/value"),
            refunded_total: None,
            gateway_refund_id: None,
            capture_id: None,
            event_type,
        }
    } else if event_type == "PAYMENT.CAPTURE.REFUNDED" {
        let refunded_total = resource
            .pointer("/seller_payable_breakdown/total_refunded_amount/value")
            .or_else(|| resource.pointer("/amount/value"))
            .and_then(decimal)
            .map(to_minor_precision);
        ParsedEvent {
            status_token: event_type.clone(),
            payment_id: order_id.ok_or_else(|| {
                SignatureError::MalformedPayload("missing related order id".to_string())
            })?,
            amount: None,
            refunded_total,
            gateway_refund_id: text(resource, "/id"),
            capture_id: None,
            event_type,
        }
    } else {
        // PAYMENT.CAPTURE.* resources are the capture itself.
        let capture_id = match (&order_id, event_type.starts_with("PAYMENT.CAPTURE.")) {
            (Some(_), true) => text(resource, "/id"),
            _ => None,
        };
        ParsedEvent {
            status_token: event_type.clone(),
            payment_id: match order_id {
                Some(id) => id,
                None => required(resource, "/id")?,
            },
            amount: amount_of("/amount/value"),
            refunded_total: None,
            gateway_refund_id: None,
            capture_id,
            event_type,
        }
    };
    Ok(parsed)
}

fn parse_bank_transfer(payload: &Value) -> VerifyResult<ParsedEvent> {
    let status_token = required(payload, "/status")?;
    let event_type = text(payload, "/event").unwrap_or_else(|| format!("payment.{status_token}"));
    Ok(ParsedEvent {
        payment_id: required(payload, "/payment_id")?,
        amount: payload
            .get("amount")
            .and_then(decimal)
            .and_then(|v| Amount::new(v).ok()),
        refunded_total: payload
            .get("refunded_amount")
            .and_then(decimal)
            .map(to_minor_precision),
        gateway_refund_id: text(payload, "/refund_id"),
        capture_id: None,
        status_token,
        event_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionStatus;
    use rust_decimal_macros::dec;

    const SECRET: &str = "whsec_test_secret";

    fn card_payload() -> Vec<u8> {
        br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","amount":1999,"currency":"usd"}}}"#.to_vec()
    }

    #[test]
    fn test_card_signature_accepted() {
        let now = Utc::now();
        let raw = card_payload();
        let header = sign(GatewayKind::Card, &raw, SECRET, now.timestamp()).unwrap();

        let event = verify_at(GatewayKind::Card, &raw, Some(&header), SECRET, now).unwrap();
        assert_eq!(event.payment_id, "pi_1");
        assert_eq!(event.status, TransactionStatus::Completed);
        assert_eq!(event.amount.unwrap().value(), dec!(19.99));
        assert!(event.signature_verified);
    }

    #[test]
    fn test_card_tampered_body_rejected() {
        let now = Utc::now();
        let raw = card_payload();
        let header = sign(GatewayKind::Card, &raw, SECRET, now.timestamp()).unwrap();
        let tampered = String::from_utf8(raw).unwrap().replace("1999", "1");

        assert_eq!(
            verify_at(
                GatewayKind::Card,
                tampered.as_bytes(),
                Some(&header),
                SECRET,
                now
            ),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_card_stale_timestamp_rejected() {
        let now = Utc::now();
        let raw = card_payload();
        let header = sign(GatewayKind::Card, &raw, SECRET, now.timestamp() - 600).unwrap();

        assert_eq!(
            verify_at(GatewayKind::Card, &raw, Some(&header), SECRET, now),
            Err(SignatureError::StaleTimestamp)
        );
    }

    #[test]
    fn test_card_malformed_header_rejected() {
        let raw = card_payload();
        for header in ["garbage", "v1=abcd", "t=123"] {
            assert_eq!(
                verify(GatewayKind::Card, &raw, Some(header), SECRET),
                Err(SignatureError::MissingHeader)
            );
        }
        assert_eq!(
            verify(GatewayKind::Card, &raw, None, SECRET),
            Err(SignatureError::MissingHeader)
        );
    }

    #[test]
    fn test_charge_refunded_reports_cumulative_total() {
        let now = Utc::now();
        let raw = br#"{"type":"charge.refunded","data":{"object":{"id":"ch_1","payment_intent":"pi_1","amount":1999,"amount_refunded":500,"refunds":{"data":[{"id":"re_1"}]}}}}"#;
        let header = sign(GatewayKind::Card, raw, SECRET, now.timestamp()).unwrap();

        let event = verify_at(GatewayKind::Card, raw, Some(&header), SECRET, now).unwrap();
        assert_eq!(event.payment_id, "pi_1");
        assert_eq!(event.status, TransactionStatus::Refunded);
        assert_eq!(event.refunded_total, Some(dec!(5.00)));
        assert_eq!(event.gateway_refund_id.as_deref(), Some("re_1"));
    }

    #[test]
    fn test_wallet_capture_event() {
        let raw = br#"{"event_type":"PAYMENT.CAPTURE.COMPLETED","resource":{"id":"CAP-1","amount":{"currency_code":"USD","value":"25.00"},"supplementary_data":{"related_ids":{"order_id":"ORDER-1"}}}}"#;
        let header = hex_hmac(SECRET, raw).unwrap();

        let event = verify(GatewayKind::Wallet, raw, Some(&header), SECRET).unwrap();
        assert_eq!(event.payment_id, "ORDER-1");
        assert_eq!(event.status, TransactionStatus::Completed);
        assert_eq!(event.amount.unwrap().value(), dec!(25.00));
        assert_eq!(event.capture_id.as_deref(), Some("CAP-1"));
    }

    #[test]
    fn test_bank_transfer_signature_mismatch() {
        let raw = br#"{"payment_id":"ip_1","status":"success","amount":500}"#;
        let header = hex_hmac("other-secret", raw).unwrap();
        assert_eq!(
            verify(GatewayKind::BankTransfer, raw, Some(&header), SECRET),
            Err(SignatureError::InvalidSignature)
        );

        let header = hex_hmac(SECRET, raw).unwrap();
        let event = verify(GatewayKind::BankTransfer, raw, Some(&header), SECRET).unwrap();
        assert_eq!(event.event_type, "payment.success");
        assert_eq!(event.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_signed_but_unparsable_body_is_malformed() {
        let raw = b"not json";
        let header = hex_hmac(SECRET, raw).unwrap();
        assert!(matches!(
            verify(GatewayKind::Wallet, raw, Some(&header), SECRET),
            Err(SignatureError::MalformedPayload(_))
        ));
    }
}
