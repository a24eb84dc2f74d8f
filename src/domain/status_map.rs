//! Vendor status vocabulary.
//!
//! Each gateway owns a fixed token table. Unknown tokens map to `pending` so an
//! unrecognized intermediate vendor state can never mark a transaction
//! terminal. This fails open on purpose and every unknown token is logged.

use super::transaction::{GatewayKind, RefundStatus, TransactionStatus};
use tracing::warn;

const CARD: &[(&str, TransactionStatus)] = &[
    ("requires_payment_method", TransactionStatus::Pending),
    ("requires_confirmation", TransactionStatus::Pending),
    ("requires_action", TransactionStatus::Pending),
    ("processing", TransactionStatus::Processing),
    ("requires_capture", TransactionStatus::Processing),
    ("succeeded", TransactionStatus::Completed),
    ("canceled", TransactionStatus::Cancelled),
    ("payment_intent.created", TransactionStatus::Pending),
    ("payment_intent.requires_action", TransactionStatus::Pending),
    ("payment_intent.processing", TransactionStatus::Processing),
    ("payment_intent.succeeded", TransactionStatus::Completed),
    ("payment_intent.payment_failed", TransactionStatus::Failed),
    ("payment_intent.canceled", TransactionStatus::Cancelled),
    ("charge.refunded", TransactionStatus::Refunded),
];

const WALLET: &[(&str, TransactionStatus)] = &[
    ("CREATED", TransactionStatus::Pending),
    ("SAVED", TransactionStatus::Pending),
    ("PAYER_ACTION_REQUIRED", TransactionStatus::Pending),
    ("APPROVED", TransactionStatus::Processing),
    ("PENDING", TransactionStatus::Processing),
    ("COMPLETED", TransactionStatus::Completed),
    ("VOIDED", TransactionStatus::Cancelled),
    ("DECLINED", TransactionStatus::Failed),
    ("CHECKOUT.ORDER.APPROVED", TransactionStatus::Processing),
    ("CHECKOUT.ORDER.COMPLETED", TransactionStatus::Completed),
    ("CHECKOUT.ORDER.VOIDED", TransactionStatus::Cancelled),
    ("PAYMENT.CAPTURE.PENDING", TransactionStatus::Processing),
    ("PAYMENT.CAPTURE.COMPLETED", TransactionStatus::Completed),
    ("PAYMENT.CAPTURE.DENIED", TransactionStatus::Failed),
    ("PAYMENT.CAPTURE.DECLINED", TransactionStatus::Failed),
    ("PAYMENT.CAPTURE.REFUNDED", TransactionStatus::Refunded),
];

const BANK_TRANSFER: &[(&str, TransactionStatus)] = &[
    ("pending", TransactionStatus::Pending),
    ("processing", TransactionStatus::Processing),
    ("success", TransactionStatus::Completed),
    ("failed", TransactionStatus::Failed),
    ("expired", TransactionStatus::Cancelled),
    ("refunded", TransactionStatus::Refunded),
];

const MANUAL: &[(&str, TransactionStatus)] = &[
    ("pending", TransactionStatus::Pending),
    ("confirm", TransactionStatus::Completed),
    ("cancel", TransactionStatus::Cancelled),
];

fn table(gateway: GatewayKind) -> &'static [(&'static str, TransactionStatus)] {
    match gateway {
        GatewayKind::Card => CARD,
        GatewayKind::Wallet => WALLET,
        GatewayKind::BankTransfer => BANK_TRANSFER,
        GatewayKind::Manual => MANUAL,
    }
}

/// Translates a vendor status token (or webhook event type) into the internal status.
pub fn map(gateway: GatewayKind, token: &str) -> TransactionStatus {
    match lookup(gateway, token) {
        Some(status) => status,
        None => {
            warn!(%gateway, token, "unrecognized vendor status token, treating as pending");
            TransactionStatus::Pending
        }
    }
}

/// Like [`map`] but reports unknown tokens instead of defaulting them.
pub fn lookup(gateway: GatewayKind, token: &str) -> Option<TransactionStatus> {
    table(gateway)
        .iter()
        .find(|(vendor, _)| *vendor == token)
        .map(|(_, status)| *status)
}

/// Translates a vendor refund status token.
///
/// Unknown refund tokens stay `pending`: the reservation remains open until a
/// later webhook or staff action settles it.
pub fn map_refund(gateway: GatewayKind, token: &str) -> RefundStatus {
    let status = match (gateway, token) {
        (GatewayKind::Card, "succeeded") => Some(RefundStatus::Completed),
        (GatewayKind::Card, "pending" | "requires_action") => Some(RefundStatus::Pending),
        (GatewayKind::Card, "failed" | "canceled") => Some(RefundStatus::Failed),
        (GatewayKind::Wallet, "COMPLETED") => Some(RefundStatus::Completed),
        (GatewayKind::Wallet, "PENDING") => Some(RefundStatus::Pending),
        (GatewayKind::Wallet, "FAILED" | "CANCELLED") => Some(RefundStatus::Failed),
        (GatewayKind::BankTransfer, "success") => Some(RefundStatus::Completed),
        (GatewayKind::BankTransfer, "pending" | "processing") => Some(RefundStatus::Pending),
        (GatewayKind::BankTransfer, "failed") => Some(RefundStatus::Failed),
        _ => None,
    };
    status.unwrap_or_else(|| {
        warn!(%gateway, token, "unrecognized vendor refund status, keeping refund pending");
        RefundStatus::Pending
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_tokens() {
        assert_eq!(
            map(GatewayKind::Card, "succeeded"),
            TransactionStatus::Completed
        );
        assert_eq!(
            map(GatewayKind::Card, "payment_intent.payment_failed"),
            TransactionStatus::Failed
        );
        assert_eq!(
            map(GatewayKind::Card, "charge.refunded"),
            TransactionStatus::Refunded
        );
    }

    #[test]
    fn test_bank_transfer_tokens() {
        assert_eq!(
            map(GatewayKind::BankTransfer, "success"),
            TransactionStatus::Completed
        );
        assert_eq!(
            map(GatewayKind::BankTransfer, "expired"),
            TransactionStatus::Cancelled
        );
    }

    #[test]
    fn test_wallet_tokens() {
        assert_eq!(
            map(GatewayKind::Wallet, "APPROVED"),
            TransactionStatus::Processing
        );
        assert_eq!(
            map(GatewayKind::Wallet, "PAYMENT.CAPTURE.COMPLETED"),
            TransactionStatus::Completed
        );
    }

    #[test]
    fn test_unknown_tokens_fail_open_to_pending() {
        for gateway in GatewayKind::ALL {
            assert_eq!(map(gateway, "something_new"), TransactionStatus::Pending);
            assert_eq!(lookup(gateway, "something_new"), None);
        }
    }

    #[test]
    fn test_vocabularies_are_not_shared() {
        // "success" is bank-transfer vocabulary only.
        assert_eq!(map(GatewayKind::Card, "success"), TransactionStatus::Pending);
        assert_eq!(map(GatewayKind::Manual, "succeeded"), TransactionStatus::Pending);
    }

    #[test]
    fn test_refund_tokens() {
        assert_eq!(
            map_refund(GatewayKind::Card, "succeeded"),
            RefundStatus::Completed
        );
        assert_eq!(map_refund(GatewayKind::Wallet, "PENDING"), RefundStatus::Pending);
        assert_eq!(
            map_refund(GatewayKind::BankTransfer, "failed"),
            RefundStatus::Failed
        );
        assert_eq!(map_refund(GatewayKind::Card, "weird"), RefundStatus::Pending);
    }
}
