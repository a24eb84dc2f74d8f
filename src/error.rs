use crate::domain::transaction::{GatewayKind, TransactionStatus};
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Why an inbound webhook was not trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing or unparsable signature header")]
    MissingHeader,
    #[error("signature does not match payload")]
    InvalidSignature,
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Unsupported payment gateway: {0}")]
    UnsupportedGateway(String),
    #[error("Gateway {0} is not configured")]
    GatewayNotConfigured(GatewayKind),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    #[error("{gateway} gateway error: {message}")]
    Gateway {
        gateway: GatewayKind,
        message: String,
    },
    #[error("{gateway} gateway unavailable: {message}")]
    GatewayUnavailable {
        gateway: GatewayKind,
        message: String,
    },
    #[error("Webhook rejected: {0}")]
    Signature(#[from] SignatureError),
    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    #[error("Amount mismatch: recorded {expected}, reported {observed}")]
    AmountMismatch { expected: Decimal, observed: Decimal },
    #[error("A refund is already in progress for transaction {0}")]
    RefundInProgress(String),
    #[error("Refund of {requested} exceeds refundable balance {available}")]
    RefundExceedsBalance {
        requested: Decimal,
        available: Decimal,
    },
    #[error("No terminal status after {attempts} polling attempts")]
    PollTimeout { attempts: u32 },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

/// Error taxonomy surfaced at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Gateway,
    GatewayUnavailable,
    Signature,
    IllegalTransition,
    NotFound,
    Internal,
}

impl PaymentError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(message.into())))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Validation(_)
            | PaymentError::InvalidAmount(_)
            | PaymentError::UnsupportedGateway(_)
            | PaymentError::Duplicate(_)
            | PaymentError::AmountMismatch { .. }
            | PaymentError::RefundInProgress(_)
            | PaymentError::RefundExceedsBalance { .. } => ErrorKind::Validation,
            PaymentError::Gateway { .. } => ErrorKind::Gateway,
            PaymentError::GatewayUnavailable { .. } | PaymentError::PollTimeout { .. } => {
                ErrorKind::GatewayUnavailable
            }
            PaymentError::Signature(_) => ErrorKind::Signature,
            PaymentError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            PaymentError::NotFound(_) => ErrorKind::NotFound,
            PaymentError::GatewayNotConfigured(_)
            | PaymentError::Config(_)
            | PaymentError::InternalError(_)
            | PaymentError::IoError(_)
            | PaymentError::JsonError(_)
            | PaymentError::CsvError(_) => ErrorKind::Internal,
            #[cfg(feature = "storage-rocksdb")]
            PaymentError::RocksDbError(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status code for the error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Signature => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::IllegalTransition => 409,
            ErrorKind::Gateway => 502,
            ErrorKind::GatewayUnavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Message safe to hand back to a caller. Internal failures are not described.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validation_errors_are_client_errors() {
        assert_eq!(PaymentError::Validation("x".into()).status_code(), 400);
        assert_eq!(PaymentError::InvalidAmount("0".into()).status_code(), 400);
        assert_eq!(
            PaymentError::RefundExceedsBalance {
                requested: dec!(10.00),
                available: dec!(5.00),
            }
            .kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_gateway_errors_keep_vendor_message() {
        let error = PaymentError::Gateway {
            gateway: GatewayKind::Card,
            message: "card_declined".into(),
        };
        assert_eq!(error.status_code(), 502);
        assert!(error.public_message().contains("card_declined"));
    }

    #[test]
    fn test_internal_errors_do_not_leak_detail() {
        let error = PaymentError::internal("connection string postgres://secret");
        assert_eq!(error.status_code(), 500);
        assert_eq!(error.public_message(), "Internal server error");
    }

    #[test]
    fn test_signature_error_conversion() {
        let error: PaymentError = SignatureError::InvalidSignature.into();
        assert_eq!(error.kind(), ErrorKind::Signature);
    }
}
