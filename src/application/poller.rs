use super::broker::PaymentBroker;
use crate::config::BrokerConfig;
use crate::domain::transaction::{GatewayKind, TransactionSnapshot};
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Caller-side retry loop over `verify` for redirect and QR flows.
pub struct StatusPoller {
    broker: Arc<PaymentBroker>,
    interval: Duration,
    max_attempts: u32,
}

impl StatusPoller {
    pub fn new(broker: Arc<PaymentBroker>) -> Self {
        let defaults = BrokerConfig::default();
        Self {
            broker,
            interval: defaults.poll_interval,
            max_attempts: defaults.poll_max_attempts,
        }
    }

    pub fn from_config(broker: Arc<PaymentBroker>, config: &BrokerConfig) -> Self {
        Self::new(broker)
            .with_interval(config.poll_interval)
            .with_max_attempts(config.poll_max_attempts)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Verifies until the payment settles, returning the first terminal snapshot.
    ///
    /// An unreachable vendor uses up an attempt; any other error ends polling.
    pub async fn poll(&self, gateway: GatewayKind, payment_id: &str) -> Result<TransactionSnapshot> {
        for attempt in 1..=self.max_attempts {
            match self.broker.verify(gateway, payment_id).await {
                Ok(snapshot) if snapshot.status.is_terminal() => return Ok(snapshot),
                Ok(snapshot) => {
                    debug!(%gateway, payment_id, attempt, status = %snapshot.status, "payment not settled yet");
                }
                Err(error @ PaymentError::GatewayUnavailable { .. }) => {
                    warn!(%gateway, payment_id, attempt, %error, "verify failed, retrying");
                }
                Err(error) => return Err(error),
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Err(PaymentError::PollTimeout {
            attempts: self.max_attempts,
        })
    }
}
