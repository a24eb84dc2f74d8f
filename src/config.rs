use crate::domain::transaction::GatewayKind;
use crate::error::{PaymentError, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

const ENV_PREFIX: &str = "PAYBROKER";

/// Credential names each gateway reads, in `PAYBROKER_<GATEWAY>_<NAME>` form.
const CREDENTIAL_NAMES: &[(GatewayKind, &[&str])] = &[
    (GatewayKind::Card, &["secret_key", "webhook_secret", "api_base"]),
    (
        GatewayKind::Wallet,
        &[
            "client_id",
            "secret",
            "environment",
            "webhook_secret",
            "api_base",
        ],
    ),
    (
        GatewayKind::BankTransfer,
        &[
            "api_key",
            "secret_key",
            "merchant_id",
            "environment",
            "webhook_secret",
            "api_base",
        ],
    ),
];

/// Read-only named credentials per gateway.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    values: HashMap<(GatewayKind, String), String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one credential. Empty values are ignored.
    pub fn with(mut self, gateway: GatewayKind, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.trim().is_empty() {
            self.values.insert((gateway, name.to_string()), value);
        }
        self
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let mut credentials = Self::new();
        for (gateway, names) in CREDENTIAL_NAMES {
            for name in *names {
                let key = format!(
                    "{ENV_PREFIX}_{}_{}",
                    gateway.as_str().to_ascii_uppercase(),
                    name.to_ascii_uppercase()
                );
                if let Some(value) = lookup(&key) {
                    credentials = credentials.with(*gateway, name, value);
                }
            }
        }
        credentials
    }

    pub fn get(&self, gateway: GatewayKind, name: &str) -> Option<&str> {
        self.values
            .get(&(gateway, name.to_string()))
            .map(String::as_str)
    }

    /// Returns the credential or `GatewayNotConfigured`.
    pub fn require(&self, gateway: GatewayKind, name: &str) -> Result<&str> {
        self.get(gateway, name)
            .ok_or(PaymentError::GatewayNotConfigured(gateway))
    }

    /// True when every named credential is present.
    pub fn has_all(&self, gateway: GatewayKind, names: &[&str]) -> bool {
        names.iter().all(|name| self.get(gateway, name).is_some())
    }
}

/// Broker-wide settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bound on every outbound vendor call.
    pub http_timeout: Duration,
    pub site_name: String,
    pub site_url: String,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub credentials: Credentials,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            site_name: "PayBroker".to_string(),
            site_url: "http://localhost".to_string(),
            poll_interval: Duration::from_secs(3),
            poll_max_attempts: 60,
            credentials: Credentials::default(),
        }
    }
}

impl BrokerConfig {
    /// Loads settings from the process environment, reading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads settings through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}_{name}"));

        Ok(Self {
            http_timeout: parse_secs(var("HTTP_TIMEOUT_SECS"), "HTTP_TIMEOUT_SECS")?
                .unwrap_or(defaults.http_timeout),
            site_name: var("SITE_NAME").unwrap_or(defaults.site_name),
            site_url: var("SITE_URL").unwrap_or(defaults.site_url),
            poll_interval: parse_secs(var("POLL_INTERVAL_SECS"), "POLL_INTERVAL_SECS")?
                .unwrap_or(defaults.poll_interval),
            poll_max_attempts: match var("POLL_MAX_ATTEMPTS") {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    PaymentError::Config(format!("{ENV_PREFIX}_POLL_MAX_ATTEMPTS: invalid value {raw}"))
                })?,
                None => defaults.poll_max_attempts,
            },
            credentials: Credentials::from_lookup(&lookup),
        })
    }
}

fn parse_secs(raw: Option<String>, name: &str) -> Result<Option<Duration>> {
    raw.map(|raw| {
        raw.trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| PaymentError::Config(format!("{ENV_PREFIX}_{name}: invalid value {raw}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = BrokerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.poll_max_attempts, 60);
        assert!(config.credentials.get(GatewayKind::Card, "secret_key").is_none());
    }

    #[test]
    fn test_reads_gateway_credentials() {
        let config = BrokerConfig::from_lookup(lookup(&[
            ("PAYBROKER_HTTP_TIMEOUT_SECS", "5"),
            ("PAYBROKER_CARD_SECRET_KEY", "sk_test_1"),
            ("PAYBROKER_BANK_TRANSFER_MERCHANT_ID", "m-1"),
            ("PAYBROKER_WALLET_CLIENT_ID", "  "),
        ]))
        .unwrap();

        assert_eq!(config.http_timeout, Duration::from_secs(5));
        let credentials = &config.credentials;
        assert_eq!(credentials.get(GatewayKind::Card, "secret_key"), Some("sk_test_1"));
        assert_eq!(
            credentials.require(GatewayKind::BankTransfer, "merchant_id").unwrap(),
            "m-1"
        );
        assert!(credentials.get(GatewayKind::Wallet, "client_id").is_none());
        assert!(matches!(
            credentials.require(GatewayKind::Wallet, "secret"),
            Err(PaymentError::GatewayNotConfigured(GatewayKind::Wallet))
        ));
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        assert!(matches!(
            BrokerConfig::from_lookup(lookup(&[("PAYBROKER_POLL_MAX_ATTEMPTS", "many")])),
            Err(PaymentError::Config(_))
        ));
    }
}
