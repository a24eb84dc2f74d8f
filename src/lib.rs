//! Multi-gateway payment broker.
//!
//! Card, wallet, bank-transfer and manual cash payments share one gateway
//! contract. Every status report, whether from a capture response, a webhook,
//! a poll or a staff action, is reconciled through a single compare-and-swap
//! transition function.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
