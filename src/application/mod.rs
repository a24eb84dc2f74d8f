//! Application layer orchestrating the domain.
//!
//! `ReconciliationEngine` owns every status change, `PaymentBroker` routes
//! caller requests and webhooks to the gateway adapters, and `StatusPoller`
//! is the caller-side retry loop over `verify`.

pub mod broker;
pub mod engine;
pub mod poller;
