//! Adapters behind the domain ports: storage, audit sinks, webhook
//! authentication and the vendor gateways.

pub mod audit;
pub mod gateways;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod webhook;
