//! Domain model: money, records, lifecycle rules and the ports adapters implement.

pub mod audit;
pub mod intent;
pub mod lifecycle;
pub mod money;
pub mod ports;
pub mod status_map;
pub mod transaction;
pub mod webhook;
