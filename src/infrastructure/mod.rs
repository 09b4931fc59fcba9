//! Adapters behind the domain ports.

pub mod clock;
pub mod http_gateway;
pub mod in_memory;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
