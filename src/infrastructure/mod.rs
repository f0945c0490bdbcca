pub mod event_bus;
pub mod in_memory;
pub mod provider;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
