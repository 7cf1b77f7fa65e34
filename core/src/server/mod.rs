//! Remote server definitions and their durable storage.

pub mod config;
pub mod storage;

pub use config::{AuthMethod, Scheme, ServerConfig, ServerRecord};
pub use storage::{JsonServerStore, MemoryServerStore, ServerStore};
