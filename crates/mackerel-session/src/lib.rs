//! Account persistence for the feed client.
//!
//! Provides:
//! - `SessionStore` - Signed-in identities with a single default account
//! - `StoreConfig` - TOML-backed store configuration
//! - Storage implementations (memory, SQLite)

pub mod config;
pub mod storage;
pub mod store;

pub use config::{ConfigError, StoreConfig};
#[cfg(feature = "memory")]
pub use storage::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use store::SessionStore;
